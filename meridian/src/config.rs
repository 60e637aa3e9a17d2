//! Typed, builder-style node configuration, loaded from a
//! [`meridian_common::config::RawConfig`] key/value source.

use meridian_common::config::RawConfig;

use crate::error::MeridianError;

pub const DEFAULT_MAGIC: &str = "meridian-default-magic";
pub const DEFAULT_PORT_RANGE: (u32, u32) = (40_000, 40_100);
pub const DEFAULT_BACKOFF_MS: (u64, u64) = (200, 5_000);
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// Typed node configuration, built either programmatically (`NodeConfig::new`
/// plus `with_*` builder calls) or from a parsed key/value source
/// (`NodeConfig::from_raw`).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub role: String,
    pub hostname: String,
    pub listen_port: Option<u16>,
    pub known_hosts: Vec<String>,
    pub port_range: (u32, u32),
    pub magic: String,
    pub connect_backoff_ms: (u64, u64),
    pub outbound_queue_capacity: usize,
}

impl NodeConfig {
    /// Primary constructor: a role tag and the hostname this node advertises.
    /// Everything else defaults and is adjusted through `with_*` calls.
    pub fn new(role: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            hostname: hostname.into(),
            listen_port: None,
            known_hosts: Vec::new(),
            port_range: DEFAULT_PORT_RANGE,
            magic: DEFAULT_MAGIC.to_string(),
            connect_backoff_ms: DEFAULT_BACKOFF_MS,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        }
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    pub fn with_known_hosts(mut self, hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.known_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port_range(mut self, range: (u32, u32)) -> Self {
        self.port_range = range;
        self
    }

    pub fn with_magic(mut self, magic: impl Into<String>) -> Self {
        self.magic = magic.into();
        self
    }

    pub fn with_connect_backoff_ms(mut self, backoff: (u64, u64)) -> Self {
        self.connect_backoff_ms = backoff;
        self
    }

    pub fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity;
        self
    }

    /// Build a `NodeConfig` from a parsed key/value source, per the
    /// configuration keys in the external interfaces section. `hostname` is
    /// required; everything else defaults.
    pub fn from_raw(raw: &RawConfig) -> Result<Self, MeridianError> {
        let hostname = raw
            .get("hostname")
            .ok_or_else(|| MeridianError::ConfigInvalid("missing required key `hostname`".into()))?
            .to_string();
        let role = raw.get_string("role", "");
        let mut config = NodeConfig::new(role, hostname);

        if let Some(port) = raw
            .get_u16("listen-port")
            .map_err(|e| MeridianError::ConfigInvalid(e.to_string()))?
        {
            config = config.with_listen_port(port);
        }
        config = config.with_known_hosts(raw.get_list("known-hosts"));
        config = config.with_port_range(
            raw.get_pair_u32("port-range", DEFAULT_PORT_RANGE)
                .map_err(|e| MeridianError::ConfigInvalid(e.to_string()))?,
        );
        config = config.with_magic(raw.get_string("magic", DEFAULT_MAGIC));
        let backoff = raw
            .get_pair_u32(
                "connect-backoff-ms",
                (DEFAULT_BACKOFF_MS.0 as u32, DEFAULT_BACKOFF_MS.1 as u32),
            )
            .map_err(|e| MeridianError::ConfigInvalid(e.to_string()))?;
        config = config.with_connect_backoff_ms((backoff.0 as u64, backoff.1 as u64));

        Ok(config)
    }
}

impl std::fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "NodeConfig {{ role: {:?}, hostname: {:?}, listen_port: {:?}, known_hosts: {:?} }}",
            self.role, self.hostname, self.listen_port, self.known_hosts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_the_configuration_section() {
        let config = NodeConfig::new("MASTER", "node-a");
        assert_eq!(config.port_range, DEFAULT_PORT_RANGE);
        assert_eq!(config.magic, DEFAULT_MAGIC);
        assert_eq!(config.connect_backoff_ms, DEFAULT_BACKOFF_MS);
    }

    #[test]
    fn from_raw_requires_hostname() {
        let raw = RawConfig::parse("role = MASTER\n");
        let err = NodeConfig::from_raw(&raw).unwrap_err();
        assert!(matches!(err, MeridianError::ConfigInvalid(_)));
    }

    #[test]
    fn from_raw_parses_every_key() {
        let raw = RawConfig::parse(
            "role = MASTER\n\
             hostname = node-a\n\
             listen-port = 9000\n\
             known-hosts = h1,h2\n\
             port-range = 41000-41010\n\
             magic = secret\n\
             connect-backoff-ms = 100-2000\n",
        );
        let config = NodeConfig::from_raw(&raw).unwrap();
        assert_eq!(config.role, "MASTER");
        assert_eq!(config.hostname, "node-a");
        assert_eq!(config.listen_port, Some(9000));
        assert_eq!(config.known_hosts, vec!["h1", "h2"]);
        assert_eq!(config.port_range, (41000, 41010));
        assert_eq!(config.magic, "secret");
        assert_eq!(config.connect_backoff_ms, (100, 2000));
    }
}
