//! Stable identifiers: [`NodeId`] and [`ProcessId`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MeridianError;

/// A stable (hostname, listening port, epoch) triple. Two nodes on the same
/// host are distinguished by port; a node restarted on the same host/port
/// gets a new epoch so no two live NodeIds on a host ever compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub hostname: String,
    pub port: u16,
    pub epoch: i64,
}

impl NodeId {
    pub fn new(hostname: impl Into<String>, port: u16, epoch: i64) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            epoch,
        }
    }

    /// Allocate a fresh NodeId for a node starting up now.
    pub fn allocate(hostname: impl Into<String>, port: u16) -> Self {
        Self::new(hostname, port, chrono::Utc::now().timestamp_millis())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nid://{}:{}/", self.hostname, self.port)
    }
}

impl FromStr for NodeId {
    type Err = MeridianError;

    /// Parses the textual form `nid://host:port/`. The epoch is not part of
    /// the textual form (it exists only to disambiguate in-memory
    /// instances), so a parsed NodeId always has epoch `0`; it is only
    /// useful for constructing a `known-hosts`-style address to dial, not
    /// for equality comparison against a live NodeId.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("nid://")
            .ok_or_else(|| MeridianError::ConfigInvalid(format!("not a NodeId: `{s}`")))?;
        let rest = rest.trim_end_matches('/');
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| MeridianError::ConfigInvalid(format!("NodeId missing port: `{s}`")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| MeridianError::ConfigInvalid(format!("NodeId bad port: `{s}`")))?;
        Ok(NodeId::new(host, port, 0))
    }
}

/// A pair (owning NodeId, local index). The local index is monotonically
/// increasing and never reused within its owning node's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId {
    pub node: NodeId,
    pub local_index: u64,
}

impl ProcessId {
    pub fn new(node: NodeId, local_index: u64) -> Self {
        Self { node, local_index }
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid://{}:{}/{}/",
            self.node.hostname, self.node.port, self.local_index
        )
    }
}

impl FromStr for ProcessId {
    type Err = MeridianError;

    /// Parses `pid://host:port/<local-index>/`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("pid://")
            .ok_or_else(|| MeridianError::ConfigInvalid(format!("not a ProcessId: `{s}`")))?;
        let rest = rest.trim_end_matches('/');
        let mut parts = rest.rsplitn(2, '/');
        let index_str = parts
            .next()
            .ok_or_else(|| MeridianError::ConfigInvalid(format!("ProcessId missing index: `{s}`")))?;
        let host_port = parts
            .next()
            .ok_or_else(|| MeridianError::ConfigInvalid(format!("ProcessId missing host: `{s}`")))?;
        let local_index: u64 = index_str
            .parse()
            .map_err(|_| MeridianError::ConfigInvalid(format!("ProcessId bad index: `{s}`")))?;
        let node: NodeId = format!("nid://{host_port}/").parse()?;
        Ok(ProcessId::new(node, local_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_round_trips_through_display_and_parse() {
        let node = NodeId::new("example.org", 4369, 0);
        assert_eq!(node.to_string(), "nid://example.org:4369/");
        let parsed: NodeId = "nid://example.org:4369/".parse().unwrap();
        assert_eq!(parsed.hostname, node.hostname);
        assert_eq!(parsed.port, node.port);
    }

    #[test]
    fn process_id_round_trips_through_display_and_parse() {
        let node = NodeId::new("example.org", 4369, 0);
        let pid = ProcessId::new(node, 7);
        assert_eq!(pid.to_string(), "pid://example.org:4369/7/");
        let parsed: ProcessId = "pid://example.org:4369/7/".parse().unwrap();
        assert_eq!(parsed, pid);
    }

    #[test]
    fn distinct_epochs_make_otherwise_identical_node_ids_unequal() {
        let a = NodeId::new("host", 1, 1);
        let b = NodeId::new("host", 1, 2);
        assert_ne!(a, b);
    }
}
