//! A minimal key/value configuration source.
//!
//! The runtime treats configuration as an opaque key/value source (per the
//! core specification, the file format and any richer schema belong to an
//! external collaborator). What lives here is just enough to load the keys
//! the core actually reads: case-insensitive keys, one value per line, with
//! small helpers for the list- and pair-valued keys (`known-hosts`,
//! `port-range`, `connect-backoff-ms`).

use std::collections::HashMap;

use crate::errors::Result;
use anyhow::anyhow;

/// A parsed `key = value` configuration source.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    values: HashMap<String, String>,
}

impl RawConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key = value` lines, ignoring blank lines and `#`-prefixed
    /// comments. Keys are lower-cased so lookups are case-insensitive.
    pub fn parse(source: &str) -> Self {
        let mut values = HashMap::new();
        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }
        Self { values }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn get_string(&self, key: &str, default: impl Into<String>) -> String {
        self.get(key).map(str::to_string).unwrap_or_else(|| default.into())
    }

    pub fn get_u16(&self, key: &str) -> Result<Option<u16>> {
        match self.get(key) {
            Some(raw) => raw
                .parse::<u16>()
                .map(Some)
                .map_err(|_| anyhow!("config-invalid: `{key}` is not a valid port: `{raw}`")),
            None => Ok(None),
        }
    }

    /// Comma-separated list, e.g. `known-hosts = h1,h2,h3`.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(raw) if !raw.is_empty() => {
                raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// A `min-max` pair, e.g. `port-range = 40000-40100`.
    pub fn get_pair_u32(&self, key: &str, default: (u32, u32)) -> Result<(u32, u32)> {
        match self.get(key) {
            Some(raw) => {
                let (lo, hi) = raw
                    .split_once('-')
                    .ok_or_else(|| anyhow!("config-invalid: `{key}` must be `min-max`, got `{raw}`"))?;
                let lo: u32 = lo
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("config-invalid: `{key}` lower bound is not a number"))?;
                let hi: u32 = hi
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("config-invalid: `{key}` upper bound is not a number"))?;
                Ok((lo, hi))
            }
            None => Ok(default),
        }
    }
}
