//! Peer directory: the set of other nodes this node knows about, by NodeId,
//! and the address candidates worth dialing to find them.

use dashmap::DashMap;

use crate::id::NodeId;

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub node: NodeId,
    pub discovered_at_ms: i64,
}

/// Known hosts configured at startup, plus every NodeId discovered since,
/// either by successfully dialing a candidate address or by a `PeerAnnounce`
/// frame relayed from another peer.
pub struct PeerDirectory {
    local: NodeId,
    known_hosts: Vec<String>,
    peers: DashMap<String, PeerInfo>,
}

impl PeerDirectory {
    pub fn new(local: NodeId, known_hosts: Vec<String>) -> Self {
        Self { local, known_hosts, peers: DashMap::new() }
    }

    fn key_of(node: &NodeId) -> String {
        format!("{}:{}", node.hostname, node.port)
    }

    pub fn local(&self) -> &NodeId {
        &self.local
    }

    pub fn known_hosts(&self) -> &[String] {
        &self.known_hosts
    }

    /// Expand the configured known hosts against a port range into concrete
    /// `(host, port)` candidates to dial. A host already carrying an
    /// explicit `host:port` form contributes exactly one candidate; a bare
    /// hostname contributes one candidate per port in the range.
    pub fn candidate_addresses(&self, port_range: (u32, u32)) -> Vec<(String, u16)> {
        let mut out = Vec::new();
        for host in &self.known_hosts {
            if let Some((h, p)) = host.rsplit_once(':') {
                if let Ok(port) = p.parse::<u16>() {
                    out.push((h.to_string(), port));
                    continue;
                }
            }
            for port in port_range.0..=port_range.1 {
                if let Ok(port) = u16::try_from(port) {
                    out.push((host.clone(), port));
                }
            }
        }
        out
    }

    /// Record (or refresh) a peer discovered either by direct handshake or
    /// by an announce relayed from a third node. A higher epoch for the
    /// same (hostname, port) supersedes a previously recorded one, so a
    /// restarted peer is recognized as a distinct, newer identity.
    pub fn record(&self, node: NodeId) {
        if node == self.local {
            return;
        }
        let key = Self::key_of(&node);
        let is_newer = match self.peers.get(&key) {
            Some(existing) => node.epoch > existing.node.epoch,
            None => true,
        };
        if !is_newer {
            return;
        }
        self.peers.insert(
            key,
            PeerInfo { node, discovered_at_ms: chrono::Utc::now().timestamp_millis() },
        );
    }

    /// Merge a batch of NodeIds relayed via `PeerAnnounce`.
    pub fn merge_announce(&self, nodes: Vec<NodeId>) {
        for node in nodes {
            self.record(node);
        }
    }

    pub fn lookup(&self, node: &NodeId) -> Option<NodeId> {
        self.peers.get(&Self::key_of(node)).map(|e| e.node.clone())
    }

    pub fn all(&self) -> Vec<NodeId> {
        self.peers.iter().map(|e| e.node.clone()).collect()
    }

    pub fn forget(&self, node: &NodeId) {
        self.peers.remove(&Self::key_of(node));
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_addresses_expands_bare_hosts_across_the_port_range() {
        let dir = PeerDirectory::new(NodeId::new("self", 40_000, 0), vec!["node-b".to_string()]);
        let candidates = dir.candidate_addresses((40_000, 40_002));
        assert_eq!(
            candidates,
            vec![
                ("node-b".to_string(), 40_000),
                ("node-b".to_string(), 40_001),
                ("node-b".to_string(), 40_002),
            ]
        );
    }

    #[test]
    fn candidate_addresses_respects_an_explicit_port() {
        let dir = PeerDirectory::new(NodeId::new("self", 40_000, 0), vec!["node-b:9000".to_string()]);
        let candidates = dir.candidate_addresses((40_000, 40_002));
        assert_eq!(candidates, vec![("node-b".to_string(), 9000)]);
    }

    #[test]
    fn recording_a_higher_epoch_supersedes_the_prior_identity() {
        let dir = PeerDirectory::new(NodeId::new("self", 40_000, 0), Vec::new());
        let old = NodeId::new("node-b", 41_000, 1);
        let new = NodeId::new("node-b", 41_000, 2);
        dir.record(old.clone());
        dir.record(new.clone());
        assert_eq!(dir.len(), 1);
        assert!(dir.lookup(&new).is_some());
    }

    #[test]
    fn the_local_node_is_never_recorded_as_a_peer() {
        let local = NodeId::new("self", 40_000, 0);
        let dir = PeerDirectory::new(local.clone(), Vec::new());
        dir.record(local);
        assert!(dir.is_empty());
    }
}
