//! Peer discovery scenario: a node configured with explicit `known-hosts`
//! entries dials each candidate on startup (immediately, not only on the
//! periodic re-probe tick) and its directory converges to every reachable
//! NodeId within a bounded window.

use std::time::Duration;

use meridian::config::NodeConfig;
use meridian::node::Node;

async fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn a_node_discovers_a_peer_named_as_an_explicit_known_host() {
    let peer = Node::start(NodeConfig::new("", "127.0.0.1")).await.unwrap();
    let peer_addr = format!("127.0.0.1:{}", peer.id().port);

    let local = Node::start(
        NodeConfig::new("", "127.0.0.1").with_known_hosts(vec![peer_addr]),
    )
    .await
    .unwrap();

    let converged = wait_until(
        || local.peer_directory().lookup(peer.id()).is_some(),
        Duration::from_secs(2),
    )
    .await;
    assert!(converged, "local node's directory should learn the peer's NodeId");

    // The connection is bidirectional: the dialed side also records the
    // dialer once the handshake completes.
    let peer_converged =
        wait_until(|| peer.peer_directory().len() == 1, Duration::from_secs(2)).await;
    assert!(peer_converged, "the dialed peer should in turn learn the dialer's NodeId");

    local.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn a_master_converges_to_every_known_host_it_lists() {
    let slave_one = Node::start(NodeConfig::new("", "127.0.0.1")).await.unwrap();
    let slave_two = Node::start(NodeConfig::new("", "127.0.0.1")).await.unwrap();

    let known_hosts = vec![
        format!("127.0.0.1:{}", slave_one.id().port),
        format!("127.0.0.1:{}", slave_two.id().port),
    ];
    let master = Node::start(
        NodeConfig::new("MASTER", "127.0.0.1").with_known_hosts(known_hosts),
    )
    .await
    .unwrap();

    let converged = wait_until(|| master.peer_directory().len() == 2, Duration::from_secs(2)).await;
    assert!(converged, "master's directory should converge to both known hosts");
    assert!(master.peer_directory().lookup(slave_one.id()).is_some());
    assert!(master.peer_directory().lookup(slave_two.id()).is_some());

    master.shutdown().await;
    slave_one.shutdown().await;
    slave_two.shutdown().await;
}
