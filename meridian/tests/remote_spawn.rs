//! Remote spawn scenario: node A spawns a closure on node B with no
//! arguments beyond an encoded `(reply-to, value)` pair, B's body sends the
//! value back to the pid A embedded in the arguments, and A observes the
//! exact round-tripped value within the spawn-reply timeout.

use std::time::Duration;

use meridian::codec::Encodable;
use meridian::config::NodeConfig;
use meridian::node::Node;
use meridian::process::ProcessHandle;
use meridian::{Closure, MeridianError, ProcessId};

#[meridian_macros::closure("test-remote-echo")]
async fn remote_echo(ctx: ProcessHandle, arg: (ProcessId, i32)) {
    let (reply_to, value) = arg;
    let _ = ctx.send(reply_to, value).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_spawn_round_trips_a_value_within_timeout() {
    let node_b = Node::start(NodeConfig::new("", "127.0.0.1")).await.unwrap();
    let node_a = Node::start(NodeConfig::new("", "127.0.0.1")).await.unwrap();

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let receiver_pid = node_a.spawn_local(move |ctx| async move {
        ctx.receive()
            .with::<i32, _, _>(move |v| {
                let done_tx = done_tx;
                async move {
                    let _ = done_tx.send(v);
                }
            })
            .timeout(Duration::from_secs(5))
            .run()
            .await
            .expect("requester should receive the remote echo's reply");
    });

    let arg_bytes = (receiver_pid.clone(), 42i32).encode_self().unwrap();
    let closure = Closure::new("test-remote-echo", arg_bytes);
    let remote_pid = node_a
        .spawn(node_b.id().clone(), closure)
        .await
        .expect("spawn on a reachable node with a registered closure should succeed");

    assert_eq!(&remote_pid.node, node_b.id());

    let got = tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .expect("echoed value should arrive within the timeout")
        .unwrap();
    assert_eq!(got, 42);

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn spawning_an_unregistered_closure_fails_with_remote_spawn_failed() {
    let node_b = Node::start(NodeConfig::new("", "127.0.0.1")).await.unwrap();
    let node_a = Node::start(NodeConfig::new("", "127.0.0.1")).await.unwrap();

    let closure = Closure::new("this-closure-does-not-exist-anywhere", Vec::new());
    let result = node_a.spawn(node_b.id().clone(), closure).await;

    assert!(matches!(result, Err(MeridianError::RemoteSpawnFailed(_, _))));

    node_a.shutdown().await;
    node_b.shutdown().await;
}
