//! End-to-end echo scenario: a local process loops receive-then-reply;
//! another local process sends it a value and gets the same value back.

use std::time::Duration;

use meridian::config::NodeConfig;
use meridian::node::Node;
use meridian::ProcessId;

#[tokio::test(flavor = "multi_thread")]
async fn echo_round_trips_an_exact_payload() {
    let node = Node::start(NodeConfig::new("", "127.0.0.1")).await.unwrap();

    let echo_pid = node.spawn_local(|ctx| async move {
        let reply_ctx = ctx.clone();
        ctx.receive()
            .with::<(ProcessId, String), _, _>(move |(reply_to, msg)| {
                let reply_ctx = reply_ctx.clone();
                async move {
                    let _ = reply_ctx.send(reply_to, msg).await;
                }
            })
            .timeout(Duration::from_secs(5))
            .run()
            .await
            .expect("echo process should receive a request");
    });

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    node.spawn_local(move |ctx| async move {
        ctx.send(echo_pid, (ctx.pid().clone(), "hello".to_string())).await.unwrap();
        ctx.receive()
            .with::<String, _, _>(move |reply| async move {
                assert_eq!(reply, "hello");
                let _ = done_tx.send(());
            })
            .timeout(Duration::from_secs(5))
            .run()
            .await
            .expect("requester should receive the echoed reply");
    });

    tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .expect("echo scenario should complete within the timeout")
        .unwrap();

    node.shutdown().await;
}
