//! Role dispatcher: on startup, select and run the body associated with the
//! configured role tag.
//!
//! The role tag (`NodeConfig::role`) names a closure that must already be
//! registered in this node's [`crate::closure::ClosureRegistry`] -- the same
//! registry a remote `spawn` materializes a closure from, so a role body and
//! a remotely-spawnable body are the same kind of thing. An empty or
//! unregistered tag is not an error: the node enters an idle wait, serving
//! inbound requests (spawn-requests, sends to its own processes) only. This
//! is the common "slave awaits instructions" pattern.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::node::NodeInner;
use crate::process;

/// How often the idle wait loop wakes up to check for a shutdown request.
/// Purely a liveness bound -- `shutdown_notify` interrupts it immediately in
/// the common case.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(3600);

/// Resolve `node.config.role` against the closure registry and either run
/// it to completion as a fresh local process, or enter the idle wait.
/// Returns once the role body completes (normally or on panic) or once the
/// node is asked to shut down while idling.
pub(crate) async fn dispatch(node: Arc<NodeInner>) {
    let role = node.config.role.clone();
    if role.is_empty() {
        node.logger.info("no role configured; entering idle wait (serving inbound requests only)");
        idle_wait(node).await;
        return;
    }
    if !node.closures.contains(&role) {
        node.logger.warn(format!("role `{role}` has no registered closure; entering idle wait"));
        idle_wait(node).await;
        return;
    }

    node.logger.info(format!("dispatching role `{role}`"));
    run_role_body(node, role).await;
}

async fn run_role_body(node: Arc<NodeInner>, role: String) {
    let (pid, mailbox) = process::allocate_and_register(&node.processes);
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let node_for_body = node.clone();
    process::spawn_body(pid, mailbox, node.clone(), move |ctx| async move {
        if let Err(e) = node_for_body.closures.invoke(&role, ctx, Vec::new()).await {
            log::error!("[role] closure `{role}` failed: {e}");
        }
        let _ = done_tx.send(());
    });

    tokio::select! {
        _ = done_rx => {}
        _ = node.shutdown_notify.notified() => {}
    }
}

async fn idle_wait(node: Arc<NodeInner>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
            _ = node.shutdown_notify.notified() => break,
        }
        if node.shutting_down.load(Ordering::Relaxed) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::node::Node;

    #[tokio::test(flavor = "multi_thread")]
    async fn an_unregistered_role_enters_idle_wait_until_shutdown() {
        let config = NodeConfig::new("nonexistent-role", "127.0.0.1");
        let node = Arc::new(Node::start(config).await.unwrap());
        let node_for_run = node.clone();
        let run = tokio::spawn(async move { node_for_run.run().await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!run.is_finished());
        node.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), run).await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn an_empty_role_enters_idle_wait_and_shutdown_unblocks_it() {
        let config = NodeConfig::new("", "127.0.0.1");
        let node = Node::start(config).await.unwrap();
        let node = Arc::new(node);
        let node_for_run = node.clone();
        let run = tokio::spawn(async move {
            node_for_run.run().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        node.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("role dispatch should return once shutdown is requested")
            .unwrap();
    }
}
