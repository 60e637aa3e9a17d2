//! Node controller: identity allocation, listener binding, subsystem
//! wiring, role dispatch, and orderly shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{oneshot, Notify};

use crate::channel::{ChannelTable, SendPort};
use crate::closure::{Closure, ClosureRegistry};
use crate::codec::{Encodable, Frame};
use crate::config::NodeConfig;
use crate::error::MeridianError;
use crate::id::{NodeId, ProcessId};
use crate::peer::PeerDirectory;
use crate::process::{self, ProcessTable};
use crate::transport::{FrameSink, Transport};
use meridian_common::logging::{Component, Logger};

/// How long a `spawn` waits for the remote node's spawn-reply before giving
/// up with `remote-spawn-failed`.
const SPAWN_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the discovery loop re-probes configured known hosts.
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(5);

/// How long `Node::shutdown` waits for outbound queues to drain before
/// cancelling processes and returning.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(500);

/// The process-wide runtime state shared by every operation: process table,
/// channel table, peer directory, closure registry, and transport. Every
/// public operation takes this as an explicit `Arc`, never through
/// thread-local or otherwise ambient state.
pub(crate) struct NodeInner {
    pub(crate) id: NodeId,
    pub(crate) processes: ProcessTable,
    pub(crate) channels: ChannelTable,
    pub(crate) directory: PeerDirectory,
    pub(crate) closures: ClosureRegistry,
    pub(crate) transport: Transport,
    pub(crate) logger: Logger,
    pub(crate) config: NodeConfig,
    next_request_id: AtomicU64,
    pending_spawns: DashMap<u64, oneshot::Sender<Result<ProcessId, String>>>,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) shutdown_notify: Notify,
}

impl NodeInner {
    /// Location-independent send: local mailbox append if `pid` is owned by
    /// this node, otherwise framed and enqueued on the connection to its
    /// owning node. A send to an unknown local pid is silently dropped, per
    /// the send-router contract.
    pub(crate) async fn send<T: Encodable>(
        &self,
        pid: ProcessId,
        value: T,
    ) -> Result<(), MeridianError> {
        if pid.node == self.id {
            match self.processes.mailbox_of(&pid) {
                Some(mailbox) => {
                    mailbox.push_local(value);
                    Ok(())
                }
                None => {
                    self.logger.debug(format!("send to unknown local pid {pid} dropped"));
                    Ok(())
                }
            }
        } else {
            let type_tag = T::type_tag().to_string();
            let bytes = value.encode_self()?;
            let frame = Frame::UserToPid { pid: pid.clone(), type_tag, bytes };
            self.transport.send_to(&pid.node, frame).await
        }
    }

    pub(crate) fn spawn_local<F, Fut>(self: &Arc<Self>, body: F) -> ProcessId
    where
        F: FnOnce(crate::process::ProcessHandle) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (pid, mailbox) = process::allocate_and_register(&self.processes);
        process::spawn_body(pid.clone(), mailbox, self.clone(), body);
        pid
    }

    /// Send a spawn-request to `node` and await its spawn-reply, up to
    /// `SPAWN_REPLY_TIMEOUT`. Fails with `remote-spawn-failed` if the node
    /// is unreachable, the closure name is unknown there, or no reply
    /// arrives in time.
    pub(crate) async fn spawn_remote(
        self: &Arc<Self>,
        node: NodeId,
        closure: Closure,
    ) -> Result<ProcessId, MeridianError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending_spawns.insert(request_id, tx);

        let frame = Frame::SpawnRequest {
            request_id,
            closure_name: closure.name.clone(),
            arg_bytes: closure.arg_bytes.clone(),
        };
        if let Err(e) = self.transport.send_to(&node, frame).await {
            self.pending_spawns.remove(&request_id);
            return Err(MeridianError::RemoteSpawnFailed(node, e.to_string()));
        }

        match tokio::time::timeout(SPAWN_REPLY_TIMEOUT, rx).await {
            Ok(Ok(Ok(pid))) => Ok(pid),
            Ok(Ok(Err(err))) => Err(MeridianError::RemoteSpawnFailed(node, err)),
            Ok(Err(_canceled)) => {
                Err(MeridianError::RemoteSpawnFailed(node, "spawn-reply channel dropped".into()))
            }
            Err(_timeout) => {
                self.pending_spawns.remove(&request_id);
                Err(MeridianError::RemoteSpawnFailed(node, "spawn-reply timed out".into()))
            }
        }
    }

    /// Invoked for an inbound `spawn-request`: materializes the named
    /// closure locally, if registered, and returns its new `ProcessId`.
    async fn accept_spawn_request(
        self: &Arc<Self>,
        closure_name: &str,
        arg_bytes: Vec<u8>,
    ) -> Result<ProcessId, String> {
        if !self.closures.contains(closure_name) {
            return Err(format!("unknown-closure: `{closure_name}`"));
        }
        let (pid, mailbox) = process::allocate_and_register(&self.processes);
        let node = self.clone();
        let name = closure_name.to_string();
        process::spawn_body(pid.clone(), mailbox, node.clone(), move |ctx| async move {
            if let Err(e) = node.closures.invoke(&name, ctx, arg_bytes).await {
                log::warn!("[node] closure `{name}` failed: {e}");
            }
        });
        Ok(pid)
    }

    pub(crate) async fn send_to_port<T: Encodable>(
        &self,
        port: &SendPort<T>,
        value: T,
    ) -> Result<(), MeridianError> {
        if port.owner == self.id {
            if let Some(sink) = self.channels.sink_of(port.channel_index) {
                if let Some(typed) = sink.as_any().downcast_ref::<crate::channel::TypedChannel<T>>() {
                    typed.push(value);
                } else {
                    self.logger.warn(format!(
                        "local send to channel {} with mismatched type",
                        port.channel_index
                    ));
                }
            } else {
                self.logger.debug(format!("send to unknown channel {} dropped", port.channel_index));
            }
            Ok(())
        } else {
            let type_tag = T::type_tag().to_string();
            let bytes = value.encode_self()?;
            let frame = Frame::UserToPort {
                owner: port.owner.clone(),
                channel_index: port.channel_index,
                type_tag,
                bytes,
            };
            self.transport.send_to(&port.owner, frame).await
        }
    }
}

/// Routes decoded frames and peer lifecycle events from the transport back
/// into the node, without giving the transport itself any knowledge of
/// processes, channels, or closures. Holds only a weak reference so the
/// transport (owned by `NodeInner`) doesn't keep `NodeInner` alive forever
/// through a reference cycle.
struct NodeSink(Weak<NodeInner>);

impl FrameSink for NodeSink {
    fn on_frame(&self, from: NodeId, frame: Frame) {
        if let Some(node) = self.0.upgrade() {
            handle_frame(node, from, frame);
        }
    }

    fn on_peer_up(&self, peer: NodeId) {
        if let Some(node) = self.0.upgrade() {
            node.directory.record(peer.clone());
            node.logger.info(format!("peer up: {peer}"));
            let announce_to = peer;
            let node2 = node.clone();
            tokio::spawn(async move {
                let nodes = node2.directory.all();
                let _ = node2.transport.send_to(&announce_to, Frame::PeerAnnounce { nodes }).await;
            });
        }
    }

    fn on_peer_down(&self, peer: NodeId) {
        if let Some(node) = self.0.upgrade() {
            node.logger.warn(format!("peer down: {peer}"));
            node.directory.forget(&peer);
        }
    }
}

fn handle_frame(node: Arc<NodeInner>, from: NodeId, frame: Frame) {
    match frame {
        Frame::UserToPid { pid, type_tag, bytes } => {
            if pid.node == node.id {
                match node.processes.mailbox_of(&pid) {
                    Some(mailbox) => mailbox.push_remote(type_tag, bytes),
                    None => node.logger.debug(format!("dropping message for unknown local pid {pid}")),
                }
            } else {
                node.logger.warn(format!(
                    "received user-to-pid frame from {from} addressed to {}, not us",
                    pid.node
                ));
            }
        }
        Frame::UserToPort { owner, channel_index, type_tag, bytes } => {
            if owner == node.id {
                match node.channels.sink_of(channel_index) {
                    Some(sink) if sink.type_tag() == type_tag => {
                        if let Err(e) = sink.push_encoded(&bytes) {
                            node.logger.warn(format!("failed to decode channel {channel_index}: {e}"));
                        }
                    }
                    Some(sink) => node.logger.warn(format!(
                        "channel {channel_index} type mismatch: expected `{}`, got `{type_tag}`",
                        sink.type_tag()
                    )),
                    None => node.logger.debug(format!("dropping message for unknown channel {channel_index}")),
                }
            } else {
                node.logger.warn(format!(
                    "received user-to-port frame from {from} addressed to owner {owner}, not us"
                ));
            }
        }
        Frame::SpawnRequest { request_id, closure_name, arg_bytes } => {
            let node2 = node.clone();
            tokio::spawn(async move {
                let result = node2.accept_spawn_request(&closure_name, arg_bytes).await;
                let reply = Frame::SpawnReply { request_id, result };
                if let Err(e) = node2.transport.send_to(&from, reply).await {
                    node2.logger.warn(format!("failed to send spawn-reply to {from}: {e}"));
                }
            });
        }
        Frame::SpawnReply { request_id, result } => {
            if let Some((_, tx)) = node.pending_spawns.remove(&request_id) {
                let _ = tx.send(result);
            }
        }
        Frame::PeerAnnounce { nodes } => node.directory.merge_announce(nodes),
        Frame::Ping => {
            let node2 = node.clone();
            tokio::spawn(async move {
                let _ = node2.transport.send_to(&from, Frame::Pong).await;
            });
        }
        Frame::Pong => {}
    }
}

/// Periodically probes every configured known host across the configured
/// port range, dialing (or reusing an existing connection to) each
/// candidate. Once a candidate's handshake succeeds, `on_peer_up` records
/// its real `NodeId`; a bare hostname that resolves to nothing useful is
/// simply retried next tick via the same bounded-backoff connection.
fn spawn_discovery_loop(node: Arc<NodeInner>) {
    tokio::spawn(async move {
        loop {
            let candidates = node.directory.candidate_addresses(node.config.port_range);
            for (host, port) in candidates {
                node.transport.get_or_dial(&host, port);
            }
            tokio::select! {
                _ = tokio::time::sleep(DISCOVERY_INTERVAL) => {}
                _ = node.shutdown_notify.notified() => break,
            }
        }
    });
}

/// A running node: the entry point for starting the runtime, handing off to
/// the role dispatcher, and shutting down.
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Bind the listener, allocate this node's identity, wire up every
    /// subsystem, and start accepting inbound connections and probing known
    /// hosts. Does not yet run the role body -- call [`Node::run`] for that.
    pub async fn start(config: NodeConfig) -> Result<Self, MeridianError> {
        meridian_common::logging::init();
        let bootstrap_logger = Logger::new_root(Component::Node);
        bootstrap_logger.info(format!("starting node: {config}"));

        let (listener, bound_port) = Transport::bind(config.listen_port).await?;
        let node_id = NodeId::allocate(config.hostname.clone(), bound_port);

        let magic = config.magic.clone();
        let backoff = config.connect_backoff_ms;
        let queue_capacity = config.outbound_queue_capacity;
        let known_hosts = config.known_hosts.clone();

        let inner = Arc::new_cyclic(|weak: &Weak<NodeInner>| {
            let sink: Arc<dyn FrameSink> = Arc::new(NodeSink(weak.clone()));
            let transport = Transport::new(node_id.clone(), magic, backoff, queue_capacity, sink);
            NodeInner {
                id: node_id.clone(),
                processes: ProcessTable::new(node_id.clone()),
                channels: ChannelTable::new(node_id.clone()),
                directory: PeerDirectory::new(node_id.clone(), known_hosts),
                closures: ClosureRegistry::from_registered(),
                transport,
                logger: Logger::with_context(Component::Node, node_id.to_string()),
                config,
                next_request_id: AtomicU64::new(0),
                pending_spawns: DashMap::new(),
                shutting_down: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
            }
        });

        inner.transport.spawn_accept_loop(listener);
        inner.logger.info(format!("listening on port {bound_port}"));
        spawn_discovery_loop(inner.clone());

        Ok(Self { inner })
    }

    pub fn id(&self) -> &NodeId {
        &self.inner.id
    }

    pub fn logger(&self) -> &Logger {
        &self.inner.logger
    }

    /// Spawn a process sharing this node's address space, without going
    /// through another process's `ProcessHandle` first. Useful for a
    /// binary's `main` to seed the first local activity.
    pub fn spawn_local<F, Fut>(&self, body: F) -> ProcessId
    where
        F: FnOnce(crate::process::ProcessHandle) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner.spawn_local(body)
    }

    /// Create a node-owned typed channel.
    pub fn new_channel<T: Encodable>(&self) -> (SendPort<T>, crate::channel::ReceivePort<T>) {
        self.inner.channels.new_channel()
    }

    /// Location-independent send, usable directly from a binary's `main`
    /// (or a test harness) without already being inside a process body.
    pub async fn send<T: Encodable>(&self, pid: ProcessId, value: T) -> Result<(), MeridianError> {
        self.inner.send(pid, value).await
    }

    /// Spawn a registered closure on a remote node and await its reply.
    pub async fn spawn(&self, node: NodeId, closure: Closure) -> Result<ProcessId, MeridianError> {
        self.inner.spawn_remote(node, closure).await
    }

    pub fn peer_directory(&self) -> &PeerDirectory {
        &self.inner.directory
    }

    /// Run the role dispatcher: resolve the configured role tag to a
    /// registered closure and run it to completion as a fresh local
    /// process, or enter an idle wait (serving inbound requests only) if
    /// the tag is empty or unregistered. Returns once the role body
    /// completes or `shutdown` is called.
    pub async fn run(&self) {
        crate::role::dispatch(self.inner.clone()).await;
    }

    /// Orderly shutdown: refuse new inbound connections, give outbound
    /// queues a bounded window to drain, then cancel every live process.
    /// The listener socket and outbound connections are dropped when the
    /// last `Arc<NodeInner>` goes away.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Relaxed);
        self.inner.transport.stop_accepting();
        self.inner.shutdown_notify.notify_waiters();
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        self.inner.processes.abort_all();
        self.inner.logger.info("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn start_allocates_a_port_and_node_id() {
        let config = NodeConfig::new("", "127.0.0.1");
        let node = Node::start(config).await.unwrap();
        assert_eq!(node.id().hostname, "127.0.0.1");
        assert!(node.id().port > 0);
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_send_is_observed_by_a_spawned_process() {
        use std::sync::Mutex as StdMutex;

        let config = NodeConfig::new("", "127.0.0.1");
        let node = Node::start(config).await.unwrap();

        let seen = Arc::new(StdMutex::new(None));
        let seen2 = seen.clone();
        let pid = node.spawn_local(move |ctx| async move {
            ctx.receive()
                .with::<i32, _, _>(move |v| {
                    let seen2 = seen2.clone();
                    async move {
                        *seen2.lock().unwrap() = Some(v);
                    }
                })
                .run()
                .await
                .unwrap();
        });

        node.inner.send(pid, 42i32).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), Some(42));
        node.shutdown().await;
    }
}
