//! Transport: outbound connection pool keyed by `(hostname, port)`, the
//! inbound listener, and the [`FrameSink`] boundary that hands decoded
//! frames and peer up/down events back to the node.
//!
//! A single [`OutboundConnection`] per destination is reused for every send
//! to that destination, including spawn-replies sent back to a node that
//! originally dialed *us* -- since a NodeId's port is always its listening
//! port, replying is just another outbound send. This means an inbound
//! session never needs its own reconnect logic: only the side that
//! initiated a logical relationship (by knowing the destination NodeId)
//! redials it.

pub mod connection;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::codec::Frame;
use crate::error::MeridianError;
use crate::id::NodeId;

pub use connection::{ConnectionState, OutboundConnection};

/// Receives decoded frames and peer lifecycle events from every connection
/// (inbound or outbound) this transport drives. Implemented by the node so
/// it can route frames without the transport knowing about processes,
/// channels, or closures. Methods are synchronous: implementations that need
/// to do async work (invoke a closure, send a reply) spawn a task.
pub(crate) trait FrameSink: Send + Sync {
    fn on_frame(&self, from: NodeId, frame: Frame);
    fn on_peer_up(&self, peer: NodeId);
    fn on_peer_down(&self, peer: NodeId);
}

/// Opens and maintains every connection this node has to the rest of the
/// cluster. One [`Transport`] per node.
pub struct Transport {
    local_id: NodeId,
    magic: String,
    backoff_range_ms: (u64, u64),
    queue_capacity: usize,
    sink: Arc<dyn FrameSink>,
    connections: DashMap<String, Arc<OutboundConnection>>,
    accept_shutdown: Arc<Notify>,
}

impl Transport {
    pub(crate) fn new(
        local_id: NodeId,
        magic: String,
        backoff_range_ms: (u64, u64),
        queue_capacity: usize,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            local_id,
            magic,
            backoff_range_ms,
            queue_capacity,
            sink,
            connections: DashMap::new(),
            accept_shutdown: Arc::new(Notify::new()),
        }
    }

    /// Bind the listener. The bound port becomes part of this node's
    /// identity, so binding happens before a `NodeId` is allocated.
    pub(crate) async fn bind(fixed_port: Option<u16>) -> Result<(TcpListener, u16), MeridianError> {
        let addr = format!("0.0.0.0:{}", fixed_port.unwrap_or(0));
        let listener =
            TcpListener::bind(&addr).await.map_err(|e| MeridianError::BindFailed(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| MeridianError::BindFailed(e.to_string()))?
            .port();
        Ok((listener, port))
    }

    /// Accept inbound connections until `stop_accepting` is called. Every
    /// accepted socket gets its own handshake-then-duplex session; sessions
    /// don't reconnect on their own (see module docs).
    pub(crate) fn spawn_accept_loop(&self, listener: TcpListener) {
        let local_id = self.local_id.clone();
        let magic = self.magic.clone();
        let sink = self.sink.clone();
        let queue_capacity = self.queue_capacity;
        let shutdown = self.accept_shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.notified() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _addr)) => {
                                let local_id = local_id.clone();
                                let magic = magic.clone();
                                let sink = sink.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = connection::accept_session(
                                        stream, local_id, magic, sink, queue_capacity,
                                    )
                                    .await
                                    {
                                        log::warn!("[transport] inbound handshake failed: {e}");
                                    }
                                });
                            }
                            Err(e) => {
                                log::warn!("[transport] accept failed: {e}");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Stop accepting new inbound connections. Existing sessions are
    /// unaffected; this only refuses new ones, per the shutdown contract.
    pub(crate) fn stop_accepting(&self) {
        self.accept_shutdown.notify_waiters();
    }

    fn key_of(host: &str, port: u16) -> String {
        format!("{host}:{port}")
    }

    /// Get the existing outbound connection to `(host, port)`, or dial a new
    /// one. Idempotent: concurrent callers targeting the same destination
    /// share one connection.
    pub(crate) fn get_or_dial(&self, host: &str, port: u16) -> Arc<OutboundConnection> {
        let key = Self::key_of(host, port);
        if let Some(existing) = self.connections.get(&key) {
            return existing.clone();
        }
        // `dial` spawns the reconnect loop as a side effect of construction,
        // so it must happen inside the entry closure: building it before
        // `entry()` would let two racing first-time callers each spawn their
        // own loop, and only one of the two `OutboundConnection`s would win
        // the map, leaving the other's loop running forever as an orphaned
        // duplicate connection to the same peer.
        self.connections
            .entry(key)
            .or_insert_with(|| {
                Arc::new(OutboundConnection::dial(
                    host.to_string(),
                    port,
                    self.local_id.clone(),
                    self.magic.clone(),
                    self.backoff_range_ms,
                    self.queue_capacity,
                    self.sink.clone(),
                ))
            })
            .clone()
    }

    /// Frame a message for `target` and enqueue it on (or establish) the
    /// outbound connection to its node. Suspends only on local backpressure
    /// if the per-connection outbound queue is full; never waits on network
    /// I/O directly.
    pub(crate) async fn send_to(&self, target: &NodeId, frame: Frame) -> Result<(), MeridianError> {
        let conn = self.get_or_dial(&target.hostname, target.port);
        conn.send(frame).await
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct NullSink;

    impl FrameSink for NullSink {
        fn on_frame(&self, _from: NodeId, _frame: Frame) {}
        fn on_peer_up(&self, _peer: NodeId) {}
        fn on_peer_down(&self, _peer: NodeId) {}
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bind_picks_an_os_assigned_port_when_none_is_fixed() {
        let (_listener, port) = Transport::bind(None).await.unwrap();
        assert!(port > 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_or_dial_reuses_the_same_connection_for_repeated_destinations() {
        let local_id = NodeId::new("tester", 0, 0);
        let sink: Arc<dyn FrameSink> = Arc::new(NullSink);
        let transport = Transport::new(local_id, "magic".to_string(), (20, 100), 8, sink);

        let a = transport.get_or_dial("127.0.0.1", 1);
        let b = transport.get_or_dial("127.0.0.1", 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(transport.connection_count(), 1);
    }
}
