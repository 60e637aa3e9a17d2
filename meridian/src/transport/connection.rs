//! A single TCP connection to a peer: the outbound reconnect-with-backoff
//! state machine, and the inbound one-shot session accepted by the
//! listener. Both drive the same duplex read/write loop once a handshake
//! has completed.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};

use crate::codec::{self, Frame};
use crate::error::MeridianError;
use crate::id::NodeId;

use super::FrameSink;

/// Lifecycle of an outbound connection. Inbound sessions don't have a
/// state machine of their own: they run once and end, with reconnection
/// left to whichever side holds the persistent relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Up = 1,
    Backoff = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Up,
            2 => Self::Backoff,
            _ => Self::Closed,
        }
    }
}

fn next_backoff(current_ms: u64, max_ms: u64) -> u64 {
    (current_ms.saturating_mul(2)).min(max_ms)
}

async fn sleep_with_jitter(base_ms: u64) {
    let jitter_fraction = rand::rng().random_range(-0.2..=0.2);
    let jittered = (base_ms as f64) * (1.0 + jitter_fraction);
    tokio::time::sleep(Duration::from_millis(jittered.max(0.0) as u64)).await;
}

/// Runs the read/write halves of an already-connected, already-handshaken
/// socket until either side errs, then notifies `sink` of the loss.
pub(crate) async fn run_duplex<S>(
    stream: S,
    peer: NodeId,
    sink: Arc<dyn FrameSink>,
    mut outbound_rx: mpsc::Receiver<Frame>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let broken = Arc::new(Notify::new());
    let reader_broken = broken.clone();
    let read_peer = peer.clone();
    let read_sink = sink.clone();
    let reader_task = tokio::spawn(async move {
        loop {
            match codec::read_frame(&mut reader).await {
                Ok(Some(frame)) => read_sink.on_frame(read_peer.clone(), frame),
                _ => break,
            }
        }
        reader_broken.notify_waiters();
    });

    loop {
        tokio::select! {
            biased;
            _ = broken.notified() => break,
            maybe = outbound_rx.recv() => {
                match maybe {
                    Some(frame) => {
                        if codec::write_frame(&mut writer, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    reader_task.abort();
    sink.on_peer_down(peer);
}

/// Handle one inbound connection: exchange handshakes (reading the peer's
/// first, since the dialing side writes first), register the write half
/// with the node so it can route outbound traffic back over this same
/// socket, then run the duplex loop.
pub(crate) async fn accept_session(
    stream: TcpStream,
    local_id: NodeId,
    magic: String,
    sink: Arc<dyn FrameSink>,
    queue_capacity: usize,
) -> Result<mpsc::Sender<Frame>, MeridianError> {
    let mut stream = stream;
    let peer = codec::read_handshake(&mut stream, &magic).await?;
    codec::write_handshake(&mut stream, &local_id, &magic).await?;
    let (tx, rx) = mpsc::channel(queue_capacity);
    sink.on_peer_up(peer.clone());
    let sink2 = sink.clone();
    let peer2 = peer.clone();
    tokio::spawn(async move {
        run_duplex(stream, peer2, sink2, rx).await;
    });
    Ok(tx)
}

/// An outbound connection to a known (host, port): dials, handshakes,
/// drives traffic, and on any failure backs off and retries indefinitely.
/// The returned handle's `send` stays valid across reconnects; frames
/// enqueued while disconnected wait in the bounded outbound queue, but a
/// frame still queued when a session breaks is dropped with it -- there is
/// no retransmission across connection attempts.
pub struct OutboundConnection {
    state: Arc<AtomicU8>,
    sender: Arc<StdMutex<mpsc::Sender<Frame>>>,
}

impl OutboundConnection {
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn sender(&self) -> mpsc::Sender<Frame> {
        self.sender.lock().unwrap().clone()
    }

    pub async fn send(&self, frame: Frame) -> Result<(), MeridianError> {
        let sender = self.sender.lock().unwrap().clone();
        sender
            .send(frame)
            .await
            .map_err(|_| MeridianError::ConnectionFailed("<unresolved>".to_string(), "outbound queue closed".to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn dial(
        host: String,
        port: u16,
        local_id: NodeId,
        magic: String,
        backoff_range_ms: (u64, u64),
        queue_capacity: usize,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        let state = Arc::new(AtomicU8::new(ConnectionState::Connecting as u8));
        let (tx, rx) = mpsc::channel(queue_capacity);
        let sender = Arc::new(StdMutex::new(tx));
        let loop_state = state.clone();
        let loop_sender = sender.clone();
        tokio::spawn(reconnect_loop(
            host, port, local_id, magic, backoff_range_ms, loop_state, sink, rx, loop_sender, queue_capacity,
        ));
        Self { state, sender }
    }
}

#[allow(clippy::too_many_arguments)]
async fn reconnect_loop(
    host: String,
    port: u16,
    local_id: NodeId,
    magic: String,
    backoff_range_ms: (u64, u64),
    state: Arc<AtomicU8>,
    sink: Arc<dyn FrameSink>,
    mut rx: mpsc::Receiver<Frame>,
    sender_slot: Arc<StdMutex<mpsc::Sender<Frame>>>,
    queue_capacity: usize,
) {
    let mut backoff = backoff_range_ms.0;
    loop {
        state.store(ConnectionState::Connecting as u8, Ordering::Relaxed);
        let connect_result = TcpStream::connect((host.as_str(), port)).await;
        let mut stream = match connect_result {
            Ok(s) => s,
            Err(_) => {
                state.store(ConnectionState::Backoff as u8, Ordering::Relaxed);
                sleep_with_jitter(backoff).await;
                backoff = next_backoff(backoff, backoff_range_ms.1);
                continue;
            }
        };

        if codec::write_handshake(&mut stream, &local_id, &magic).await.is_err() {
            state.store(ConnectionState::Backoff as u8, Ordering::Relaxed);
            sleep_with_jitter(backoff).await;
            backoff = next_backoff(backoff, backoff_range_ms.1);
            continue;
        }
        let peer = match codec::read_handshake(&mut stream, &magic).await {
            Ok(p) => p,
            Err(_) => {
                state.store(ConnectionState::Backoff as u8, Ordering::Relaxed);
                sleep_with_jitter(backoff).await;
                backoff = next_backoff(backoff, backoff_range_ms.1);
                continue;
            }
        };

        state.store(ConnectionState::Up as u8, Ordering::Relaxed);
        backoff = backoff_range_ms.0;
        sink.on_peer_up(peer.clone());

        // `run_duplex` takes ownership of `rx` and, on return, drops it along
        // with any frame still queued in it. A fresh channel replaces it
        // below for the next attempt, so a frame queued during a session
        // that then breaks never resurfaces on a later, unrelated session.
        run_duplex(stream, peer, sink.clone(), rx).await;

        let (tx, new_rx) = mpsc::channel(queue_capacity);
        *sender_slot.lock().unwrap() = tx;
        rx = new_rx;

        state.store(ConnectionState::Backoff as u8, Ordering::Relaxed);
        sleep_with_jitter(backoff).await;
        backoff = next_backoff(backoff, backoff_range_ms.1);
    }
}
