//! Typed channels: a location-transparent `SendPort<T>`/`ReceivePort<T>`
//! pair, independent of any process's mailbox.
//!
//! A `SendPort<T>` is `Serialize` and may be carried inside any message
//! (including across the wire and inside a remote [`crate::closure::Closure`]
//! argument); a `ReceivePort<T>` is not, since it is not `Serialize` at all,
//! so an attempt to carry one off its owning node fails to compile rather
//! than at runtime.

use std::any::Any;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::Notify;
use tokio::time::timeout as tokio_timeout;

use crate::codec::Encodable;
use crate::error::MeridianError;
use crate::id::NodeId;

/// Type-erased receiver side of a channel, as stored in a [`ChannelTable`].
/// `push_encoded` is the remote-delivery path: bytes that arrived over the
/// wire, decoded against this channel's own `T`. The local fast path
/// downcasts to [`TypedChannel<T>`] instead and never touches the codec.
pub trait ChannelSink: Send + Sync {
    fn type_tag(&self) -> &'static str;
    fn push_encoded(&self, bytes: &[u8]) -> Result<(), MeridianError>;
    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct TypedChannel<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> TypedChannel<T> {
    fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }

    pub(crate) fn push(&self, value: T) {
        self.queue.lock().unwrap().push_back(value);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<T> {
        self.queue.lock().unwrap().pop_front()
    }
}

impl<T: Encodable> ChannelSink for TypedChannel<T> {
    fn type_tag(&self) -> &'static str {
        T::type_tag()
    }

    fn push_encoded(&self, bytes: &[u8]) -> Result<(), MeridianError> {
        self.push(T::decode_self(bytes)?);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The serializable, location-transparent write end of a channel. Carries
/// only its owning node, an index, and the type tag it was created with;
/// deserializing checks the tag matches the caller's expected `T` so a
/// mismatched-type port is rejected at decode time rather than silently
/// misrouted.
pub struct SendPort<T> {
    pub(crate) owner: NodeId,
    pub(crate) channel_index: u64,
    pub(crate) type_tag: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SendPort<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            channel_index: self.channel_index,
            type_tag: self.type_tag.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for SendPort<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendPort")
            .field("owner", &self.owner)
            .field("channel_index", &self.channel_index)
            .field("type_tag", &self.type_tag)
            .finish()
    }
}

impl<T> Serialize for SendPort<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.owner, self.channel_index, &self.type_tag).serialize(serializer)
    }
}

impl<'de, T: Encodable> Deserialize<'de> for SendPort<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (owner, channel_index, type_tag): (NodeId, u64, String) =
            Deserialize::deserialize(deserializer)?;
        if type_tag != T::type_tag() {
            return Err(D::Error::custom(format!(
                "send port type mismatch: expected `{}`, found `{}`",
                T::type_tag(),
                type_tag
            )));
        }
        Ok(SendPort { owner, channel_index, type_tag, _marker: PhantomData })
    }
}

/// The non-serializable read end of a channel. Holds a direct reference to
/// its backing queue; never crosses a node boundary.
pub struct ReceivePort<T> {
    channel: Arc<TypedChannel<T>>,
}

impl<T: Encodable> ReceivePort<T> {
    /// Suspend until a value is available, then return it.
    pub async fn receive(&self) -> T {
        loop {
            if let Some(v) = self.channel.try_pop() {
                return v;
            }
            self.channel.notify.notified().await;
        }
    }

    /// As [`receive`](Self::receive), bounded by `duration`.
    pub async fn receive_timeout(&self, duration: Duration) -> Result<T, MeridianError> {
        tokio_timeout(duration, self.receive()).await.map_err(|_| MeridianError::ReceiveTimeout)
    }

    pub fn try_receive(&self) -> Option<T> {
        self.channel.try_pop()
    }
}

/// Process-wide table of live channels, keyed by an index local to this
/// node. Mirrors [`crate::process::ProcessTable`]'s shape: an atomic
/// counter plus a concurrent map, shared behind an `Arc` by the node.
pub struct ChannelTable {
    node: NodeId,
    next_index: AtomicU64,
    entries: DashMap<u64, Arc<dyn ChannelSink>>,
}

impl ChannelTable {
    pub fn new(node: NodeId) -> Self {
        Self { node, next_index: AtomicU64::new(0), entries: DashMap::new() }
    }

    /// Create a fresh channel owned by this node, returning its two ends.
    pub fn new_channel<T: Encodable>(&self) -> (SendPort<T>, ReceivePort<T>) {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let channel = Arc::new(TypedChannel::<T>::new());
        self.entries.insert(index, channel.clone() as Arc<dyn ChannelSink>);
        let send = SendPort {
            owner: self.node.clone(),
            channel_index: index,
            type_tag: T::type_tag().to_string(),
            _marker: PhantomData,
        };
        let receive = ReceivePort { channel };
        (send, receive)
    }

    pub fn sink_of(&self, index: u64) -> Option<Arc<dyn ChannelSink>> {
        self.entries.get(&index).map(|e| e.clone())
    }

    pub fn owner(&self) -> &NodeId {
        &self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_sent_value_is_received_in_order() {
        let table = ChannelTable::new(NodeId::new("h", 1, 0));
        let (send, recv) = table.new_channel::<i32>();
        let sink = table.sink_of(send.channel_index).unwrap();
        sink.as_any().downcast_ref::<TypedChannel<i32>>().unwrap().push(1);
        sink.as_any().downcast_ref::<TypedChannel<i32>>().unwrap().push(2);
        assert_eq!(recv.receive().await, 1);
        assert_eq!(recv.receive().await, 2);
    }

    #[tokio::test]
    async fn receive_times_out_on_an_empty_channel() {
        let table = ChannelTable::new(NodeId::new("h", 1, 0));
        let (_send, recv) = table.new_channel::<i32>();
        let result = recv.receive_timeout(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(MeridianError::ReceiveTimeout)));
    }

    #[test]
    fn deserializing_a_send_port_rejects_a_mismatched_type_tag() {
        let table = ChannelTable::new(NodeId::new("h", 1, 0));
        let (send, _recv) = table.new_channel::<i32>();
        let bytes = bincode::serialize(&send).unwrap();
        let result: Result<SendPort<String>, _> = bincode::deserialize(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn deserializing_a_send_port_with_a_matching_tag_succeeds() {
        let table = ChannelTable::new(NodeId::new("h", 1, 0));
        let (send, _recv) = table.new_channel::<i32>();
        let bytes = bincode::serialize(&send).unwrap();
        let result: Result<SendPort<i32>, _> = bincode::deserialize(&bytes);
        assert!(result.is_ok());
    }
}
