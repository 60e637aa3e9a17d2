//! Wire codec: frame layout (length-prefix, tag, tag-specific body) and the
//! `Encodable` capability boundary for user payloads.
//!
//! The core treats a value's own serialization as an external collaborator's
//! concern; it only needs a (type-tag, bytes) pair it can carry opaquely.
//! [`Encodable`] is that capability; the blanket implementation over
//! `serde::Serialize + serde::de::DeserializeOwned` backed by `bincode` is
//! the one concrete instantiation this crate ships, not a requirement that
//! every caller use it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::MeridianError;
use crate::id::{NodeId, ProcessId};

/// A value's capability to serialize itself to `(type-tag, bytes)` and
/// reconstruct itself from them. The tag is chosen by the implementer's own
/// type system (here, `std::any::type_name`) and is opaque to the codec: the
/// codec only ever compares tags for equality, never interprets them.
pub trait Encodable: Send + 'static {
    fn type_tag() -> &'static str
    where
        Self: Sized;
    fn encode_self(&self) -> Result<Vec<u8>, MeridianError>;
    fn decode_self(bytes: &[u8]) -> Result<Self, MeridianError>
    where
        Self: Sized;
}

impl<T> Encodable for T
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn type_tag() -> &'static str {
        std::any::type_name::<T>()
    }

    fn encode_self(&self) -> Result<Vec<u8>, MeridianError> {
        bincode::serialize(self).map_err(|e| MeridianError::EncodeFailed(e.to_string()))
    }

    fn decode_self(bytes: &[u8]) -> Result<Self, MeridianError> {
        bincode::deserialize(bytes).map_err(|e| MeridianError::DecodeFailed(e.to_string()))
    }
}

/// One-byte frame tags, per the wire-frame layout in the external
/// interfaces section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameTag {
    UserToPid = 1,
    UserToPort = 2,
    SpawnRequest = 3,
    SpawnReply = 4,
    PeerAnnounce = 5,
    Ping = 6,
    Pong = 7,
}

impl FrameTag {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(FrameTag::UserToPid),
            2 => Some(FrameTag::UserToPort),
            3 => Some(FrameTag::SpawnRequest),
            4 => Some(FrameTag::SpawnReply),
            5 => Some(FrameTag::PeerAnnounce),
            6 => Some(FrameTag::Ping),
            7 => Some(FrameTag::Pong),
            _ => None,
        }
    }
}

/// Maximum frame body size accepted on the wire. A length prefix above this
/// is treated as `frame-corrupt` rather than an attempt to allocate an
/// unbounded buffer.
pub const MAX_FRAME_BODY: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserToPidBody {
    pid: ProcessId,
    type_tag: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserToPortBody {
    owner: NodeId,
    channel_index: u64,
    type_tag: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpawnRequestBody {
    request_id: u64,
    closure_name: String,
    arg_bytes: Vec<u8>,
    /// The ProcessId the reply should be addressed to isn't required: the
    /// reply travels back over the same connection and is matched by
    /// `request_id`.
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpawnReplyBody {
    request_id: u64,
    pid: Option<ProcessId>,
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PeerAnnounceBody {
    nodes: Vec<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HandshakeBody {
    node_id: NodeId,
    magic: String,
}

/// A decoded application frame.
#[derive(Debug, Clone)]
pub enum Frame {
    UserToPid {
        pid: ProcessId,
        type_tag: String,
        bytes: Vec<u8>,
    },
    UserToPort {
        owner: NodeId,
        channel_index: u64,
        type_tag: String,
        bytes: Vec<u8>,
    },
    SpawnRequest {
        request_id: u64,
        closure_name: String,
        arg_bytes: Vec<u8>,
    },
    SpawnReply {
        request_id: u64,
        result: Result<ProcessId, String>,
    },
    PeerAnnounce {
        nodes: Vec<NodeId>,
    },
    Ping,
    Pong,
}

fn body_of(frame: &Frame) -> Result<(FrameTag, Vec<u8>), MeridianError> {
    let ser = |v: &impl Serialize| {
        bincode::serialize(v).map_err(|e| MeridianError::EncodeFailed(e.to_string()))
    };
    Ok(match frame {
        Frame::UserToPid { pid, type_tag, bytes } => (
            FrameTag::UserToPid,
            ser(&UserToPidBody {
                pid: pid.clone(),
                type_tag: type_tag.clone(),
                bytes: bytes.clone(),
            })?,
        ),
        Frame::UserToPort { owner, channel_index, type_tag, bytes } => (
            FrameTag::UserToPort,
            ser(&UserToPortBody {
                owner: owner.clone(),
                channel_index: *channel_index,
                type_tag: type_tag.clone(),
                bytes: bytes.clone(),
            })?,
        ),
        Frame::SpawnRequest { request_id, closure_name, arg_bytes } => (
            FrameTag::SpawnRequest,
            ser(&SpawnRequestBody {
                request_id: *request_id,
                closure_name: closure_name.clone(),
                arg_bytes: arg_bytes.clone(),
            })?,
        ),
        Frame::SpawnReply { request_id, result } => (
            FrameTag::SpawnReply,
            ser(&SpawnReplyBody {
                request_id: *request_id,
                pid: result.as_ref().ok().cloned(),
                error: result.as_ref().err().cloned(),
            })?,
        ),
        Frame::PeerAnnounce { nodes } => (
            FrameTag::PeerAnnounce,
            ser(&PeerAnnounceBody { nodes: nodes.clone() })?,
        ),
        Frame::Ping => (FrameTag::Ping, Vec::new()),
        Frame::Pong => (FrameTag::Pong, Vec::new()),
    })
}

/// Encode a frame as `length-prefix | tag | body`, where `length` covers the
/// tag byte and the body.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, MeridianError> {
    let (tag, body) = body_of(frame)?;
    let len = (body.len() as u32) + 1;
    let mut out = Vec::with_capacity(4 + len as usize);
    out.extend_from_slice(&len.to_be_bytes());
    out.push(tag as u8);
    out.extend_from_slice(&body);
    Ok(out)
}

fn decode_body(tag: FrameTag, body: &[u8]) -> Result<Frame, MeridianError> {
    let de = |label: &str| {
        move |e: bincode::Error| {
            MeridianError::FrameCorrupt("<unresolved>".to_string(), format!("{label}: {e}"))
        }
    };
    Ok(match tag {
        FrameTag::UserToPid => {
            let b: UserToPidBody = bincode::deserialize(body).map_err(de("user-to-pid"))?;
            Frame::UserToPid { pid: b.pid, type_tag: b.type_tag, bytes: b.bytes }
        }
        FrameTag::UserToPort => {
            let b: UserToPortBody = bincode::deserialize(body).map_err(de("user-to-port"))?;
            Frame::UserToPort {
                owner: b.owner,
                channel_index: b.channel_index,
                type_tag: b.type_tag,
                bytes: b.bytes,
            }
        }
        FrameTag::SpawnRequest => {
            let b: SpawnRequestBody = bincode::deserialize(body).map_err(de("spawn-request"))?;
            Frame::SpawnRequest {
                request_id: b.request_id,
                closure_name: b.closure_name,
                arg_bytes: b.arg_bytes,
            }
        }
        FrameTag::SpawnReply => {
            let b: SpawnReplyBody = bincode::deserialize(body).map_err(de("spawn-reply"))?;
            let result = match (b.pid, b.error) {
                (Some(pid), _) => Ok(pid),
                (None, Some(err)) => Err(err),
                (None, None) => Err("spawn-reply missing both pid and error".to_string()),
            };
            Frame::SpawnReply { request_id: b.request_id, result }
        }
        FrameTag::PeerAnnounce => {
            let b: PeerAnnounceBody = bincode::deserialize(body).map_err(de("peer-announce"))?;
            Frame::PeerAnnounce { nodes: b.nodes }
        }
        FrameTag::Ping => Frame::Ping,
        FrameTag::Pong => Frame::Pong,
    })
}

/// Read one length-delimited frame from `reader`. Returns `Ok(None)` on a
/// clean EOF before any bytes of a new frame were read.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Frame>, MeridianError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(MeridianError::ConnectionFailed("<unresolved>".to_string(), e.to_string()))
        }
    }
    let len = u32::from_be_bytes(len_buf);
    if len == 0 || len > MAX_FRAME_BODY {
        return Err(MeridianError::FrameCorrupt(
            "<unresolved>".to_string(),
            format!("frame length {len} out of bounds"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| MeridianError::ConnectionFailed("<unresolved>".to_string(), e.to_string()))?;
    let tag = FrameTag::from_u8(buf[0]).ok_or_else(|| {
        MeridianError::FrameCorrupt("<unresolved>".to_string(), format!("unknown tag {}", buf[0]))
    })?;
    decode_body(tag, &buf[1..]).map(Some)
}

/// Write one frame to `writer` and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), MeridianError> {
    let bytes = encode_frame(frame)?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| MeridianError::ConnectionFailed("<unresolved>".to_string(), e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| MeridianError::ConnectionFailed("<unresolved>".to_string(), e.to_string()))
}

/// The handshake exchanged immediately after a TCP connection is
/// established, before any [`Frame`] traffic: each side sends its NodeId and
/// the shared magic token. A mismatched token closes the connection.
pub async fn write_handshake<W: AsyncWrite + Unpin>(
    writer: &mut W,
    node_id: &NodeId,
    magic: &str,
) -> Result<(), MeridianError> {
    let body = bincode::serialize(&HandshakeBody {
        node_id: node_id.clone(),
        magic: magic.to_string(),
    })
    .map_err(|e| MeridianError::EncodeFailed(e.to_string()))?;
    let len = body.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| MeridianError::ConnectionFailed(node_id.to_string(), e.to_string()))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| MeridianError::ConnectionFailed(node_id.to_string(), e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| MeridianError::ConnectionFailed(node_id.to_string(), e.to_string()))
}

/// Reads the peer's handshake and verifies the magic token. Returns the
/// peer's advertised NodeId on success.
pub async fn read_handshake<R: AsyncRead + Unpin>(
    reader: &mut R,
    expected_magic: &str,
) -> Result<NodeId, MeridianError> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| MeridianError::ConnectionFailed("<unresolved>".to_string(), e.to_string()))?;
    let len = u32::from_be_bytes(len_buf);
    if len == 0 || len > MAX_FRAME_BODY {
        return Err(MeridianError::FrameCorrupt(
            "<unresolved>".to_string(),
            format!("handshake length {len} out of bounds"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| MeridianError::ConnectionFailed("<unresolved>".to_string(), e.to_string()))?;
    let body: HandshakeBody = bincode::deserialize(&buf)
        .map_err(|e| MeridianError::FrameCorrupt("<unresolved>".to_string(), e.to_string()))?;
    if body.magic != expected_magic {
        return Err(MeridianError::ConnectionFailed(
            body.node_id.to_string(),
            "magic token mismatch".to_string(),
        ));
    }
    Ok(body.node_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodable_round_trips_primitive_types() {
        let bytes = 42i32.encode_self().unwrap();
        assert_eq!(i32::decode_self(&bytes).unwrap(), 42);
        assert_eq!(i32::type_tag(), "i32");

        let bytes = "hello".to_string().encode_self().unwrap();
        assert_eq!(String::decode_self(&bytes).unwrap(), "hello");
    }

    #[tokio::test]
    async fn frame_round_trips_through_an_in_memory_pipe() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let node = NodeId::new("h", 1, 1);
        let frame = Frame::UserToPid {
            pid: ProcessId::new(node, 3),
            type_tag: "i32".to_string(),
            bytes: 7i32.encode_self().unwrap(),
        };
        write_frame(&mut a, &frame).await.unwrap();
        let decoded = read_frame(&mut b).await.unwrap().expect("a frame");
        match decoded {
            Frame::UserToPid { bytes, .. } => assert_eq!(i32::decode_self(&bytes).unwrap(), 7),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn handshake_rejects_mismatched_magic() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let node = NodeId::new("h", 1, 1);
        write_handshake(&mut a, &node, "correct").await.unwrap();
        let result = read_handshake(&mut b, "different").await;
        assert!(result.is_err());
    }

    #[test]
    fn unknown_frame_tag_is_corrupt() {
        let mut bytes = 5u32.to_be_bytes().to_vec();
        bytes.push(99); // not a valid tag
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        // Simulate decode via a cursor-backed reader in an async context is
        // exercised in `frame_round_trips_through_an_in_memory_pipe`; here we
        // just check the tag table directly.
        assert!(FrameTag::from_u8(bytes[4]).is_none());
    }
}
