//! Runtime error kinds.
//!
//! One enum, one variant per failure family named in the error-handling
//! design: configuration/bootstrap failures are fatal to the caller,
//! connection/frame failures are recovered internally and only surface as a
//! delivery loss or a `spawn`/`receive` error, and codec failures are raised
//! synchronously at the call site that triggered them.

use thiserror::Error;

use crate::id::NodeId;

#[derive(Debug, Error)]
pub enum MeridianError {
    #[error("config-invalid: {0}")]
    ConfigInvalid(String),

    #[error("bind-failed: {0}")]
    BindFailed(String),

    #[error("connection-failed to {0}: {1}")]
    ConnectionFailed(String, String),

    #[error("frame-corrupt on connection to {0}: {1}")]
    FrameCorrupt(String, String),

    #[error("unknown-closure: `{0}`")]
    UnknownClosure(String),

    #[error("encode-failed: {0}")]
    EncodeFailed(String),

    #[error("decode-failed: {0}")]
    DecodeFailed(String),

    #[error("receive-timeout")]
    ReceiveTimeout,

    #[error("remote-spawn-failed on {0}: {1}")]
    RemoteSpawnFailed(NodeId, String),
}

pub type Result<T> = std::result::Result<T, MeridianError>;
