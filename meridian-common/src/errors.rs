//! Error utilities shared across the workspace.
//!
//! Components that can only fail for bootstrap/configuration reasons bubble
//! errors up with `anyhow`; components with a small closed set of recoverable
//! failure modes define their own `thiserror` enum instead (see
//! `meridian::error`).

pub use anyhow::{anyhow, Result};
pub use thiserror::Error;
