//! Shared, runtime-agnostic utilities used across the `meridian` workspace:
//! logging, configuration parsing, and error re-exports.

pub mod config;
pub mod errors;
pub mod logging;

pub use errors::{anyhow, Result};
pub use logging::{Component, Logger, LoggingContext};
