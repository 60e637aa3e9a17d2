//! The closure registry: a process-wide mapping from a stable symbolic name
//! to an invocable body, populated at node start and frozen thereafter.
//!
//! A [`Closure`] that crosses the wire carries only a name and encoded
//! argument bytes, never a captured environment, so the receiving node
//! must already have a body registered under that name.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::MeridianError;
use crate::process::ProcessHandle;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A serializable reference to a named top-level activity plus its encoded
/// arguments. Closures may not capture mutable state from the spawning
/// process: only the name and the encoded bytes cross the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Closure {
    pub name: String,
    pub arg_bytes: Vec<u8>,
}

impl Closure {
    pub fn new(name: impl Into<String>, arg_bytes: Vec<u8>) -> Self {
        Self { name: name.into(), arg_bytes }
    }
}

/// A single `#[meridian_macros::closure("name")]`-registered body. Entries
/// are collected at static-init time via `inventory` and frozen into a
/// lookup table the first time a [`ClosureRegistry`] is built.
pub struct ClosureEntry {
    pub name: &'static str,
    pub body: fn(ProcessHandle, Vec<u8>) -> BoxFuture<'static, ()>,
}

inventory::collect!(ClosureEntry);

/// Process-wide closure registry. Built once at node startup from every
/// statically registered [`ClosureEntry`]; immutable afterwards.
pub struct ClosureRegistry {
    entries: std::collections::HashMap<String, fn(ProcessHandle, Vec<u8>) -> BoxFuture<'static, ()>>,
}

impl ClosureRegistry {
    /// Collects every `#[closure(..)]`-registered body, then freezes the
    /// result.
    pub fn from_registered() -> Self {
        let mut entries = std::collections::HashMap::new();
        for entry in inventory::iter::<ClosureEntry> {
            entries.insert(entry.name.to_string(), entry.body);
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<fn(ProcessHandle, Vec<u8>) -> BoxFuture<'static, ()>> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub async fn invoke(&self, name: &str, ctx: ProcessHandle, arg_bytes: Vec<u8>) -> Result<(), MeridianError> {
        match self.get(name) {
            Some(body) => {
                body(ctx, arg_bytes).await;
                Ok(())
            }
            None => Err(MeridianError::UnknownClosure(name.to_string())),
        }
    }
}
