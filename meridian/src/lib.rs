//! Erlang-style message-passing concurrency across a cluster of cooperating
//! runtime instances.
//!
//! A [`node::Node`] bootstraps identity, transport, and peer discovery; user
//! code spawns lightweight [`process`]es locally or remotely (via a
//! [`closure::Closure`]), addresses them by stable [`id::ProcessId`]s,
//! exchanges typed messages through selective-receive [`process::mailbox`]es
//! or [`channel`]s, and lets the runtime worry about whether the other end
//! is in this address space or across the network.
//!
//! ```no_run
//! use meridian::config::NodeConfig;
//! use meridian::node::Node;
//!
//! # async fn run() -> Result<(), meridian::MeridianError> {
//! let node = Node::start(NodeConfig::new("", "localhost")).await?;
//! let pid = node.spawn_local(|ctx| async move {
//!     ctx.receive()
//!         .with::<String, _, _>(|greeting| async move {
//!             println!("got: {greeting}");
//!         })
//!         .run()
//!         .await
//!         .unwrap();
//! });
//! node.run().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod closure;
pub mod codec;
pub mod config;
pub mod error;
pub mod id;
pub mod node;
pub mod peer;
pub mod process;
pub mod role;
pub mod transport;

pub use closure::Closure;
pub use codec::Encodable;
pub use config::NodeConfig;
pub use error::{MeridianError, Result};
pub use id::{NodeId, ProcessId};
pub use node::Node;
pub use process::ProcessHandle;

/// Re-exported so `#[meridian_macros::closure(..)]`-expanded code can name
/// `::meridian::inventory::submit!` without every crate that uses the macro
/// taking its own direct dependency on `inventory`.
pub use inventory;
