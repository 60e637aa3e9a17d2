//! Structured logging context threaded through the runtime.
//!
//! Every long-lived runtime object (a node, a connection, a process) carries
//! a [`Logger`] tagged with the [`Component`] it belongs to and, usually, the
//! textual identifier of the thing it is logging on behalf of. This mirrors
//! how request/event handlers are expected to log in terms of "who" and
//! "where" rather than bare messages.

use std::fmt;

/// Which subsystem a log line originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Node,
    Transport,
    Peer,
    Process,
    Mailbox,
    Channel,
    Closure,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Component::Node => "node",
            Component::Transport => "transport",
            Component::Peer => "peer",
            Component::Process => "process",
            Component::Mailbox => "mailbox",
            Component::Channel => "channel",
            Component::Closure => "closure",
        };
        f.write_str(s)
    }
}

/// A cheap-to-clone logging handle carrying component and context tags.
#[derive(Debug, Clone)]
pub struct Logger {
    component: Component,
    context: Option<String>,
}

impl Logger {
    /// Create a logger with no context, e.g. at node startup before a NodeId
    /// has been allocated.
    pub fn new_root(component: Component) -> Self {
        Self {
            component,
            context: None,
        }
    }

    /// Create a logger already tagged with a context string (a NodeId's or
    /// ProcessId's textual form, typically).
    pub fn with_context(component: Component, context: impl Into<String>) -> Self {
        Self {
            component,
            context: Some(context.into()),
        }
    }

    /// Derive a child logger for the same component with a new context.
    pub fn tagged(&self, context: impl Into<String>) -> Self {
        Self {
            component: self.component,
            context: Some(context.into()),
        }
    }

    pub fn component(&self) -> Component {
        self.component
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(log::Level::Debug, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(log::Level::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(log::Level::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(log::Level::Error, message.into());
    }

    fn emit(&self, level: log::Level, message: String) {
        match &self.context {
            Some(ctx) => log::log!(level, "[{}][{ctx}] {message}", self.component),
            None => log::log!(level, "[{}] {message}", self.component),
        }
    }
}

/// Implemented by types that carry a [`Logger`] and can describe their own
/// place in the runtime for diagnostic purposes.
pub trait LoggingContext {
    fn component(&self) -> Component;

    /// A human-readable path identifying this context, e.g. a ProcessId's
    /// textual form. `None` when no identity has been allocated yet.
    fn context_path(&self) -> Option<&str> {
        None
    }

    fn logger(&self) -> &Logger;
}

/// Install the process-wide log sink. Safe to call more than once (e.g. from
/// multiple tests running in the same binary); later calls are no-ops.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(cfg!(test))
        .try_init();
}
