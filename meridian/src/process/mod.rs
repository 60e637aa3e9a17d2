//! Process table, scheduler, and the context handed to every process body.

pub mod mailbox;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::channel::SendPort;
use crate::closure::Closure;
use crate::codec::Encodable;
use crate::error::MeridianError;
use crate::id::{NodeId, ProcessId};
use crate::node::NodeInner;
use meridian_common::logging::{Component, Logger};

pub use mailbox::Mailbox;

/// Current lifecycle state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Waiting,
    Terminated,
}

/// Sent to every linked/monitoring observer when a process terminates,
/// whether by normal completion or an uncaught panic in its body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationNotice {
    pub pid: ProcessId,
    pub reason: Option<String>,
}

struct ProcessEntry {
    mailbox: Arc<Mailbox>,
    status: StdMutex<ProcessStatus>,
    observers: StdMutex<Vec<ProcessId>>,
    abort: StdMutex<Option<tokio::task::AbortHandle>>,
}

/// How long a terminated process's entry is kept around (discarding
/// late-arriving messages) before it is removed from the table entirely.
const TERMINATION_GRACE: Duration = Duration::from_millis(500);

/// Allocates local indexes, owns every live process's mailbox, and records
/// link/monitor observers. Shared behind an `Arc` by the whole node.
pub struct ProcessTable {
    node: NodeId,
    next_index: AtomicU64,
    entries: DashMap<ProcessId, Arc<ProcessEntry>>,
}

impl ProcessTable {
    pub fn new(node: NodeId) -> Self {
        Self { node, next_index: AtomicU64::new(0), entries: DashMap::new() }
    }

    fn allocate(&self) -> ProcessId {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        ProcessId::new(self.node.clone(), index)
    }

    fn register(&self, pid: ProcessId) -> Arc<Mailbox> {
        let mailbox = Arc::new(Mailbox::new());
        let entry = Arc::new(ProcessEntry {
            mailbox: mailbox.clone(),
            status: StdMutex::new(ProcessStatus::Running),
            observers: StdMutex::new(Vec::new()),
            abort: StdMutex::new(None),
        });
        self.entries.insert(pid, entry);
        mailbox
    }

    pub(crate) fn set_abort_handle(&self, pid: &ProcessId, handle: tokio::task::AbortHandle) {
        if let Some(entry) = self.entries.get(pid) {
            *entry.abort.lock().unwrap() = Some(handle);
        }
    }

    /// Cancel every process that hasn't terminated yet. Used on node
    /// shutdown; does not wait for cancellation to take effect.
    pub fn abort_all(&self) {
        for entry in self.entries.iter() {
            let mut status = entry.status.lock().unwrap();
            if *status != ProcessStatus::Terminated {
                if let Some(abort) = entry.abort.lock().unwrap().as_ref() {
                    abort.abort();
                }
                *status = ProcessStatus::Terminated;
            }
        }
    }

    pub fn mailbox_of(&self, pid: &ProcessId) -> Option<Arc<Mailbox>> {
        self.entries.get(pid).map(|e| e.mailbox.clone())
    }

    pub fn is_live(&self, pid: &ProcessId) -> bool {
        self.entries
            .get(pid)
            .map(|e| *e.status.lock().unwrap() != ProcessStatus::Terminated)
            .unwrap_or(false)
    }

    pub fn link(&self, watcher: &ProcessId, subject: ProcessId) {
        if let Some(entry) = self.entries.get(&subject) {
            entry.observers.lock().unwrap().push(watcher.clone());
        }
    }

    fn observers_of(&self, pid: &ProcessId) -> Vec<ProcessId> {
        self.entries
            .get(pid)
            .map(|e| e.observers.lock().unwrap().clone())
            .unwrap_or_default()
    }

    fn mark_terminated(&self, pid: &ProcessId) {
        if let Some(entry) = self.entries.get(pid) {
            *entry.status.lock().unwrap() = ProcessStatus::Terminated;
        }
    }

    fn remove_after_grace(&self, pid: ProcessId) {
        let entries = self.entries_handle();
        tokio::spawn(async move {
            tokio::time::sleep(TERMINATION_GRACE).await;
            entries.remove(&pid);
        });
    }

    // DashMap doesn't implement Clone directly for a owned reference to
    // `self`, so processes that outlive a grace window are cleaned up
    // through an Arc<ProcessTable> the node holds; see `NodeInner::spawn_local`.
    fn entries_handle(&self) -> &DashMap<ProcessId, Arc<ProcessEntry>> {
        &self.entries
    }

    pub fn live_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| *e.status.lock().unwrap() != ProcessStatus::Terminated)
            .count()
    }
}

/// The context every process body runs with: its own identity and mailbox,
/// plus the shared node operations (send, spawn, logging) it needs. Passed
/// explicitly rather than reached for through thread-local/ambient state.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: ProcessId,
    mailbox: Arc<Mailbox>,
    node: Arc<NodeInner>,
    logger: Logger,
}

impl ProcessHandle {
    pub(crate) fn new(pid: ProcessId, mailbox: Arc<Mailbox>, node: Arc<NodeInner>) -> Self {
        let logger = Logger::with_context(Component::Process, pid.to_string());
        Self { pid, mailbox, node, logger }
    }

    pub fn pid(&self) -> &ProcessId {
        &self.pid
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Location-independent send: local delivery if `pid` is owned by this
    /// node, otherwise framed and enqueued on the owning peer's connection.
    pub async fn send<T: Encodable>(&self, pid: ProcessId, value: T) -> Result<(), MeridianError> {
        self.node.send(pid, value).await
    }

    /// Spawn a new local process sharing this node's address space.
    pub fn spawn_local<F, Fut>(&self, body: F) -> ProcessId
    where
        F: FnOnce(ProcessHandle) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.node.spawn_local(body)
    }

    /// Spawn a registered closure on a remote node.
    pub async fn spawn(&self, node: NodeId, closure: Closure) -> Result<ProcessId, MeridianError> {
        self.node.spawn_remote(node, closure).await
    }

    /// Send a value down a channel's write end, local or remote.
    pub async fn send_to_port<T: Encodable>(
        &self,
        port: &SendPort<T>,
        value: T,
    ) -> Result<(), MeridianError> {
        self.node.send_to_port(port, value).await
    }

    /// Register interest in `subject`'s termination; a `TerminationNotice`
    /// is delivered to this process's mailbox when it terminates.
    pub fn link(&self, subject: ProcessId) {
        self.node.processes.link(&self.pid, subject);
    }

    pub fn monitor(&self, subject: ProcessId) {
        self.link(subject);
    }
}

/// Run `body`, notifying observers of normal completion or panic, then
/// scheduling the entry's removal after the grace window.
pub(crate) fn spawn_body<F, Fut>(
    pid: ProcessId,
    mailbox: Arc<Mailbox>,
    node: Arc<NodeInner>,
    body: F,
) where
    F: FnOnce(ProcessHandle) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = ProcessHandle::new(pid.clone(), mailbox, node.clone());
    let pid_for_notice = handle.pid.clone();
    let body_task = tokio::spawn(body(handle));
    node.processes.set_abort_handle(&pid_for_notice, body_task.abort_handle());
    tokio::spawn(async move {
        let result = body_task.await;
        let reason = match result {
            Ok(()) => None,
            Err(join_err) if join_err.is_cancelled() => Some("cancelled".to_string()),
            Err(join_err) => Some(join_err.to_string()),
        };
        node.processes.mark_terminated(&pid_for_notice);
        let observers = node.processes.observers_of(&pid_for_notice);
        for observer in observers {
            let _ = node
                .send(observer, TerminationNotice { pid: pid_for_notice.clone(), reason: reason.clone() })
                .await;
        }
        node.processes.remove_after_grace(pid_for_notice);
    });
}

pub(crate) fn allocate_and_register(table: &ProcessTable) -> (ProcessId, Arc<Mailbox>) {
    let pid = table.allocate();
    let mailbox = table.register(pid.clone());
    (pid, mailbox)
}
