//! Bounded multi-producer event channel shared by all workers.
//!
//! Every component publishes structured run events here instead of holding a
//! reference to whatever is displaying them (terminal, file log, GUI). The
//! channel is a bounded tokio broadcast: producers never block, and a
//! consumer that falls behind loses the oldest unread events rather than
//! throttling scraping throughput.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::task::TaskId;

/// Default ring-buffer capacity for unread events.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Coarse lifecycle phase an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Dequeue,
    Session,
    Success,
    Failure,
    Aggregation,
    Run,
}

/// One structured log/status event.
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub timestamp: DateTime<Utc>,
    pub worker_id: Option<usize>,
    pub task_id: Option<TaskId>,
    pub phase: Phase,
    pub severity: Severity,
    pub message: String,
}

impl RunEvent {
    pub fn new(phase: Phase, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            worker_id: None,
            task_id: None,
            phase,
            severity,
            message: message.into(),
        }
    }

    pub fn for_task(mut self, worker_id: usize, task_id: TaskId) -> Self {
        self.worker_id = Some(worker_id);
        self.task_id = Some(task_id);
        self
    }
}

/// Handle for publishing and subscribing to run events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Never blocks; a send with no live subscribers is
    /// simply dropped.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
