//! Query tasks and the shared FIFO backlog workers pull from.
//!
//! The queue is the only hand-off point between the caller and the worker
//! pool. Concurrent `dequeue` calls never deliver the same task twice, and
//! `close()` turns "closed and empty" into a normal termination signal
//! rather than an error.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;

use crate::record::BusinessRecord;
use crate::session::ExtractionError;

/// Process-unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// One query submitted for extraction. Immutable once enqueued.
#[derive(Debug, Clone)]
pub struct QueryTask {
    pub id: TaskId,
    pub query: String,
    pub max_results: usize,
    pub submitted_at: DateTime<Utc>,
}

/// Terminal result of one task.
#[derive(Debug)]
pub enum TaskOutcome {
    Succeeded(Vec<BusinessRecord>),
    Failed(ExtractionError),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded(_))
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn allocate_task_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Default)]
struct QueueInner {
    pending: VecDeque<QueryTask>,
    closed: bool,
}

/// Thread-safe FIFO backlog of pending tasks.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue one task per query string, in submission order.
    /// Queries enqueued after `close()` are ignored and return no ids.
    pub fn enqueue(&self, queries: &[String], max_results: usize) -> Vec<TaskId> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Vec::new();
        }
        let mut ids = Vec::with_capacity(queries.len());
        for query in queries {
            let task = QueryTask {
                id: allocate_task_id(),
                query: query.clone(),
                max_results,
                submitted_at: Utc::now(),
            };
            ids.push(task.id);
            inner.pending.push_back(task);
        }
        drop(inner);
        for _ in 0..ids.len() {
            self.notify.notify_one();
        }
        ids
    }

    /// Pull the next task, waiting until one is available. Returns `None`
    /// once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<QueryTask> {
        loop {
            // Register interest before checking state so an enqueue between
            // the check and the await cannot be missed.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(task) = inner.pending.pop_front() {
                    return Some(task);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark the queue closed. Outstanding `dequeue` calls return the
    /// closed sentinel once the backlog drains.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Close the queue and remove everything still pending, returning the
    /// removed tasks so the caller can account for them.
    pub fn drain_pending(&self) -> Vec<QueryTask> {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        let drained: Vec<QueryTask> = inner.pending.drain(..).collect();
        drop(inner);
        self.notify.notify_waiters();
        drained
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}
