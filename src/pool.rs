//! Worker pool: N concurrent extraction workers over the shared task queue.
//!
//! Workers are independent; a fatal failure inside one session is caught at
//! the worker boundary, converted into a failed outcome for that task alone,
//! and the worker moves on. The pool never stops because one task failed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::browser::BrowserEngine;
use crate::events::{EventBus, Phase, RunEvent, Severity};
use crate::proxy::ProxyPool;
use crate::session::{ExtractionError, ExtractionSession, SessionConfig};
use crate::task::{QueryTask, TaskId, TaskOutcome, TaskQueue};

/// Worker-count bounds. Values outside are clamped, not rejected - this is
/// a resource-budget knob, not a correctness constraint.
pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 10;

pub fn clamp_workers(requested: usize) -> usize {
    requested.clamp(MIN_WORKERS, MAX_WORKERS)
}

/// Terminal status of one task as tracked by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded { records: usize },
    Failed { error: String },
}

#[derive(Debug, Default)]
struct PoolStateInner {
    in_flight: HashSet<TaskId>,
    completed: usize,
    failed: usize,
    outcomes: HashMap<TaskId, TaskStatus>,
}

/// Process-wide run accounting. Mutated only through these synchronized
/// operations; workers never touch each other's entries.
#[derive(Debug, Default)]
pub struct PoolState {
    inner: Mutex<PoolStateInner>,
}

impl PoolState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task entering execution. A task id may enter at most once.
    pub fn begin(&self, id: TaskId) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(
            !inner.outcomes.contains_key(&id),
            "task {} re-entered after reaching a terminal state",
            id
        );
        inner.in_flight.insert(id);
    }

    /// Record a terminal outcome. Called by the aggregator only after any
    /// per-task persistence has completed.
    pub fn finish(&self, id: TaskId, status: TaskStatus) {
        let mut inner = self.inner.lock().unwrap();
        inner.in_flight.remove(&id);
        match &status {
            TaskStatus::Succeeded { .. } => inner.completed += 1,
            TaskStatus::Failed { .. } => inner.failed += 1,
        }
        inner.outcomes.insert(id, status);
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner.lock().unwrap().in_flight.len()
    }

    pub fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.completed, inner.failed)
    }

    pub fn outcomes(&self) -> HashMap<TaskId, TaskStatus> {
        self.inner.lock().unwrap().outcomes.clone()
    }
}

/// What one worker hands to the aggregator when a task reaches a terminal
/// state. `worker_id` is absent for tasks cancelled straight off the queue.
#[derive(Debug)]
pub struct TaskCompletion {
    pub worker_id: Option<usize>,
    pub task: QueryTask,
    pub outcome: TaskOutcome,
    /// True when the session saw zero listings (successful empty result).
    pub empty_listing: bool,
}

/// Pool configuration, already validated upstream.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub num_workers: usize,
    pub session: SessionConfig,
    pub session_timeout: Duration,
    pub use_proxy: bool,
}

/// Running set of workers plus the shared structures they coordinate on.
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    state: Arc<PoolState>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `num_workers` (clamped) workers that drain the queue until it
    /// reports closed-and-empty, publishing completions to `completions`.
    pub fn spawn(
        config: PoolConfig,
        engine: Arc<dyn BrowserEngine>,
        queue: Arc<TaskQueue>,
        state: Arc<PoolState>,
        proxies: Arc<ProxyPool>,
        events: EventBus,
        completions: mpsc::Sender<TaskCompletion>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let num_workers = clamp_workers(config.num_workers);
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let worker = Worker {
                id: worker_id,
                engine: engine.clone(),
                queue: queue.clone(),
                state: state.clone(),
                events: events.clone(),
                completions: completions.clone(),
                cancel: cancel.clone(),
                config: config.clone(),
                proxies: proxies.clone(),
            };
            workers.push(tokio::spawn(worker.run()));
        }

        Self { queue, state, cancel, workers }
    }

    /// Whether any worker still holds an in-flight task or the backlog is
    /// non-empty.
    pub fn is_active(&self) -> bool {
        self.state.in_flight_len() > 0 || self.queue.pending_len() > 0
    }

    /// Stop the pool. Graceful: finish in-flight tasks, drain no further.
    /// Immediate: cancel outstanding sessions promptly; cancelled tasks are
    /// reported as failed, never as succeeded.
    ///
    /// Returns tasks that were still pending so the caller can account for
    /// them in the run summary.
    pub fn stop(&self, graceful: bool) -> Vec<QueryTask> {
        let drained = self.queue.drain_pending();
        if !graceful {
            self.cancel.cancel();
        }
        drained
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "worker task panicked");
            }
        }
    }
}

struct Worker {
    id: usize,
    engine: Arc<dyn BrowserEngine>,
    queue: Arc<TaskQueue>,
    state: Arc<PoolState>,
    events: EventBus,
    completions: mpsc::Sender<TaskCompletion>,
    cancel: CancellationToken,
    config: PoolConfig,
    proxies: Arc<ProxyPool>,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = self.id, "worker started");
        loop {
            let task = tokio::select! {
                _ = self.cancel.cancelled() => break,
                task = self.queue.dequeue() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            self.state.begin(task.id);
            self.events.emit(
                RunEvent::new(
                    Phase::Dequeue,
                    Severity::Info,
                    format!("extracting '{}'", task.query),
                )
                .for_task(self.id, task.id),
            );

            let (outcome, empty_listing) = self.execute(&task).await;
            match &outcome {
                TaskOutcome::Succeeded(records) => {
                    self.events.emit(
                        RunEvent::new(
                            Phase::Success,
                            Severity::Info,
                            format!("extracted {} records for '{}'", records.len(), task.query),
                        )
                        .for_task(self.id, task.id),
                    );
                }
                TaskOutcome::Failed(e) => {
                    self.events.emit(
                        RunEvent::new(Phase::Failure, Severity::Error, e.to_string())
                            .for_task(self.id, task.id),
                    );
                }
            }

            let completion = TaskCompletion {
                worker_id: Some(self.id),
                task,
                outcome,
                empty_listing,
            };
            if self.completions.send(completion).await.is_err() {
                // Aggregator is gone; nothing left to report to.
                break;
            }
        }
        debug!(worker_id = self.id, "worker stopped");
    }

    /// Run one session with the pool-level timeout and cancellation bound
    /// around it. Returns the outcome plus whether the listing was empty.
    async fn execute(&self, task: &QueryTask) -> (TaskOutcome, bool) {
        let mut session_config = self.config.session.clone();
        if self.config.use_proxy {
            session_config.proxy = self.proxies.next();
        }
        let mut session = ExtractionSession::new(self.engine.as_ref(), session_config);

        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                return (
                    TaskOutcome::Failed(ExtractionError::cancelled(&task.query)),
                    false,
                );
            }
            result = tokio::time::timeout(
                self.config.session_timeout,
                session.run(&task.query, task.max_results),
            ) => result,
        };

        match result {
            Ok(Ok(report)) => {
                if report.partial_entries > 0 {
                    self.events.emit(
                        RunEvent::new(
                            Phase::Session,
                            Severity::Warn,
                            format!(
                                "'{}': {} of {} listings extracted partially",
                                task.query, report.partial_entries, report.listing_total
                            ),
                        )
                        .for_task(self.id, task.id),
                    );
                }
                let empty = report.is_empty();
                (TaskOutcome::Succeeded(report.records), empty)
            }
            Ok(Err(e)) => (TaskOutcome::Failed(e), false),
            Err(_elapsed) => (
                TaskOutcome::Failed(ExtractionError::new(
                    crate::session::ExtractionErrorKind::NavigationTimeout,
                    &task.query,
                )),
                false,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_workers() {
        assert_eq!(clamp_workers(0), 1);
        assert_eq!(clamp_workers(3), 3);
        assert_eq!(clamp_workers(25), 10);
    }

    #[test]
    fn test_pool_state_accounting() {
        let state = PoolState::new();
        state.begin(TaskId(1));
        state.begin(TaskId(2));
        assert_eq!(state.in_flight_len(), 2);

        state.finish(TaskId(1), TaskStatus::Succeeded { records: 4 });
        state.finish(TaskId(2), TaskStatus::Failed { error: "timeout".into() });
        assert_eq!(state.in_flight_len(), 0);
        assert_eq!(state.counts(), (1, 1));

        let outcomes = state.outcomes();
        assert_eq!(outcomes.get(&TaskId(1)), Some(&TaskStatus::Succeeded { records: 4 }));
        assert!(matches!(outcomes.get(&TaskId(2)), Some(TaskStatus::Failed { .. })));
    }
}
