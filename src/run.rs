//! Run orchestration: wires the queue, worker pool, and aggregator together
//! and hands the caller one handle for progress, events, stop, and the final
//! summary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::aggregator::{Progress, ResultAggregator, RunSummary, SinkConfig};
use crate::browser::BrowserEngine;
use crate::events::{EventBus, Phase, RunEvent, Severity, DEFAULT_EVENT_CAPACITY};
use crate::pool::{clamp_workers, PoolConfig, PoolState, TaskCompletion, WorkerPool};
use crate::proxy::ProxyPool;
use crate::session::{ExtractionError, SessionConfig};
use crate::task::{TaskId, TaskOutcome, TaskQueue};

/// Everything a run needs beyond the queries themselves.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub num_workers: usize,
    pub max_results_per_task: usize,
    pub session_timeout: Duration,
    pub session: SessionConfig,
    pub use_proxy: bool,
    pub sink: SinkConfig,
}

/// Live handle to a running extraction run.
pub struct RunHandle {
    pool: WorkerPool,
    queue: Arc<TaskQueue>,
    events: EventBus,
    progress_rx: watch::Receiver<Progress>,
    completions: mpsc::Sender<TaskCompletion>,
    summary: JoinHandle<RunSummary>,
    pub task_ids: Vec<TaskId>,
}

/// Detached stop control, cheap to clone into signal handlers.
#[derive(Clone)]
pub struct RunStopper {
    queue: Arc<TaskQueue>,
    cancel: tokio_util::sync::CancellationToken,
    completions: mpsc::Sender<TaskCompletion>,
    events: EventBus,
}

impl RunStopper {
    /// Stop the run. Graceful lets in-flight tasks finish; immediate cancels
    /// them. Either way, tasks still pending are reported as failed with a
    /// cancellation error so every submitted task reaches a terminal state.
    pub async fn stop(&self, graceful: bool) {
        let drained = self.queue.drain_pending();
        if !graceful {
            self.cancel.cancel();
        }
        info!(
            drained = drained.len(),
            graceful, "stop requested, draining backlog"
        );
        for task in drained {
            let mut event = RunEvent::new(
                Phase::Failure,
                Severity::Warn,
                format!("'{}' cancelled before a worker picked it up", task.query),
            );
            event.task_id = Some(task.id);
            self.events.emit(event);

            let completion = TaskCompletion {
                worker_id: None,
                outcome: TaskOutcome::Failed(ExtractionError::cancelled(&task.query)),
                task,
                empty_listing: false,
            };
            if self.completions.send(completion).await.is_err() {
                break;
            }
        }
    }
}

impl RunHandle {
    /// Subscribe to the structured event stream. Late subscribers only see
    /// events emitted after they subscribe.
    pub fn events(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Watch run progress. The receiver always holds the latest snapshot.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress_rx.clone()
    }

    /// Whether any task is still pending or in flight.
    pub fn is_active(&self) -> bool {
        self.pool.is_active()
    }

    /// Detached stop control that survives `wait()` consuming the handle.
    pub fn stopper(&self) -> RunStopper {
        RunStopper {
            queue: self.queue.clone(),
            cancel: self.pool.cancel_token(),
            completions: self.completions.clone(),
            events: self.events.clone(),
        }
    }

    /// Stop the run; see [`RunStopper::stop`].
    pub async fn stop(&self, graceful: bool) {
        self.stopper().stop(graceful).await;
    }

    /// Wait for the run to finish and return the final summary.
    pub async fn wait(self) -> Result<RunSummary> {
        let RunHandle { pool, completions, summary, .. } = self;
        pool.join().await;
        drop(completions);
        Ok(summary.await?)
    }
}

/// Submit `queries` and start extracting. All tasks are enqueued up front;
/// the queue closes immediately so workers exit once the backlog drains.
pub fn start_run(
    queries: Vec<String>,
    options: RunOptions,
    engine: Arc<dyn BrowserEngine>,
    proxies: ProxyPool,
) -> Result<RunHandle> {
    if queries.is_empty() {
        bail!("no queries submitted");
    }
    if options.max_results_per_task == 0 {
        bail!("max_results_per_task must be at least 1");
    }
    if options.use_proxy && proxies.is_empty() {
        bail!("proxy use enabled but the proxy list is empty");
    }

    let events = EventBus::new(DEFAULT_EVENT_CAPACITY);
    let queue = Arc::new(TaskQueue::new());
    let state = Arc::new(PoolState::new());

    let task_ids = queue.enqueue(&queries, options.max_results_per_task);
    queue.close();
    events.emit(RunEvent::new(
        Phase::Run,
        Severity::Info,
        format!(
            "run started: {} tasks, {} workers",
            task_ids.len(),
            clamp_workers(options.num_workers)
        ),
    ));

    let (completions_tx, completions_rx) = mpsc::channel(task_ids.len().max(1));
    let (aggregator, progress_rx) =
        ResultAggregator::new(options.sink.clone(), events.clone(), state.clone(), task_ids.len());
    let summary = tokio::spawn(aggregator.run(completions_rx));

    let pool_config = PoolConfig {
        num_workers: options.num_workers,
        session: options.session.clone(),
        session_timeout: options.session_timeout,
        use_proxy: options.use_proxy,
    };
    let pool = WorkerPool::spawn(
        pool_config,
        engine,
        queue.clone(),
        state,
        Arc::new(proxies),
        events.clone(),
        completions_tx.clone(),
    );

    Ok(RunHandle {
        pool,
        queue,
        events,
        progress_rx,
        completions: completions_tx,
        summary,
        task_ids,
    })
}
