//! Result aggregation: the single consumer of task completions.
//!
//! Exactly one aggregator instance runs per run. It persists each successful
//! task's records to its own sink file before counting the task complete, so
//! a crash mid-run loses at most the task currently being written, then folds
//! the records into a run-wide deduplicated set for the combined export.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::dedup::DedupIndex;
use crate::events::{EventBus, Phase, RunEvent, Severity};
use crate::export::{combined_output_filename, persist, task_output_filename, ExportFormat};
use crate::pool::{PoolState, TaskCompletion, TaskStatus};
use crate::record::BusinessRecord;
use crate::task::{TaskId, TaskOutcome};

/// Point-in-time run progress, published through a watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub unique_records: usize,
}

impl Progress {
    pub fn terminal(&self) -> usize {
        self.completed + self.failed
    }

    pub fn is_finished(&self) -> bool {
        self.terminal() >= self.total
    }
}

/// Final accounting for one run.
#[derive(Debug)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total_unique_records: usize,
    pub records: Vec<BusinessRecord>,
    pub outcomes: HashMap<TaskId, TaskStatus>,
    /// Where the combined set landed, if persistence succeeded.
    pub combined_path: Option<PathBuf>,
}

/// Output sink settings for one run.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub directory: PathBuf,
    pub format: ExportFormat,
}

/// Consumes task completions until every submitted task has reached a
/// terminal state, maintaining the combined deduplicated record set.
pub struct ResultAggregator {
    sink: SinkConfig,
    events: EventBus,
    state: Arc<PoolState>,
    progress_tx: watch::Sender<Progress>,
    total_tasks: usize,
    index: DedupIndex,
    combined: Vec<BusinessRecord>,
    succeeded: usize,
    failed: usize,
}

impl ResultAggregator {
    pub fn new(
        sink: SinkConfig,
        events: EventBus,
        state: Arc<PoolState>,
        total_tasks: usize,
    ) -> (Self, watch::Receiver<Progress>) {
        let initial = Progress { total: total_tasks, ..Progress::default() };
        let (progress_tx, progress_rx) = watch::channel(initial);
        let aggregator = Self {
            sink,
            events,
            state,
            progress_tx,
            total_tasks,
            index: DedupIndex::new(),
            combined: Vec::new(),
            succeeded: 0,
            failed: 0,
        };
        (aggregator, progress_rx)
    }

    /// Drain the completion channel until every task is accounted for or all
    /// senders are gone, then write the combined export.
    pub async fn run(mut self, mut completions: mpsc::Receiver<TaskCompletion>) -> RunSummary {
        while self.succeeded + self.failed < self.total_tasks {
            match completions.recv().await {
                Some(completion) => self.absorb(completion),
                // All workers dropped their senders; whatever is accounted
                // for is the whole run.
                None => break,
            }
        }
        self.finalize()
    }

    fn absorb(&mut self, completion: TaskCompletion) {
        let task = &completion.task;
        match completion.outcome {
            TaskOutcome::Succeeded(records) => {
                if completion.empty_listing {
                    let mut event = RunEvent::new(
                        Phase::Aggregation,
                        Severity::Warn,
                        format!("no results found for '{}'", task.query),
                    );
                    event.worker_id = completion.worker_id;
                    event.task_id = Some(task.id);
                    self.events.emit(event);
                }
                self.persist_task(task.id, &task.query, &records);
                self.merge(records.clone());
                self.succeeded += 1;
                self.state.finish(task.id, TaskStatus::Succeeded { records: records.len() });
            }
            TaskOutcome::Failed(error) => {
                self.failed += 1;
                self.state.finish(task.id, TaskStatus::Failed { error: error.to_string() });
            }
        }
        self.publish_progress();
    }

    /// Per-task sink write. Failures degrade to a warning event; the records
    /// stay in the combined in-memory set either way.
    fn persist_task(&self, task_id: TaskId, query: &str, records: &[BusinessRecord]) {
        if records.is_empty() {
            return;
        }
        let filename = task_output_filename(query, task_id, self.sink.format);
        let path = self.sink.directory.join(filename);
        match persist(records, &path, self.sink.format) {
            Ok(written) => {
                info!(task = %task_id, path = %written.display(), "task results persisted");
            }
            Err(e) => {
                self.events.emit(RunEvent::new(
                    Phase::Aggregation,
                    Severity::Warn,
                    format!("failed to persist results for {}: {:#}", task_id, e),
                ));
            }
        }
    }

    /// Fold new records into the combined set, first occurrence wins.
    fn merge(&mut self, records: Vec<BusinessRecord>) {
        for record in records {
            if self.index.insert(&record) {
                self.combined.push(record);
            }
        }
    }

    fn publish_progress(&self) {
        let progress = Progress {
            total: self.total_tasks,
            completed: self.succeeded,
            failed: self.failed,
            unique_records: self.combined.len(),
        };
        let _ = self.progress_tx.send(progress);
    }

    fn finalize(mut self) -> RunSummary {
        // Deterministic combined output regardless of worker finish order.
        self.combined.sort_by(|a, b| a.name.cmp(&b.name));
        let combined_path = if self.combined.is_empty() {
            None
        } else {
            let filename = combined_output_filename(self.sink.format);
            let path = self.sink.directory.join(filename);
            match persist(&self.combined, &path, self.sink.format) {
                Ok(written) => {
                    info!(path = %written.display(), records = self.combined.len(),
                        "combined results persisted");
                    Some(written)
                }
                Err(e) => {
                    warn!(error = %format!("{:#}", e), "failed to persist combined results");
                    self.events.emit(RunEvent::new(
                        Phase::Aggregation,
                        Severity::Warn,
                        format!("failed to persist combined results: {:#}", e),
                    ));
                    None
                }
            }
        };

        self.events.emit(RunEvent::new(
            Phase::Run,
            Severity::Info,
            format!(
                "run finished: {} succeeded, {} failed, {} unique records",
                self.succeeded,
                self.failed,
                self.combined.len()
            ),
        ));

        RunSummary {
            succeeded: self.succeeded,
            failed: self.failed,
            total_unique_records: self.combined.len(),
            records: self.combined,
            outcomes: self.state.outcomes(),
            combined_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ExtractionError;
    use crate::task::QueryTask;
    use tempfile::TempDir;

    fn completion(id: u64, query: &str, outcome: TaskOutcome) -> TaskCompletion {
        TaskCompletion {
            worker_id: Some(0),
            task: QueryTask {
                id: TaskId(id),
                query: query.to_string(),
                max_results: 20,
                submitted_at: chrono::Utc::now(),
            },
            outcome,
            empty_listing: false,
        }
    }

    fn record(name: &str, query: &str) -> BusinessRecord {
        BusinessRecord::new(name, query)
    }

    fn sink(dir: &TempDir) -> SinkConfig {
        SinkConfig {
            directory: dir.path().to_path_buf(),
            format: ExportFormat::Json,
        }
    }

    #[tokio::test]
    async fn test_cross_task_dedup_first_wins() {
        let tmp = TempDir::new().unwrap();
        let state = Arc::new(PoolState::new());
        let (aggregator, _progress) =
            ResultAggregator::new(sink(&tmp), EventBus::new(16), state, 2);

        let (tx, rx) = mpsc::channel(4);
        tx.send(completion(
            1,
            "coffee a",
            TaskOutcome::Succeeded(vec![record("Cafe Uno", "coffee a")]),
        ))
        .await
        .unwrap();
        tx.send(completion(
            2,
            "coffee b",
            TaskOutcome::Succeeded(vec![
                record("Cafe Uno", "coffee b"),
                record("Cafe Dos", "coffee b"),
            ]),
        ))
        .await
        .unwrap();
        drop(tx);

        let summary = aggregator.run(rx).await;
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.total_unique_records, 2);
        // The first occurrence keeps its source query.
        let uno = summary.records.iter().find(|r| r.name == "Cafe Uno").unwrap();
        assert_eq!(uno.source_query, "coffee a");
    }

    #[tokio::test]
    async fn test_failed_task_counts_and_terminal_outcomes() {
        let tmp = TempDir::new().unwrap();
        let state = Arc::new(PoolState::new());
        let (aggregator, progress) =
            ResultAggregator::new(sink(&tmp), EventBus::new(16), state.clone(), 2);

        state.begin(TaskId(1));
        state.begin(TaskId(2));
        let (tx, rx) = mpsc::channel(4);
        tx.send(completion(
            1,
            "ok",
            TaskOutcome::Succeeded(vec![record("Spot", "ok")]),
        ))
        .await
        .unwrap();
        tx.send(completion(
            2,
            "bad",
            TaskOutcome::Failed(ExtractionError::cancelled("bad")),
        ))
        .await
        .unwrap();

        let summary = aggregator.run(rx).await;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.outcomes.len(), 2);
        assert!(matches!(
            summary.outcomes.get(&TaskId(2)),
            Some(TaskStatus::Failed { .. })
        ));
        assert_eq!(state.in_flight_len(), 0);
        assert!(progress.borrow().is_finished());
    }

    #[tokio::test]
    async fn test_per_task_sink_written_before_completion() {
        let tmp = TempDir::new().unwrap();
        let state = Arc::new(PoolState::new());
        let (aggregator, mut progress) =
            ResultAggregator::new(sink(&tmp), EventBus::new(16), state, 1);

        let (tx, rx) = mpsc::channel(1);
        tx.send(completion(
            7,
            "books",
            TaskOutcome::Succeeded(vec![record("Book Nook", "books")]),
        ))
        .await
        .unwrap();
        drop(tx);

        let summary = aggregator.run(rx).await;
        assert_eq!(summary.succeeded, 1);
        progress.changed().await.ok();

        // The task's own sink file exists and is readable back.
        let task_file = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().contains("task-7"))
            .unwrap();
        let parsed: Vec<BusinessRecord> =
            serde_json::from_str(&std::fs::read_to_string(task_file.path()).unwrap()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "Book Nook");
    }

    #[tokio::test]
    async fn test_empty_success_writes_no_task_file() {
        let tmp = TempDir::new().unwrap();
        let state = Arc::new(PoolState::new());
        let (aggregator, _progress) =
            ResultAggregator::new(sink(&tmp), EventBus::new(16), state, 1);

        let (tx, rx) = mpsc::channel(1);
        let mut c = completion(3, "nothing here", TaskOutcome::Succeeded(Vec::new()));
        c.empty_listing = true;
        tx.send(c).await.unwrap();
        drop(tx);

        let summary = aggregator.run(rx).await;
        assert_eq!(summary.succeeded, 1);
        assert!(summary.combined_path.is_none());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
