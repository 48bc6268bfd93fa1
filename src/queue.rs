//! Bounded-concurrency task queue with fail-fast cancellation.

use crate::error::MigrationError;
use crate::model::{MigrationOutcome, MigrationTask, RunReport};
use crate::progress::RunProgress;
use async_trait::async_trait;
use futures::FutureExt;
use indicatif::ProgressBar;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio::task;
use tracing::{debug, error, warn};

/// Processes a single task. Failures are reported through the outcome, never by panicking.
#[async_trait]
pub trait TaskWorker: Send + Sync {
    async fn process(&self, task: MigrationTask) -> MigrationOutcome;
}

/// Counts outcomes and raises the cancellation flag on the first failure.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    cancelled: AtomicBool,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    created: AtomicUsize,
    updated: AtomicUsize,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn record(&self, outcome: &MigrationOutcome) {
        match &outcome.result {
            Ok(()) => {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
                match &outcome.record {
                    Some(record) if record.created => {
                        self.created.fetch_add(1, Ordering::SeqCst);
                    }
                    Some(_) => {
                        self.updated.fetch_add(1, Ordering::SeqCst);
                    }
                    None => {}
                }
            }
            Err(err) => self.record_failure(&outcome.task.source.key, err),
        }
    }

    fn record_failure(&self, key: &str, err: &MigrationError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        error!(key, error = %err, "Error while processing {key}");
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            warn!("Cancelling remaining tasks");
        }
    }

    fn report(&self, total_tasks: usize, cancelled: usize) -> RunReport {
        let failed = self.failed.load(Ordering::SeqCst);
        RunReport {
            total_tasks,
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed,
            cancelled,
            created: self.created.load(Ordering::SeqCst),
            updated: self.updated.load(Ordering::SeqCst),
            error_occurred: failed > 0,
            ..RunReport::default()
        }
    }
}

/// Everything a queue run produced.
#[derive(Debug)]
pub struct QueueRun {
    pub report: RunReport,
    /// Outcomes of the tasks that started, in enumeration order.
    pub outcomes: Vec<MigrationOutcome>,
}

impl QueueRun {
    pub fn succeeded_tasks(&self) -> impl Iterator<Item = &MigrationTask> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.is_success())
            .map(|outcome| &outcome.task)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

/// Run `tasks` through `worker` with at most `concurrency` in flight.
///
/// A task is only spawned once a permit is free, so nothing is dispatched after
/// the first failure is recorded. Tasks already running finish normally.
pub async fn run(
    tasks: Vec<MigrationTask>,
    concurrency: usize,
    worker: Arc<dyn TaskWorker>,
    progress_bar: ProgressBar,
) -> QueueRun {
    let total = tasks.len();
    let aggregator = Arc::new(ErrorAggregator::new());
    let progress = RunProgress::new(total);
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(total);
    let mut never_started = 0;

    let mut pending = tasks.into_iter();
    while let Some(task) = pending.next() {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            never_started = 1 + pending.len();
            break;
        };
        if aggregator.is_cancelled() {
            never_started = 1 + pending.len();
            break;
        }

        let worker = worker.clone();
        let aggregator = aggregator.clone();
        let progress = progress.clone();
        let progress_bar = progress_bar.clone();
        let task_copy = task.clone();

        let handle = task::spawn(async move {
            let key = task.source.key.clone();
            let panic_copy = task.clone();
            let outcome = match AssertUnwindSafe(worker.process(task)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let err = MigrationError::Worker {
                        key,
                        reason: panic_message(payload.as_ref()),
                    };
                    MigrationOutcome::failure(panic_copy, err)
                }
            };

            // Record before releasing the permit so the dispatcher sees the flag
            aggregator.record(&outcome);
            progress.add_finished(outcome.is_success());
            progress_bar.inc(1);
            progress_bar.set_message(progress.message());
            drop(permit);

            outcome
        });
        handles.push((task_copy, handle));
    }

    if never_started > 0 {
        debug!(never_started, "Dispatch stopped after a failure");
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (task, handle) in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(join_error) => {
                let err = MigrationError::Worker {
                    key: task.source.key.clone(),
                    reason: join_error.to_string(),
                };
                let outcome = MigrationOutcome::failure(task, err);
                aggregator.record(&outcome);
                outcomes.push(outcome);
            }
        }
    }

    QueueRun {
        report: aggregator.report(total, never_started),
        outcomes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttachedMetadata, RecordWrite, RemoteObject, ResourceType};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    fn tasks(count: usize) -> Vec<MigrationTask> {
        (0..count)
            .map(|i| MigrationTask {
                source: RemoteObject::new(format!("src/{i}.png"), 1),
                destination_key: format!("dst/{i}.png"),
                metadata: AttachedMetadata {
                    resource_type: ResourceType::Image,
                    content_type: "image/png".to_string(),
                    tags: vec!["generic".to_string()],
                    object_metadata: HashMap::new(),
                },
                sequence_index: i,
            })
            .collect()
    }

    #[derive(Default)]
    struct ScriptedWorker {
        failing: HashSet<usize>,
        panicking: HashSet<usize>,
        delay: Option<Duration>,
        started: Mutex<Vec<usize>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl TaskWorker for ScriptedWorker {
        async fn process(&self, task: MigrationTask) -> MigrationOutcome {
            let index = task.sequence_index;
            self.started.lock().unwrap().push(index);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if self.panicking.contains(&index) {
                panic!("worker crashed on {index}");
            }
            if self.failing.contains(&index) {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                let key = task.source.key.clone();
                return MigrationOutcome::failure(task, MigrationError::transform(key, "boom"));
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let record = RecordWrite {
                id: format!("id-{index}"),
                created: index % 2 == 0,
            };
            MigrationOutcome::success(task, Some(record))
        }
    }

    #[tokio::test]
    async fn all_tasks_succeed() {
        let worker = Arc::new(ScriptedWorker::default());
        let queue_run = run(tasks(5), 2, worker.clone(), ProgressBar::hidden()).await;

        assert_eq!(
            queue_run.report,
            RunReport {
                total_tasks: 5,
                succeeded: 5,
                created: 3,
                updated: 2,
                ..RunReport::default()
            }
        );
        let order: Vec<_> = queue_run.outcomes.iter().map(|o| o.task.sequence_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert_eq!(queue_run.succeeded_tasks().count(), 5);
    }

    #[tokio::test]
    async fn failure_stops_dispatch() {
        let worker = Arc::new(ScriptedWorker {
            failing: HashSet::from([1]),
            ..ScriptedWorker::default()
        });
        let queue_run = run(tasks(5), 1, worker.clone(), ProgressBar::hidden()).await;

        assert_eq!(queue_run.report.succeeded, 1);
        assert_eq!(queue_run.report.failed, 1);
        assert_eq!(queue_run.report.cancelled, 3);
        assert!(queue_run.report.error_occurred);
        assert_eq!(*worker.started.lock().unwrap(), vec![0, 1]);
        assert_eq!(queue_run.succeeded_tasks().map(|t| t.sequence_index).collect::<Vec<_>>(), vec![0]);
    }

    #[tokio::test]
    async fn panicking_worker_stops_dispatch() {
        let worker = Arc::new(ScriptedWorker {
            panicking: HashSet::from([0]),
            ..ScriptedWorker::default()
        });
        let queue_run = run(tasks(5), 1, worker.clone(), ProgressBar::hidden()).await;

        assert_eq!(*worker.started.lock().unwrap(), vec![0]);
        assert_eq!(queue_run.report.failed, 1);
        assert_eq!(queue_run.report.succeeded, 0);
        assert_eq!(queue_run.report.cancelled, 4);
        match &queue_run.outcomes[0].result {
            Err(MigrationError::Worker { key, reason }) => {
                assert_eq!(key, "src/0.png");
                assert!(reason.contains("worker crashed on 0"), "{reason}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn in_flight_tasks_finish_after_a_failure() {
        let worker = Arc::new(ScriptedWorker {
            failing: HashSet::from([0]),
            delay: Some(Duration::from_millis(20)),
            ..ScriptedWorker::default()
        });
        let queue_run = run(tasks(8), 4, worker.clone(), ProgressBar::hidden()).await;

        assert_eq!(queue_run.report.failed, 1);
        assert_eq!(queue_run.report.succeeded, 3);
        assert_eq!(queue_run.report.cancelled, 4);
        assert_eq!(worker.started.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn never_exceeds_the_concurrency_ceiling() {
        let worker = Arc::new(ScriptedWorker {
            delay: Some(Duration::from_millis(5)),
            ..ScriptedWorker::default()
        });
        let queue_run = run(tasks(20), 3, worker.clone(), ProgressBar::hidden()).await;

        assert_eq!(queue_run.report.succeeded, 20);
        let max = worker.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "max in flight was {max}");
        assert!(max >= 2, "tasks never overlapped");
    }

    #[tokio::test]
    async fn empty_queue_reports_nothing() {
        let worker = Arc::new(ScriptedWorker::default());
        let queue_run = run(Vec::new(), 4, worker, ProgressBar::hidden()).await;
        assert_eq!(queue_run.report, RunReport::default());
        assert!(queue_run.outcomes.is_empty());
    }
}
