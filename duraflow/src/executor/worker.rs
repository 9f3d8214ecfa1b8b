//! Polling worker that drives queued and due runs.
//!
//! The worker is the scheduler half of the engine: each tick it executes every
//! `Queued` run and then every sleeping run whose wake time has passed. It
//! never waits on a timer itself, a sleeping run costs nothing until it is due.

use super::error::{ExecutionError, FlowOutcome, Result};
use super::runner::WorkflowRunner;
use crate::core::ExecutionStatus;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub completed: usize,
    pub suspended: usize,
    pub cancelled: usize,
    pub failed: usize,
    /// Attempts that lost a version race and were left for a later tick.
    pub conflicts: usize,
}

impl TickReport {
    /// Number of runs attempted during the tick.
    pub fn attempted(&self) -> usize {
        self.completed + self.suspended + self.cancelled + self.failed + self.conflicts
    }

    fn record(&mut self, result: &Result<FlowOutcome<serde_json::Value>>) {
        match result {
            Ok(FlowOutcome::Completed(_)) => self.completed += 1,
            Ok(FlowOutcome::Suspended(_)) => self.suspended += 1,
            Ok(FlowOutcome::Cancelled) => self.cancelled += 1,
            Err(ExecutionError::ConcurrentModification(_)) => self.conflicts += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Worker that polls the store and executes runs through a [`WorkflowRunner`].
///
/// # Example
///
/// ```no_run
/// # use duraflow::executor::{Registry, Worker, WorkflowRunner};
/// # use duraflow::storage::InMemoryExecutionStore;
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # async fn example() {
/// let runner = WorkflowRunner::new(
///     Arc::new(InMemoryExecutionStore::new()),
///     Arc::new(Registry::new()),
/// );
/// let handle = Worker::new(runner)
///     .with_worker_id("worker-1")
///     .with_poll_interval(Duration::from_millis(100))
///     .start();
/// // ...
/// handle.shutdown().await;
/// # }
/// ```
pub struct Worker {
    runner: WorkflowRunner,
    worker_id: String,
    poll_interval: Duration,
}

impl Worker {
    /// Creates a worker polling once per second.
    pub fn new(runner: WorkflowRunner) -> Self {
        Self {
            runner,
            worker_id: format!("worker-{}", Uuid::new_v4().simple()),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Sets how often the store is polled. Default is 1 second.
    ///
    /// This bounds how late a sleeping run is resumed after its wake time.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn runner(&self) -> &WorkflowRunner {
        &self.runner
    }

    /// Executes all queued runs, then all due sleeping runs.
    ///
    /// Failures of individual runs are counted, not returned; only a failing
    /// store query aborts the tick.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();
        let store = self.runner.store();

        let queued = store.find_by_status(ExecutionStatus::Queued).await?;
        for record in queued {
            let result = self.runner.execute(record.id).await;
            self.log_result(record.id, &result);
            report.record(&result);
        }

        let due = store.find_due(Utc::now()).await?;
        for record in due {
            let result = self.runner.execute(record.id).await;
            self.log_result(record.id, &result);
            report.record(&result);
        }

        if report.attempted() > 0 {
            debug!(worker_id = %self.worker_id, ?report, "Tick finished");
        }
        Ok(report)
    }

    fn log_result(&self, id: Uuid, result: &Result<FlowOutcome<serde_json::Value>>) {
        match result {
            Ok(_) => {}
            Err(ExecutionError::ConcurrentModification(_)) => {
                warn!(worker_id = %self.worker_id, execution_id = %id, "Run raced with another writer, will retry");
            }
            Err(e) => {
                error!(worker_id = %self.worker_id, execution_id = %id, error = %e, "Run attempt failed");
            }
        }
    }

    /// Starts the polling loop in the background.
    pub fn start(self) -> WorkerHandle {
        let cancellation_token = CancellationToken::new();
        let worker_token = cancellation_token.clone();
        let worker_id = self.worker_id.clone();

        info!(worker_id = %self.worker_id, "Starting worker");

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = worker_token.cancelled() => {
                        info!(worker_id = %self.worker_id, "Worker received shutdown signal");
                        break;
                    }

                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            error!(worker_id = %self.worker_id, error = %e, "Worker poll failed");
                        }
                    }
                }
            }

            info!(worker_id = %self.worker_id, "Worker stopped");
        });

        WorkerHandle {
            worker_id,
            handle,
            cancellation_token,
        }
    }
}

/// Handle to a running [`Worker`].
pub struct WorkerHandle {
    worker_id: String,
    handle: JoinHandle<()>,
    cancellation_token: CancellationToken,
}

impl WorkerHandle {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Child tokens are cancelled together with the worker.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Stops polling and waits for the attempt in progress to finish.
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();
        let _ = self.handle.await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Aborts the loop immediately, possibly in the middle of a step.
    ///
    /// Prefer `shutdown()`; an aborted attempt is simply replayed later.
    pub fn abort(&self) {
        self.handle.abort();
    }
}
