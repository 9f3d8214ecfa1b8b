//! Entry points for enqueueing, resuming and cancelling runs.

use super::context::ExecutionContext;
use super::error::{ExecutionError, FlowOutcome, Result};
use super::registry::{Argument, CallArgs, ServiceLookup};
use crate::core::{ExecutionRecord, ExecutionStatus, WorkflowDefinition};
use crate::storage::{ExecutionStore, StorageError};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Drives runs of registered workflows against a store.
///
/// `resume` is the raw reconstruct-and-replay call. `execute` wraps it with
/// the lifecycle: claiming a queued run and recording the terminal status.
#[derive(Clone)]
pub struct WorkflowRunner {
    store: Arc<dyn ExecutionStore>,
    services: Arc<dyn ServiceLookup>,
}

impl WorkflowRunner {
    pub fn new(store: Arc<dyn ExecutionStore>, services: Arc<dyn ServiceLookup>) -> Self {
        Self { store, services }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Persists a new queued run for `definition` and returns its id.
    pub async fn enqueue(&self, definition: &WorkflowDefinition) -> Result<Uuid> {
        let record = ExecutionRecord::queued(definition.to_bytes()?);
        let record = self.store.insert(record).await?;
        info!(
            execution_id = %record.id,
            service = %definition.service,
            method = %definition.method,
            "Enqueued run"
        );
        Ok(record.id)
    }

    /// Loads a run by id.
    ///
    /// # Errors
    /// Returns `ExecutionError::NotFound` if no run has this id.
    pub async fn find(&self, id: Uuid) -> Result<ExecutionRecord> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ExecutionError::NotFound(format!("execution {}", id)))
    }

    /// Reconstructs the run and replays its target from the top.
    ///
    /// Completed steps are answered from the ledger. Context slots of the
    /// definition receive the live context regardless of their captured value.
    /// A run that was cancelled is not invoked at all.
    ///
    /// # Errors
    /// - `NotFound` for an unknown run, service or method
    /// - `InvalidTransition` if the run already completed or failed
    /// - any error returned by the target, including `ConcurrentModification`
    pub async fn resume(&self, id: Uuid) -> Result<FlowOutcome<serde_json::Value>> {
        let record = self.find(id).await?;
        self.replay(record).await
    }

    /// Replays the target of `record`, binding the context to that snapshot.
    async fn replay(&self, record: ExecutionRecord) -> Result<FlowOutcome<serde_json::Value>> {
        let id = record.id;
        match record.status {
            ExecutionStatus::Cancelled => return Ok(FlowOutcome::Cancelled),
            ExecutionStatus::Completed | ExecutionStatus::Failed => {
                return Err(ExecutionError::InvalidTransition {
                    id,
                    status: record.status,
                })
            }
            ExecutionStatus::Queued | ExecutionStatus::Running => {}
        }

        let definition = WorkflowDefinition::from_bytes(&record.definition)?;
        let handler = self
            .services
            .lookup(&definition.service, &definition.method)?;

        let context = Arc::new(ExecutionContext::new(record, self.store.clone())?);
        let args = definition
            .parameters
            .iter()
            .map(|parameter| Argument::from_parameter(parameter, &context))
            .collect();

        debug!(
            execution_id = %id,
            service = %definition.service,
            method = %definition.method,
            "Invoking target"
        );
        let result = handler(CallArgs::new(args)).await;

        // The reason outlives any rewrapping of the error by user code.
        if let Some(reason) = context.take_suspend_reason() {
            return Ok(FlowOutcome::Suspended(reason));
        }

        match result {
            Ok(value) => Ok(FlowOutcome::Completed(value)),
            Err(ExecutionError::Cancelled(_)) => Ok(FlowOutcome::Cancelled),
            Err(e) => Err(e),
        }
    }

    /// Runs one attempt of `id` and records its lifecycle transition.
    ///
    /// Every attempt first claims the run with a version-checked save: a
    /// queued run becomes `Running` with `started_at`, a sleeping run has its
    /// wake time cleared. Of two dispatchers holding the same snapshot only
    /// one gets past the claim, so no user code runs twice for it. A sleep
    /// that is not due yet re-asserts its wake time from the ledger.
    ///
    /// Afterwards a completed target marks the run `Completed`, a failed one
    /// `Failed`; a suspended run stays `Running` with its wake time.
    /// `ConcurrentModification` is returned without any transition so the
    /// caller can retry from a fresh load.
    pub async fn execute(&self, id: Uuid) -> Result<FlowOutcome<serde_json::Value>> {
        let mut record = self.find(id).await?;
        match record.status {
            ExecutionStatus::Queued => record.mark_started(),
            ExecutionStatus::Running => record.wake_at = None,
            ExecutionStatus::Cancelled => return Ok(FlowOutcome::Cancelled),
            status => return Err(ExecutionError::InvalidTransition { id, status }),
        }
        let claimed = match self.store.save(record).await {
            Ok(claimed) => claimed,
            Err(StorageError::ConcurrentModification { .. }) => {
                warn!(execution_id = %id, "Another dispatcher claimed this run first");
                return Err(ExecutionError::ConcurrentModification(id));
            }
            Err(e) => return Err(e.into()),
        };
        info!(execution_id = %id, version = claimed.version, "Claimed run");

        match self.replay(claimed).await {
            Ok(FlowOutcome::Completed(value)) => {
                self.finish(id, ExecutionStatus::Completed).await?;
                info!(execution_id = %id, "Run completed");
                Ok(FlowOutcome::Completed(value))
            }
            Ok(FlowOutcome::Suspended(reason)) => {
                info!(execution_id = %id, wake_at = %reason.wake_at(), "Run suspended");
                Ok(FlowOutcome::Suspended(reason))
            }
            Ok(FlowOutcome::Cancelled) => {
                info!(execution_id = %id, "Run cancelled, stopping");
                Ok(FlowOutcome::Cancelled)
            }
            Err(e @ ExecutionError::ConcurrentModification(_)) => {
                warn!(execution_id = %id, "Attempt lost a version race, leaving run as is");
                Err(e)
            }
            Err(e) => {
                error!(execution_id = %id, error = %e, "Run failed");
                self.finish(id, ExecutionStatus::Failed).await?;
                Err(e)
            }
        }
    }

    /// Cancels a queued or running run.
    ///
    /// Only flips the persisted status; an attempt already in flight notices
    /// at its next persist.
    ///
    /// # Errors
    /// - `NotFound` if the run does not exist
    /// - `InvalidTransition` if it is already completed, failed or cancelled
    /// - `ConcurrentModification` if another writer got there first
    pub async fn cancel(&self, id: Uuid) -> Result<ExecutionRecord> {
        let mut record = self.find(id).await?;
        if !record.mark_finished(ExecutionStatus::Cancelled) {
            return Err(ExecutionError::InvalidTransition {
                id,
                status: record.status,
            });
        }
        let saved = self.store.save(record).await?;
        info!(execution_id = %id, "Cancelled run");
        Ok(saved)
    }

    /// Moves the run to `status` unless it is already terminal.
    async fn finish(&self, id: Uuid, status: ExecutionStatus) -> Result<()> {
        loop {
            let mut record = self.find(id).await?;
            if !record.mark_finished(status) {
                debug!(
                    execution_id = %id,
                    current = %record.status,
                    requested = %status,
                    "Run already terminal, keeping status"
                );
                return Ok(());
            }
            match self.store.save(record).await {
                Ok(_) => return Ok(()),
                // Reload and re-check; a concurrent cancel must win.
                Err(StorageError::ConcurrentModification { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CallArgs, Registry};
    use crate::storage::InMemoryExecutionStore;

    fn runner() -> WorkflowRunner {
        let mut registry = Registry::new();
        registry
            .register("math", "square", |args: CallArgs| async move {
                let ctx = args.context(0)?;
                let n: i64 = args.value(1)?;
                ctx.step("square", || async move { Ok(n * n) }).await
            })
            .register("math", "fail", |_args: CallArgs| async move {
                Err::<(), _>(ExecutionError::Failed("division by zero".to_string()))
            });
        WorkflowRunner::new(Arc::new(InMemoryExecutionStore::new()), Arc::new(registry))
    }

    #[tokio::test]
    async fn test_enqueue_creates_queued_record() {
        let runner = runner();
        let definition = WorkflowDefinition::call("math", "square")
            .with_context()
            .arg(&4i64)
            .unwrap();
        let id = runner.enqueue(&definition).await.unwrap();

        let record = runner.find(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Queued);
        assert_eq!(record.version, 0);
        assert_eq!(
            WorkflowDefinition::from_bytes(&record.definition).unwrap(),
            definition
        );
    }

    #[tokio::test]
    async fn test_execute_completes_run() {
        let runner = runner();
        let definition = WorkflowDefinition::call("math", "square")
            .with_context()
            .arg(&4i64)
            .unwrap();
        let id = runner.enqueue(&definition).await.unwrap();

        let outcome = runner.execute(id).await.unwrap();
        assert_eq!(outcome, FlowOutcome::Completed(serde_json::json!(16)));

        let record = runner.find(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
        assert!(record.state.is_some());
    }

    #[tokio::test]
    async fn test_execute_marks_failure() {
        let runner = runner();
        let id = runner
            .enqueue(&WorkflowDefinition::call("math", "fail"))
            .await
            .unwrap();

        let err = runner.execute(id).await.unwrap_err();
        assert_eq!(err, ExecutionError::Failed("division by zero".to_string()));

        let record = runner.find(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.completed_at.is_some());

        let again = runner.execute(id).await.unwrap_err();
        assert!(matches!(again, ExecutionError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_service_fails_run() {
        let runner = runner();
        let id = runner
            .enqueue(&WorkflowDefinition::call("video", "transcode"))
            .await
            .unwrap();
        let err = runner.resume(id).await.unwrap_err();
        assert!(matches!(err, ExecutionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let runner = runner();
        assert!(matches!(
            runner.cancel(Uuid::new_v4()).await,
            Err(ExecutionError::NotFound(_))
        ));

        let id = runner
            .enqueue(&WorkflowDefinition::call("math", "fail"))
            .await
            .unwrap();
        let cancelled = runner.cancel(id).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());
        assert_eq!(cancelled.version, 1);

        let err = runner.cancel(id).await.unwrap_err();
        assert_eq!(
            err,
            ExecutionError::InvalidTransition {
                id,
                status: ExecutionStatus::Cancelled
            }
        );
        assert_eq!(runner.find(id).await.unwrap(), cancelled);

        // never invoked once cancelled
        assert_eq!(runner.execute(id).await.unwrap(), FlowOutcome::Cancelled);
        assert_eq!(runner.find(id).await.unwrap().status, ExecutionStatus::Cancelled);
    }
}
