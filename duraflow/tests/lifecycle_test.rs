//! Run lifecycle: cancellation, dispatch errors, worker polling and the
//! SQLite backend.

use chrono::{TimeDelta, Utc};
use duraflow::prelude::*;
use duraflow::{ExecutionStatus, StepLedger};
use std::time::Duration;

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register("orders", "ship", |args: CallArgs| async move {
            let ctx = args.context(0)?;
            let order: u64 = args.value(1)?;
            let label: String = ctx
                .step("print label", || async move { Ok(format!("label-{}", order)) })
                .await?;
            ctx.sleep(Duration::from_millis(200)).await?;
            ctx.step("hand over", || async move { Ok(format!("{} shipped", label)) })
                .await
        })
        .register("orders", "quick", |args: CallArgs| async move {
            let ctx = args.context(0)?;
            ctx.step("only", || async { Ok(true) }).await
        });
    registry
}

fn ship(order: u64) -> WorkflowDefinition {
    WorkflowDefinition::call("orders", "ship")
        .with_context()
        .arg(&order)
        .unwrap()
}

#[tokio::test]
async fn test_cancel_terminal_runs_is_rejected() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let runner = WorkflowRunner::new(store.clone(), Arc::new(registry()));

    let id = runner
        .enqueue(&WorkflowDefinition::call("orders", "quick").with_context())
        .await
        .unwrap();
    runner.execute(id).await.unwrap();

    let before = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(before.status, ExecutionStatus::Completed);

    let err = runner.cancel(id).await.unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::InvalidTransition {
            status: ExecutionStatus::Completed,
            ..
        }
    ));
    assert_eq!(store.find_by_id(id).await.unwrap().unwrap(), before);
}

#[tokio::test]
async fn test_cancel_sleeping_run() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let runner = WorkflowRunner::new(store.clone(), Arc::new(registry()));
    let id = runner.enqueue(&ship(7)).await.unwrap();

    assert!(runner.execute(id).await.unwrap().is_suspended());
    let running = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(running.status, ExecutionStatus::Running);

    let cancelled = runner.cancel(id).await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
    assert!(cancelled.wake_at.is_none());
    assert_eq!(cancelled.version, running.version + 1);

    // A cancelled run is no longer due and is never resumed.
    assert!(store.find_due(Utc::now() + TimeDelta::hours(1)).await.unwrap().is_empty());
    assert_eq!(runner.resume(id).await.unwrap(), FlowOutcome::Cancelled);
}

#[tokio::test]
async fn test_cancel_during_attempt_stops_at_next_persist() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let runner = WorkflowRunner::new(store.clone(), Arc::new(registry()));
    let id = runner.enqueue(&ship(9)).await.unwrap();

    // The attempt loaded the record before the cancel landed.
    let record = store.find_by_id(id).await.unwrap().unwrap();
    let ctx = ExecutionContext::new(record, store.clone()).unwrap();
    runner.cancel(id).await.unwrap();

    let err = ctx
        .step("print label", || async { Ok("late".to_string()) })
        .await
        .unwrap_err();
    assert_eq!(err, ExecutionError::Cancelled(id));
    assert_eq!(
        store.find_by_id(id).await.unwrap().unwrap().status,
        ExecutionStatus::Cancelled
    );
}

#[tokio::test]
async fn test_unregistered_method_is_not_found() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let runner = WorkflowRunner::new(store.clone(), Arc::new(registry()));
    let id = runner
        .enqueue(&WorkflowDefinition::call("orders", "refund").with_context())
        .await
        .unwrap();

    let err = runner.execute(id).await.unwrap_err();
    assert!(matches!(err, ExecutionError::NotFound(_)));
    assert_eq!(
        store.find_by_id(id).await.unwrap().unwrap().status,
        ExecutionStatus::Failed
    );
}

#[tokio::test]
async fn test_worker_resumes_due_runs() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let runner = WorkflowRunner::new(store.clone(), Arc::new(registry()));
    let worker = Worker::new(runner.clone());
    let id = runner.enqueue(&ship(42)).await.unwrap();

    let report = worker.tick().await.unwrap();
    assert_eq!(report.suspended, 1);

    // still sleeping
    let report = worker.tick().await.unwrap();
    assert_eq!(report.attempted(), 0);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let report = worker.tick().await.unwrap();
    assert_eq!(report.completed, 1);

    let record = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    let ledger = StepLedger::from_state(record.state.as_deref().unwrap()).unwrap();
    assert_eq!(ledger.get("2").unwrap().result(), Some("\"label-42 shipped\""));
}

#[tokio::test]
async fn test_background_worker_completes_sleeping_run() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let store = Arc::new(InMemoryExecutionStore::new());
    let runner = WorkflowRunner::new(store.clone(), Arc::new(registry()));
    let id = runner.enqueue(&ship(1)).await.unwrap();

    let handle = Worker::new(runner)
        .with_worker_id("lifecycle-worker")
        .with_poll_interval(Duration::from_millis(20))
        .start();
    assert_eq!(handle.worker_id(), "lifecycle-worker");

    let mut status = ExecutionStatus::Queued;
    for _ in 0..100 {
        status = store.find_by_id(id).await.unwrap().unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, ExecutionStatus::Completed);

    handle.shutdown().await;
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_backed_run() {
    use duraflow::SqliteExecutionStore;

    let store = Arc::new(SqliteExecutionStore::in_memory().await.unwrap());
    let runner = WorkflowRunner::new(store.clone(), Arc::new(registry()));
    let id = runner.enqueue(&ship(3)).await.unwrap();

    let reason = match runner.execute(id).await.unwrap() {
        FlowOutcome::Suspended(reason) => reason,
        other => panic!("expected suspension, got {other:?}"),
    };
    let record = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Running);
    assert_eq!(
        record.wake_at.map(|t| t.timestamp_millis()),
        Some(reason.wake_at().timestamp_millis())
    );

    tokio::time::sleep(Duration::from_millis(250)).await;
    let due = store.find_due(Utc::now()).await.unwrap();
    assert_eq!(due.len(), 1);

    let outcome = runner.execute(id).await.unwrap();
    assert_eq!(
        outcome,
        FlowOutcome::Completed(serde_json::json!("label-3 shipped"))
    );

    let record = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert!(record.wake_at.is_none());
    assert!(record.completed_at.is_some());

    // stale snapshot cannot overwrite
    let mut stale = record.clone();
    stale.version -= 1;
    assert!(matches!(
        store.save(stale).await,
        Err(StorageError::ConcurrentModification { .. })
    ));
}
