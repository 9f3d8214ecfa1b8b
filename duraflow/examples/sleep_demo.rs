//! Two steps around a short sleep, driven by a background worker.
//!
//! ```bash
//! RUST_LOG=duraflow=debug cargo run --example sleep_demo
//! ```

use duraflow::prelude::*;
use duraflow::StepLedger;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut registry = Registry::new();
    registry.register("media", "transcribe", |args: CallArgs| async move {
        let ctx = args.context(0)?;
        let file: String = args.value(1)?;

        let audio: String = ctx
            .step("extract audio", || async move {
                println!("extracting audio from {}", file);
                Ok(file.replace(".mp4", ".wav"))
            })
            .await?;

        // Waits for an external transcoder without holding the worker.
        ctx.sleep(Duration::from_secs(2)).await?;

        ctx.step("transcribe", || async move {
            println!("transcribing {}", audio);
            Ok(format!("transcript of {}", audio))
        })
        .await
    });

    let store = Arc::new(InMemoryExecutionStore::new());
    let runner = WorkflowRunner::new(store, Arc::new(registry));

    let definition = WorkflowDefinition::call("media", "transcribe")
        .with_context()
        .arg(&"talk.mp4")?;
    let id = runner.enqueue(&definition).await?;
    println!("enqueued run {}", id);

    let worker = Worker::new(runner.clone())
        .with_worker_id("demo-worker")
        .with_poll_interval(Duration::from_millis(250))
        .start();

    let record = loop {
        let record = runner.find(id).await?;
        if record.status.is_terminal() {
            break record;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };
    worker.shutdown().await;
    println!("run {} finished as {}", id, record.status);

    if let Some(state) = record.state.as_deref() {
        let ledger = StepLedger::from_state(state)?;
        for step in ledger.steps() {
            println!(
                "  step {} ({}): {}",
                step.path_id(),
                step.name().unwrap_or("-"),
                step.result().unwrap_or("<pending>")
            );
        }
    }

    Ok(())
}
