//! Duraflow: deterministic replay for durable workflows
//!
//! `duraflow` runs workflows that can be interrupted (by a restart, a crash or
//! a timed sleep) and later resumed from where they stopped. Every step a
//! workflow takes is addressed by its position in the control flow, its result
//! is persisted under that address, and a resumed run replays the same code
//! while completed steps are answered from the ledger instead of running
//! again.
//!
//! # Features
//!
//! - **Position-based step ids**: stable across replays, independent of names
//! - **Step caching**: a completed step never runs twice for the same run
//! - **Non-blocking sleep**: a sleeping run holds no thread, only a wake time
//! - **Optimistic persistence**: one writer wins per record version
//! - **Pluggable storage**: in-memory and SQLite backends
//!
//! # Quick Start
//!
//! ```no_run
//! use duraflow::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = Registry::new();
//!     registry.register("greeter", "greet", |args: CallArgs| async move {
//!         let ctx = args.context(0)?;
//!         let name: String = args.value(1)?;
//!         let greeting = ctx
//!             .step("compose", || async move { Ok(format!("Hello, {}!", name)) })
//!             .await?;
//!         ctx.sleep(Duration::from_secs(5)).await?;
//!         ctx.step("shout", || async move { Ok(greeting.to_uppercase()) })
//!             .await
//!     });
//!
//!     let store = Arc::new(InMemoryExecutionStore::new());
//!     let runner = WorkflowRunner::new(store, Arc::new(registry));
//!     let definition = WorkflowDefinition::call("greeter", "greet")
//!         .with_context()
//!         .arg(&"World")?;
//!     let id = runner.enqueue(&definition).await?;
//!
//!     // First attempt suspends at the sleep; a worker resumes it once due.
//!     let outcome = runner.execute(id).await?;
//!     assert!(outcome.is_suspended());
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`core`]: domain types, ledger and serialization (hides the encoding)
//! - [`storage`]: persistence backends (hides database choice and schema)
//! - [`executor`]: addressing, replay, dispatch and scheduling

pub mod core;
pub mod executor;
pub mod storage;

pub use core::{
    CoreError, ExecutionRecord, ExecutionStatus, Result as CoreResult, ServiceId, StepLedger,
    StepRecord, WorkflowDefinition, WorkflowParameter,
};

pub use executor::{
    CallArgs, ExecutionContext, ExecutionError, FlowOutcome, PathAddresser, Registry,
    Result as ExecutionResult, ServiceLookup, SuspendReason, Worker, WorkerHandle,
    WorkflowRunner,
};

pub use storage::{ExecutionStore, InMemoryExecutionStore, Result as StorageResult, StorageError};

#[cfg(feature = "sqlite")]
pub use storage::{PoolConfig, SqliteExecutionStore};

// Re-export dependencies used in the public API
pub use serde;
pub use tokio;
pub use uuid;

/// Prelude module for convenient glob imports
///
/// ```
/// use duraflow::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{
        CoreError, ExecutionRecord, ExecutionStatus, ServiceId, WorkflowDefinition,
    };

    pub use crate::executor::{
        CallArgs, ExecutionContext, ExecutionError, FlowOutcome, Registry,
        Result as ExecutionResult, Worker, WorkerHandle, WorkflowRunner,
    };

    pub use crate::storage::{ExecutionStore, InMemoryExecutionStore, StorageError};

    #[cfg(feature = "sqlite")]
    pub use crate::storage::SqliteExecutionStore;

    pub use serde::{Deserialize, Serialize};
    pub use std::sync::Arc;
    pub use uuid::Uuid;
}
