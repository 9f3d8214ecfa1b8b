//! Execution engine: addressing, replay, dispatch and scheduling.
//!
//! - [`PathAddresser`] derives a step's id from its position in the call tree
//! - [`ExecutionContext`] replays or runs steps against a run's ledger
//! - [`Registry`] resolves a definition's `service.method` to a handler
//! - [`WorkflowRunner`] enqueues, resumes, executes and cancels runs
//! - [`Worker`] polls for queued and due runs
//!
//! Each module hides one decision: path.rs the id scheme, context.rs how
//! results are cached and persisted, registry.rs how calls are dispatched.

mod context;
mod error;
mod path;
mod registry;
mod runner;
mod worker;

pub use context::ExecutionContext;
pub use error::{ExecutionError, FlowOutcome, Result, SuspendReason};
pub use path::{PathAddresser, PLACEHOLDER_PATH};
pub use registry::{Argument, CallArgs, MethodHandler, Registry, ServiceLookup};
pub use runner::WorkflowRunner;
pub use worker::{TickReport, Worker, WorkerHandle};
