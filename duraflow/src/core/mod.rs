//! Core types and utilities for the duraflow execution engine.
//!
//! # Domain Model
//! - [`ExecutionRecord`]: one durable run (status, timestamps, wake time, version)
//! - [`ExecutionStatus`]: the run lifecycle (Queued, Running, Completed, Failed, Cancelled)
//! - [`StepLedger`] / [`StepRecord`]: per-step results persisted inside a run
//! - [`WorkflowDefinition`]: what a run executes (`service.method(args)`)
//!
//! # Serialization
//! - [`serialize_value`]: Convert Rust values to persisted JSON text
//! - [`deserialize_value`]: Convert persisted JSON text back to Rust values
//!
//! # Example
//!
//! ```
//! use duraflow::core::{StepLedger, serialize_value};
//! use uuid::Uuid;
//!
//! let mut ledger = StepLedger::new(Uuid::new_v4());
//! let step = ledger.find_or_create("0");
//! step.set_name("fetch");
//! step.complete(serialize_value(&"payload").unwrap(), None);
//! assert_eq!(ledger.completed_count(), 1);
//! ```

mod definition;
mod error;
mod ledger;
mod record;
mod serialization;
mod status;

pub use definition::{ServiceId, WorkflowDefinition, WorkflowParameter, EXECUTION_CONTEXT_TYPE};
pub use error::{CoreError, Result};
pub use ledger::{StepLedger, StepRecord};
pub use record::ExecutionRecord;
pub use serialization::{deserialize_value, serialize_value, type_tag};
pub use status::ExecutionStatus;
