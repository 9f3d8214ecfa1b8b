use crate::core::{CoreError, ExecutionStatus};
use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Execution layer error type for the duraflow execution engine.
///
/// Payloads are plain strings and ids so the error can be cloned and carried
/// through workflow code that returns it from nested steps.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ExecutionError {
    /// The run id, service or method could not be resolved.
    #[error("not found: {0}")]
    NotFound(String),

    /// A lifecycle transition was attempted from a status that forbids it.
    #[error("invalid transition for execution {id}: status is {status}")]
    InvalidTransition { id: Uuid, status: ExecutionStatus },

    /// A step result, parameter or ledger could not be (de)serialized.
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// Another writer persisted the run first; retry from a fresh load.
    #[error("concurrent modification of execution {0}")]
    ConcurrentModification(Uuid),

    /// The wrapped operation of a step failed. The step stays incomplete.
    #[error("step failed: {0}")]
    Failed(String),

    /// The persistence backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The run is sleeping until `wake_at`; control must return to the runner.
    #[error("execution {id} suspended until {wake_at}")]
    Suspended { id: Uuid, wake_at: DateTime<Utc> },

    /// The run was cancelled while this attempt was in flight.
    #[error("execution {0} was cancelled")]
    Cancelled(Uuid),

    /// The operation is not available on this context (placeholder).
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ExecutionError {
    /// Wraps any displayable error as a step failure.
    pub fn failed(error: impl std::fmt::Display) -> Self {
        ExecutionError::Failed(error.to_string())
    }

    /// Returns true for the suspension signal raised by `sleep`.
    pub fn is_suspended(&self) -> bool {
        matches!(self, ExecutionError::Suspended { .. })
    }
}

impl From<StorageError> for ExecutionError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::ConcurrentModification { id, .. } => {
                ExecutionError::ConcurrentModification(id)
            }
            StorageError::NotFound(id) => ExecutionError::NotFound(format!("execution {}", id)),
            StorageError::Core(core) => ExecutionError::from(core),
            other => ExecutionError::Storage(other.to_string()),
        }
    }
}

impl From<CoreError> for ExecutionError {
    fn from(e: CoreError) -> Self {
        // Display of the source chain keeps serde's position info.
        let message = match std::error::Error::source(&e) {
            Some(source) => format!("{}: {}", e, source),
            None => e.to_string(),
        };
        ExecutionError::Serialization(message)
    }
}

impl From<String> for ExecutionError {
    fn from(s: String) -> Self {
        ExecutionError::Failed(s)
    }
}

impl From<&str> for ExecutionError {
    fn from(s: &str) -> Self {
        ExecutionError::Failed(s.to_string())
    }
}

/// Reason why a run stopped without finishing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SuspendReason {
    /// Waiting for a sleep step to become due.
    Sleep {
        execution_id: Uuid,
        path_id: String,
        wake_at: DateTime<Utc>,
    },
}

impl SuspendReason {
    pub fn wake_at(&self) -> DateTime<Utc> {
        match self {
            SuspendReason::Sleep { wake_at, .. } => *wake_at,
        }
    }
}

/// A run can complete or suspend. Be honest about it.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome<R> {
    /// Target logic returned a value.
    Completed(R),
    /// Target logic is sleeping; resume after the wake time.
    Suspended(SuspendReason),
    /// The run was cancelled underneath this attempt.
    Cancelled,
}

impl<R> FlowOutcome<R> {
    pub fn is_completed(&self) -> bool {
        matches!(self, FlowOutcome::Completed(_))
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, FlowOutcome::Suspended(_))
    }

    /// Returns the completed value, if any.
    pub fn completed(self) -> Option<R> {
        match self {
            FlowOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
