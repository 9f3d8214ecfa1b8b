use crate::core::CoreError;
use thiserror::Error;
use uuid::Uuid;

/// Storage layer error type for the duraflow execution engine.
///
/// Wraps backend and serialization errors while preserving the error chain.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A database operation failed.
    #[cfg(feature = "sqlite")]
    #[error("database operation failed: {0}")]
    Database(#[from] sqlx::Error),

    /// A core serialization or deserialization error occurred.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Connecting to the backend failed, or a stored row is unreadable.
    #[error("connection error: {0}")]
    Connection(String),

    /// No record exists under this id.
    #[error("execution not found: id={0}")]
    NotFound(Uuid),

    /// Insert collided with an existing record.
    #[error("execution already exists: id={0}")]
    DuplicateId(Uuid),

    /// The stored version moved since the record was loaded.
    #[error("concurrent modification of execution {id}: expected version {expected}, found {actual}")]
    ConcurrentModification { id: Uuid, expected: i64, actual: i64 },
}

pub type Result<T> = std::result::Result<T, StorageError>;
