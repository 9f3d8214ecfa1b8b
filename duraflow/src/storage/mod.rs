//! Storage layer for the duraflow execution engine.
//!
//! This module provides a trait-based interface for persisting execution
//! records with multiple backend implementations:
//!
//! - [`InMemoryExecutionStore`]: Fast in-memory storage for testing and development
//! - [`SqliteExecutionStore`]: Persistent SQLite-based storage with connection pooling
//!
//! Every mutation is optimistic: [`ExecutionStore::save`] only succeeds when
//! the caller holds the latest version of the record.
//!
//! # Example
//!
//! ```no_run
//! use duraflow::core::ExecutionRecord;
//! use duraflow::storage::{ExecutionStore, InMemoryExecutionStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryExecutionStore::new();
//! let record = store.insert(ExecutionRecord::queued(b"{}".to_vec())).await?;
//! let mut loaded = store.find_by_id(record.id).await?.unwrap();
//! loaded.mark_started();
//! let saved = store.save(loaded).await?;
//! assert_eq!(saved.version, 1);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

mod error;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{Result, StorageError};
pub use memory::InMemoryExecutionStore;

#[cfg(feature = "sqlite")]
pub use sqlite::{PoolConfig, SqliteExecutionStore};

use crate::core::{ExecutionRecord, ExecutionStatus};

/// Trait for execution record storage backends.
///
/// Implementations must be thread-safe. The record row is the single unit of
/// mutual exclusion: concurrent writers are arbitrated by `version` alone.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a brand new record as-is.
    ///
    /// Fails with `DuplicateId` if the id is already taken.
    async fn insert(&self, record: ExecutionRecord) -> Result<ExecutionRecord>;

    /// Load a record by id.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ExecutionRecord>>;

    /// Version-checked update.
    ///
    /// Succeeds only if the stored version equals `record.version`; the
    /// stored and returned record carry `version + 1`. A mismatch fails with
    /// `ConcurrentModification` and leaves the stored record untouched.
    async fn save(&self, record: ExecutionRecord) -> Result<ExecutionRecord>;

    /// All records currently in `status`, oldest first.
    async fn find_by_status(&self, status: ExecutionStatus) -> Result<Vec<ExecutionRecord>>;

    /// Non-terminal records whose wake time is at or before `now`, earliest first.
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionRecord>>;

    /// Delete all records.
    async fn reset(&self) -> Result<()>;

    /// Release backend resources.
    async fn close(&self) -> Result<()>;
}
