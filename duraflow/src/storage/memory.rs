use super::{error::Result, error::StorageError, ExecutionStore};
use crate::core::{ExecutionRecord, ExecutionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// In-memory execution store using DashMap for concurrent access.
///
/// The version check and the write happen under the same shard lock, so two
/// writers holding the same stale version can never both succeed. Suitable
/// for tests and single-process deployments; nothing survives a restart.
pub struct InMemoryExecutionStore {
    records: DashMap<Uuid, ExecutionRecord>,
}

impl InMemoryExecutionStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert(&self, record: ExecutionRecord) -> Result<ExecutionRecord> {
        match self.records.entry(record.id) {
            Entry::Occupied(_) => Err(StorageError::DuplicateId(record.id)),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ExecutionRecord>> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, record: ExecutionRecord) -> Result<ExecutionRecord> {
        let Some(mut stored) = self.records.get_mut(&record.id) else {
            return Err(StorageError::NotFound(record.id));
        };

        if stored.version != record.version {
            return Err(StorageError::ConcurrentModification {
                id: record.id,
                expected: record.version,
                actual: stored.version,
            });
        }

        let mut next = record;
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn find_by_status(&self, status: ExecutionStatus) -> Result<Vec<ExecutionRecord>> {
        let mut records: Vec<ExecutionRecord> = self
            .records
            .iter()
            .filter(|entry| entry.value().status == status)
            .map(|entry| entry.value().clone())
            .collect();

        records.sort_by_key(|record| record.queued_at);
        Ok(records)
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionRecord>> {
        let mut records: Vec<ExecutionRecord> = self
            .records
            .iter()
            .filter(|entry| entry.value().is_due(now))
            .map(|entry| entry.value().clone())
            .collect();

        records.sort_by_key(|record| record.wake_at);
        Ok(records)
    }

    async fn reset(&self) -> Result<()> {
        self.records.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
