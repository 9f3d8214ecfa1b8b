use super::status::ExecutionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The durable representation of one workflow run.
///
/// Every persisted mutation goes through a version-checked save: the store
/// accepts a record only if its `version` matches the stored one, and hands
/// back the record with `version + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique handle of the run, also the ledger lookup key.
    pub id: Uuid,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// When the run was enqueued.
    pub queued_at: DateTime<Utc>,
    /// When a worker first claimed the run.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run entered a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Serialized `WorkflowDefinition`.
    pub definition: Vec<u8>,
    /// Set exactly while the run is sleeping on a step that is not yet due.
    pub wake_at: Option<DateTime<Utc>>,
    /// Serialized `StepLedger`, absent until the first persist.
    pub state: Option<String>,
    /// Optimistic concurrency token.
    pub version: i64,
}

impl ExecutionRecord {
    /// Creates a new queued record with a fresh id.
    pub fn queued(definition: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: ExecutionStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            definition,
            wake_at: None,
            state: None,
            version: 0,
        }
    }

    /// Returns true once the run reached Completed, Failed or Cancelled.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true while a sleep step is pending on this run.
    pub fn is_sleeping(&self) -> bool {
        self.wake_at.is_some()
    }

    /// Returns true if the run is sleeping and its wake time has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.wake_at.is_some_and(|wake_at| wake_at <= now)
    }

    /// Moves a queued run to Running. No-op for any other status.
    pub fn mark_started(&mut self) {
        if self.status == ExecutionStatus::Queued {
            self.status = ExecutionStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    /// Moves the run to a terminal status and clears any pending wake time.
    ///
    /// Returns false without touching the record if it is already terminal.
    pub fn mark_finished(&mut self, status: ExecutionStatus) -> bool {
        debug_assert!(status.is_terminal());
        if self.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.wake_at = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_queued_record() {
        let record = ExecutionRecord::queued(b"{}".to_vec());
        assert_eq!(record.status, ExecutionStatus::Queued);
        assert_eq!(record.version, 0);
        assert!(record.state.is_none());
        assert!(!record.is_sleeping());
    }

    #[test]
    fn test_started_then_finished() {
        let mut record = ExecutionRecord::queued(vec![]);
        record.mark_started();
        assert_eq!(record.status, ExecutionStatus::Running);
        let started_at = record.started_at.unwrap();
        assert!(started_at >= record.queued_at);

        record.wake_at = Some(Utc::now());
        assert!(record.mark_finished(ExecutionStatus::Completed));
        assert!(record.wake_at.is_none());
        assert!(record.completed_at.unwrap() >= started_at);

        // terminal states are never re-entered
        assert!(!record.mark_finished(ExecutionStatus::Failed));
        assert_eq!(record.status, ExecutionStatus::Completed);
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut record = ExecutionRecord::queued(vec![]);
        record.mark_started();
        assert!(!record.is_due(now));

        record.wake_at = Some(now + Duration::seconds(30));
        assert!(!record.is_due(now));

        record.wake_at = Some(now - Duration::seconds(1));
        assert!(record.is_due(now));

        record.status = ExecutionStatus::Cancelled;
        assert!(!record.is_due(now));
    }
}
