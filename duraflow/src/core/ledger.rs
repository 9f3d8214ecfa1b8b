//! Per-run step ledger.
//!
//! The ledger is the event-sourced half of replay: one [`StepRecord`] per
//! path id, holding whether the step finished and what it returned. It is
//! persisted as a JSON blob in the `state` column of its run.

use super::error::Result;
use super::serialization::{deserialize_value, serialize_value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result and metadata of one step, keyed by its path id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    path_id: String,
    /// Human label; lookup never uses it.
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    result_type: Option<String>,
    /// Only used by sleep steps.
    #[serde(default)]
    wake_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn new(path_id: impl Into<String>) -> Self {
        Self {
            path_id: path_id.into(),
            name: None,
            completed: false,
            result: None,
            result_type: None,
            wake_at: None,
        }
    }

    pub fn path_id(&self) -> &str {
        &self.path_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn result_type(&self) -> Option<&str> {
        self.result_type.as_deref()
    }

    pub fn wake_at(&self) -> Option<DateTime<Utc>> {
        self.wake_at
    }

    /// Returns true if a wake time is recorded and has passed.
    pub fn is_wake_due(&self, now: DateTime<Utc>) -> bool {
        self.wake_at.is_some_and(|wake_at| wake_at <= now)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Marks the step finished with its serialized result.
    pub fn complete(&mut self, result: String, result_type: Option<&str>) {
        self.completed = true;
        self.result = Some(result);
        self.result_type = result_type.map(str::to_string);
        self.wake_at = None;
    }

    pub fn set_wake_at(&mut self, wake_at: Option<DateTime<Utc>>) {
        self.wake_at = wake_at;
    }
}

/// Ordered collection of step records for one run.
///
/// Insertion order is first-execution order; lookups are by exact path id.
/// Records are never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLedger {
    execution_id: Uuid,
    #[serde(default)]
    steps: Vec<StepRecord>,
}

impl StepLedger {
    /// Creates an empty ledger for a run that has not persisted a step yet.
    pub fn new(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            steps: Vec::new(),
        }
    }

    /// Restores a ledger from a run's persisted state blob.
    ///
    /// # Errors
    /// Returns `CoreError::Deserialization` if the blob is not a ledger.
    pub fn from_state(state: &str) -> Result<Self> {
        deserialize_value(state)
    }

    /// Serializes the ledger into the persisted state blob.
    pub fn to_state(&self) -> Result<String> {
        serialize_value(self)
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn get(&self, path_id: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|step| step.path_id == path_id)
    }

    pub fn get_mut(&mut self, path_id: &str) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|step| step.path_id == path_id)
    }

    /// Returns the record for `path_id`, appending an incomplete one if absent.
    pub fn find_or_create(&mut self, path_id: &str) -> &mut StepRecord {
        match self.steps.iter().position(|step| step.path_id == path_id) {
            Some(index) => &mut self.steps[index],
            None => {
                self.steps.push(StepRecord::new(path_id));
                let last = self.steps.len() - 1;
                &mut self.steps[last]
            }
        }
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of steps already completed.
    pub fn completed_count(&self) -> usize {
        self.steps.iter().filter(|step| step.completed).count()
    }
}
