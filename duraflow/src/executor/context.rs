//! Replay context for a single run.
//!
//! `ExecutionContext` is what workflow code talks to. Every [`step`] and
//! [`sleep`] call is addressed by position, looked up in the run's
//! [`StepLedger`] and either answered from cache or executed and persisted.
//!
//! [`step`]: ExecutionContext::step
//! [`sleep`]: ExecutionContext::sleep

use super::error::{ExecutionError, Result, SuspendReason};
use super::path::PathAddresser;
use crate::core::{
    deserialize_value, serialize_value, type_tag, ExecutionRecord, ExecutionStatus, StepLedger,
};
use crate::storage::{ExecutionStore, StorageError};
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SLEEP_STEP_NAME: &str = "sleep";

/// Locks a std mutex, recovering the data if a panicking holder poisoned it.
fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("{} mutex poisoned, recovering inner state", what);
        poisoned.into_inner()
    })
}

/// How a persist should treat the record's wake time.
enum Wake {
    Keep,
    Set(DateTime<Utc>),
    Clear,
}

/// State that only exists when the context is bound to a persisted run.
struct Binding {
    store: Arc<dyn ExecutionStore>,
    ledger: Mutex<StepLedger>,
    /// Last snapshot this context persisted or loaded. Persists are
    /// version-checked against it, and the async lock serializes them.
    record: tokio::sync::Mutex<ExecutionRecord>,
}

/// Bracket around a step's operation: enters a nested scope, exits on drop.
struct Scope<'a> {
    addresser: &'a Mutex<PathAddresser>,
}

impl<'a> Scope<'a> {
    fn enter(addresser: &'a Mutex<PathAddresser>) -> Self {
        lock(addresser, "addresser").enter();
        Self { addresser }
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        lock(self.addresser, "addresser").exit();
    }
}

/// Execution context for one run.
///
/// A bound context persists after every step. A placeholder context has
/// addressing disabled and fails every operation with
/// [`ExecutionError::Unsupported`]; it only exists so workflow code can be
/// composed without a live run.
///
/// Step ids are assigned in call order, so steps of one run must be awaited
/// sequentially for replay to line up.
pub struct ExecutionContext {
    id: Option<Uuid>,
    addresser: Mutex<PathAddresser>,
    binding: Option<Binding>,
    /// Set by `sleep` right before it returns `Suspended`. Read by the runner
    /// so suspension is detected even if user code rewrapped the error.
    suspend_reason: Mutex<Option<SuspendReason>>,
}

impl ExecutionContext {
    /// Creates an inert context that is not bound to any run.
    pub fn placeholder() -> Self {
        Self {
            id: None,
            addresser: Mutex::new(PathAddresser::disabled()),
            binding: None,
            suspend_reason: Mutex::new(None),
        }
    }

    /// Binds a context to a loaded record, restoring its ledger from `state`
    /// or starting an empty one.
    ///
    /// # Errors
    /// Returns `ExecutionError::Serialization` if the state blob is corrupt.
    pub fn new(record: ExecutionRecord, store: Arc<dyn ExecutionStore>) -> Result<Self> {
        let ledger = match record.state.as_deref() {
            Some(state) => StepLedger::from_state(state)?,
            None => StepLedger::new(record.id),
        };

        debug!(
            execution_id = %record.id,
            steps = ledger.len(),
            completed = ledger.completed_count(),
            "Bound execution context"
        );

        Ok(Self {
            id: Some(record.id),
            addresser: Mutex::new(PathAddresser::new()),
            binding: Some(Binding {
                store,
                ledger: Mutex::new(ledger),
                record: tokio::sync::Mutex::new(record),
            }),
            suspend_reason: Mutex::new(None),
        })
    }

    /// Loads a run from the store and binds a context to it.
    ///
    /// # Errors
    /// Returns `ExecutionError::NotFound` if no run has this id.
    pub async fn load(id: Uuid, store: Arc<dyn ExecutionStore>) -> Result<Self> {
        let record = store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ExecutionError::NotFound(format!("execution {}", id)))?;
        Self::new(record, store)
    }

    /// Returns the run id, or `None` for a placeholder.
    pub fn execution_id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn is_placeholder(&self) -> bool {
        self.binding.is_none()
    }

    /// Snapshot of the in-memory ledger.
    pub fn ledger(&self) -> Result<StepLedger> {
        let binding = self.bound("ledger")?;
        Ok(lock(&binding.ledger, "ledger").clone())
    }

    /// Runs `op` once per run and caches its result.
    ///
    /// On replay, a step whose path id is already completed returns the
    /// stored result and `op` is never called. Otherwise `op` runs inside a
    /// nested scope (so it may call `step`/`sleep` itself), and on success the
    /// result is persisted before it is returned. An error from `op`
    /// propagates and leaves the step incomplete.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use duraflow::executor::{ExecutionContext, ExecutionError};
    /// # async fn example(ctx: &ExecutionContext) -> Result<(), ExecutionError> {
    /// let path = ctx
    ///     .step("extract audio", || async { Ok("talk.wav".to_string()) })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn step<R, F, Fut>(&self, name: &str, op: F) -> Result<R>
    where
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let binding = self.bound(name)?;
        let path_id = lock(&self.addresser, "addresser").next_id();

        let cached = {
            let mut ledger = lock(&binding.ledger, "ledger");
            let step = ledger.find_or_create(&path_id);
            if let Some(previous) = step.name().filter(|previous| *previous != name) {
                warn!(
                    execution_id = ?self.id,
                    path = %path_id,
                    previous,
                    current = name,
                    "Step name changed at this path since it was recorded"
                );
            }
            step.set_name(name);

            if step.is_completed() {
                Some((
                    step.result().unwrap_or("null").to_string(),
                    step.result_type().map(str::to_string),
                ))
            } else {
                None
            }
        };

        if let Some((result, result_type)) = cached {
            let expected = type_tag::<R>();
            if let Some(stored) = result_type.filter(|stored| stored != expected) {
                warn!(
                    path = %path_id,
                    stored = %stored,
                    expected,
                    "Cached result was recorded with a different type"
                );
            }
            debug!(execution_id = ?self.id, path = %path_id, step = name, "Replaying cached step");
            return Ok(deserialize_value(&result)?);
        }

        let value = {
            let _scope = Scope::enter(&self.addresser);
            op().await?
        };

        let serialized = serialize_value(&value)?;
        let tag = type_tag::<R>();
        self.persist(binding, Wake::Keep, |ledger| {
            ledger
                .find_or_create(&path_id)
                .complete(serialized, Some(tag));
        })
        .await?;

        debug!(execution_id = ?self.id, path = %path_id, step = name, "Step completed");
        Ok(value)
    }

    /// Suspends the run for `duration` without blocking.
    ///
    /// The first call records `now + duration` as the wake time on the step
    /// and the record, then returns [`ExecutionError::Suspended`]; propagate
    /// it with `?`. Once the run is re-entered after the wake time the same
    /// call completes the step and returns `Ok(())`.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let wake_at = TimeDelta::from_std(duration)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.sleep_until(wake_at).await
    }

    /// Like [`sleep`](Self::sleep) with an absolute wake time.
    pub async fn sleep_until(&self, wake_at: DateTime<Utc>) -> Result<()> {
        let binding = self.bound(SLEEP_STEP_NAME)?;
        let path_id = lock(&self.addresser, "addresser").next_id();
        let now = Utc::now();

        let (completed, recorded_wake) = {
            let mut ledger = lock(&binding.ledger, "ledger");
            let step = ledger.find_or_create(&path_id);
            if step.name().is_none() {
                step.set_name(SLEEP_STEP_NAME);
            }
            (step.is_completed(), step.wake_at())
        };

        if completed {
            debug!(execution_id = ?self.id, path = %path_id, "Replaying completed sleep");
            return Ok(());
        }

        match recorded_wake {
            Some(recorded) if recorded <= now => {
                self.persist(binding, Wake::Clear, |ledger| {
                    ledger
                        .find_or_create(&path_id)
                        .complete("null".to_string(), Some(type_tag::<()>()));
                })
                .await?;
                debug!(execution_id = ?self.id, path = %path_id, "Sleep elapsed");
                Ok(())
            }
            Some(recorded) => {
                // Woken early: keep the original deadline.
                self.persist(binding, Wake::Set(recorded), |_| {}).await?;
                Err(self.suspend(path_id, recorded))
            }
            None => {
                self.persist(binding, Wake::Set(wake_at), |ledger| {
                    ledger.find_or_create(&path_id).set_wake_at(Some(wake_at));
                })
                .await?;
                Err(self.suspend(path_id, wake_at))
            }
        }
    }

    /// Takes and clears the pending suspension, if any.
    pub fn take_suspend_reason(&self) -> Option<SuspendReason> {
        lock(&self.suspend_reason, "suspend reason").take()
    }

    /// Checks for a pending suspension without consuming it.
    pub fn has_suspend_reason(&self) -> bool {
        lock(&self.suspend_reason, "suspend reason").is_some()
    }

    fn suspend(&self, path_id: String, wake_at: DateTime<Utc>) -> ExecutionError {
        // Only ever called from bound contexts.
        let id = self.id.unwrap_or_default();
        info!(execution_id = %id, path = %path_id, %wake_at, "Suspending run until wake time");
        *lock(&self.suspend_reason, "suspend reason") = Some(SuspendReason::Sleep {
            execution_id: id,
            path_id,
            wake_at,
        });
        ExecutionError::Suspended { id, wake_at }
    }

    fn bound(&self, operation: &str) -> Result<&Binding> {
        self.binding.as_ref().ok_or_else(|| {
            ExecutionError::Unsupported(format!(
                "'{}' called on a placeholder context with no run bound",
                operation
            ))
        })
    }

    /// Applies `mutate` to a copy of the ledger and saves it with the record.
    ///
    /// The in-memory ledger and record are only replaced after the save
    /// succeeded, so a failed persist leaves the step incomplete.
    async fn persist<M>(&self, binding: &Binding, wake: Wake, mutate: M) -> Result<()>
    where
        M: FnOnce(&mut StepLedger),
    {
        let mut current = binding.record.lock().await;

        let mut ledger = lock(&binding.ledger, "ledger").clone();
        mutate(&mut ledger);

        let mut next = current.clone();
        next.state = Some(ledger.to_state()?);
        match wake {
            Wake::Keep => {}
            Wake::Set(wake_at) => next.wake_at = Some(wake_at),
            Wake::Clear => next.wake_at = None,
        }

        match binding.store.save(next).await {
            Ok(saved) => {
                *current = saved;
                *lock(&binding.ledger, "ledger") = ledger;
                Ok(())
            }
            Err(StorageError::ConcurrentModification { id, expected, actual }) => {
                let fresh = binding.store.find_by_id(id).await?;
                if fresh.is_some_and(|record| record.status == ExecutionStatus::Cancelled) {
                    info!(execution_id = %id, "Run was cancelled during this attempt");
                    return Err(ExecutionError::Cancelled(id));
                }
                warn!(
                    execution_id = %id,
                    expected,
                    actual,
                    "Lost the version race, another writer persisted first"
                );
                Err(ExecutionError::ConcurrentModification(id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("bound", &self.binding.is_some())
            .finish()
    }
}
