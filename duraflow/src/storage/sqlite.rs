use super::{error::Result, error::StorageError, ExecutionStore};
use crate::core::{ExecutionRecord, ExecutionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Default pool size for SQLite connection pool.
const DEFAULT_POOL_SIZE: u32 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Configuration for the SQLite connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_size: u32,
    /// Minimum number of idle connections to maintain.
    pub min_idle: Option<u32>,
    /// Maximum time to wait for a connection from the pool.
    pub connection_timeout: Duration,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Option<Duration>,
    /// Idle timeout for connections.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_SIZE,
            min_idle: Some(2),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            max_lifetime: None,
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
        }
    }
}

/// SQLite-backed execution store with connection pooling.
///
/// Runs live in a single `executions` table. Updates are guarded with
/// `WHERE id = ? AND version = ?`, so the database arbitrates concurrent
/// writers.
pub struct SqliteExecutionStore {
    pool: SqlitePool,
    db_path: String,
}

impl SqliteExecutionStore {
    /// Opens (or creates) a store at `db_path` with the default pool configuration.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(db_path, PoolConfig::default()).await
    }

    /// Opens (or creates) a store with a custom pool configuration.
    pub async fn with_config(db_path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path_str))
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = Self::build_pool(connect_options, &config).await?;

        let store = Self {
            pool,
            db_path: db_path_str,
        };
        store.initialize().await?;

        info!(path = %store.db_path, "opened sqlite execution store");
        Ok(store)
    }

    /// Creates an in-memory SQLite store.
    ///
    /// Uses a single connection that is never recycled, so every query sees
    /// the same database for the lifetime of the store.
    pub async fn in_memory() -> Result<Self> {
        let config = PoolConfig {
            max_size: 1,
            min_idle: Some(1),
            max_lifetime: None,
            idle_timeout: None,
            ..PoolConfig::default()
        };

        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Memory)
            .synchronous(SqliteSynchronous::Normal);

        let pool = Self::build_pool(connect_options, &config).await?;

        let store = Self {
            pool,
            db_path: ":memory:".to_string(),
        };
        store.initialize().await?;

        Ok(store)
    }

    async fn build_pool(
        connect_options: SqliteConnectOptions,
        config: &PoolConfig,
    ) -> Result<Pool<Sqlite>> {
        let mut builder = SqlitePoolOptions::new()
            .max_connections(config.max_size)
            .acquire_timeout(config.connection_timeout);

        if let Some(min_idle) = config.min_idle {
            builder = builder.min_connections(min_idle);
        }

        // None disables recycling, which an in-memory database relies on.
        builder = builder
            .max_lifetime(config.max_lifetime)
            .idle_timeout(config.idle_timeout);

        let pool = builder
            .connect_with(connect_options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(pool)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                status TEXT CHECK( status IN ('QUEUED','RUNNING','COMPLETED','FAILED','CANCELLED') ) NOT NULL,
                queued_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                definition BLOB NOT NULL,
                wake_at INTEGER,
                state TEXT,
                version INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status, queued_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_wake ON executions(wake_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Returns the database path.
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Returns the current pool size for monitoring.
    pub fn pool_size(&self) -> u32 {
        self.pool.size()
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionRecord> {
        let id_str: String = row.try_get("id")?;
        let id = Uuid::parse_str(&id_str).map_err(|e| StorageError::Connection(e.to_string()))?;

        let status_str: String = row.try_get("status")?;
        let status = ExecutionStatus::from_str(&status_str)?;

        let queued_at_millis: i64 = row.try_get("queued_at")?;
        let queued_at = from_millis(queued_at_millis)?;
        let started_at: Option<i64> = row.try_get("started_at")?;
        let completed_at: Option<i64> = row.try_get("completed_at")?;
        let wake_at: Option<i64> = row.try_get("wake_at")?;

        Ok(ExecutionRecord {
            id,
            status,
            queued_at,
            started_at: started_at.map(from_millis).transpose()?,
            completed_at: completed_at.map(from_millis).transpose()?,
            definition: row.try_get("definition")?,
            wake_at: wake_at.map(from_millis).transpose()?,
            state: row.try_get("state")?,
            version: row.try_get("version")?,
        })
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Connection(format!("timestamp out of range: {}", millis)))
}

#[async_trait]
impl ExecutionStore for SqliteExecutionStore {
    async fn insert(&self, record: ExecutionRecord) -> Result<ExecutionRecord> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO executions
                (id, status, queued_at, started_at, completed_at, definition, wake_at, state, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.status.as_str())
        .bind(record.queued_at.timestamp_millis())
        .bind(record.started_at.map(|t| t.timestamp_millis()))
        .bind(record.completed_at.map(|t| t.timestamp_millis()))
        .bind(&record.definition)
        .bind(record.wake_at.map(|t| t.timestamp_millis()))
        .bind(&record.state)
        .bind(record.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::DuplicateId(record.id));
        }
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ExecutionRecord>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn save(&self, record: ExecutionRecord) -> Result<ExecutionRecord> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE executions
             SET status = ?, started_at = ?, completed_at = ?, definition = ?,
                 wake_at = ?, state = ?, version = version + 1
             WHERE id = ? AND version = ?",
        )
        .bind(record.status.as_str())
        .bind(record.started_at.map(|t| t.timestamp_millis()))
        .bind(record.completed_at.map(|t| t.timestamp_millis()))
        .bind(&record.definition)
        .bind(record.wake_at.map(|t| t.timestamp_millis()))
        .bind(&record.state)
        .bind(record.id.to_string())
        .bind(record.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Either the row is gone or another writer moved the version.
            let current: Option<i64> =
                sqlx::query_scalar("SELECT version FROM executions WHERE id = ?")
                    .bind(record.id.to_string())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return Err(match current {
                Some(actual) => StorageError::ConcurrentModification {
                    id: record.id,
                    expected: record.version,
                    actual,
                },
                None => StorageError::NotFound(record.id),
            });
        }

        tx.commit().await?;

        let mut saved = record;
        saved.version += 1;
        debug!(execution_id = %saved.id, version = saved.version, "saved execution");
        Ok(saved)
    }

    async fn find_by_status(&self, status: ExecutionStatus) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query("SELECT * FROM executions WHERE status = ? ORDER BY queued_at")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM executions
             WHERE wake_at IS NOT NULL AND wake_at <= ?
               AND status IN ('QUEUED','RUNNING')
             ORDER BY wake_at",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn reset(&self) -> Result<()> {
        sqlx::query("DELETE FROM executions")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
