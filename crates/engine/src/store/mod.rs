mod hogs;
mod jobs;

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

/// SQLite client for the job queue, hog registry, and allocation table.
///
/// The store is the only shared mutable resource between the Client, the
/// Monitor, and any number of Hogs, which may live on different hosts
/// mounting the same filesystem. Every connection blocks on contention up
/// to the configured busy timeout instead of failing fast.
#[derive(Debug)]
pub struct StoreClient {
    pool: SqlitePool,
}

impl StoreClient {
    /// Create a fresh store file and its schema. Refuses to touch an
    /// existing file.
    pub async fn create(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if path.exists() {
            return Err(StoreError::AlreadyExists(path.display().to_string()));
        }

        let client = Self::connect(path, busy_timeout, true).await?;
        client.migrate().await?;
        tracing::info!(path = %path.display(), "Store created");
        Ok(client)
    }

    /// Open an existing store file. Refuses to create one implicitly.
    pub async fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::Missing(path.display().to_string()));
        }

        Self::connect(path, busy_timeout, false).await
    }

    async fn connect(
        path: &Path,
        busy_timeout: Duration,
        create: bool,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let client = Self { pool };
        client.health_check().await?;
        Ok(client)
    }

    /// Verify the connection is alive.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Run schema migrations.
    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("src/store/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Whole seconds since the epoch, the store's only clock.
pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store file already exists: {0} (delete it to create a new one)")]
    AlreadyExists(String),

    #[error("store file does not exist: {0} (run init first)")]
    Missing(String),

    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store query error: {0}")]
    Query(String),

    #[error("store migration error: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for hogq_common::HogqError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => hogq_common::HogqError::NotFound(what),
            other => hogq_common::HogqError::Store(other.to_string()),
        }
    }
}
