use hogq_common::ids::HogId;
use hogq_common::types::{Hog, HogStatus};

use super::{unix_now, StoreClient, StoreError};

impl StoreClient {
    /// Insert a new `waiting` hog row (Monitor launch path) and return its id.
    pub async fn insert_hog(&self) -> Result<HogId, StoreError> {
        let result = sqlx::query(
            "INSERT INTO hogs (submittime, heartbeat, status) VALUES (?, 0, 'waiting')",
        )
        .bind(unix_now())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(HogId::from_i64(result.last_insert_rowid()))
    }

    /// Record the batch-backend submitter wrapper's pid on the hog row.
    pub async fn set_hog_pid(&self, hogid: HogId, pid: u32) -> Result<(), StoreError> {
        sqlx::query("UPDATE hogs SET pid = ? WHERE hogid = ?")
            .bind(pid as i64)
            .bind(hogid.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Mark a hog as running on `hostname`, stamping starttime and
    /// heartbeat. Upserts so a hog invoked directly (without a Monitor
    /// having inserted the row) registers itself.
    pub async fn register_hog(&self, hogid: HogId, hostname: &str) -> Result<(), StoreError> {
        let now = unix_now();
        let result = sqlx::query(
            "UPDATE hogs SET status = 'running', hostname = ?, starttime = ?, heartbeat = ?
             WHERE hogid = ?",
        )
        .bind(hostname)
        .bind(now)
        .bind(now)
        .bind(hogid.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO hogs (hogid, hostname, submittime, starttime, heartbeat, status)
                 VALUES (?, ?, ?, ?, ?, 'running')",
            )
            .bind(hogid.0)
            .bind(hostname)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        Ok(())
    }

    /// Stamp the hog's own heartbeat, reasserting `running`.
    pub async fn heartbeat_hog(&self, hogid: HogId) -> Result<(), StoreError> {
        sqlx::query("UPDATE hogs SET heartbeat = ?, status = 'running' WHERE hogid = ?")
            .bind(unix_now())
            .bind(hogid.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Graceful hog exit.
    pub async fn finish_hog(&self, hogid: HogId) -> Result<(), StoreError> {
        sqlx::query("UPDATE hogs SET status = 'done', heartbeat = ? WHERE hogid = ?")
            .bind(unix_now())
            .bind(hogid.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Reaper verdict for a hog that stopped heartbeating or whose
    /// submission died before it ever started.
    pub async fn mark_hog_stale(&self, hogid: HogId) -> Result<(), StoreError> {
        sqlx::query("UPDATE hogs SET status = 'stale' WHERE hogid = ?")
            .bind(hogid.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Current status of a hog row.
    pub async fn hog_status(&self, hogid: HogId) -> Result<Option<HogStatus>, StoreError> {
        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM hogs WHERE hogid = ?")
                .bind(hogid.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(status.map(|(s,)| parse_hog_status(&s)))
    }

    /// Number of hogs occupying (or about to occupy) a backend slot. The
    /// Monitor recomputes this every iteration instead of mirroring it in
    /// a local counter, so restarts need no reconciliation.
    pub async fn active_hog_count(&self) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM hogs WHERE status IN ('waiting', 'running')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(row.0)
    }

    /// Running hogs whose heartbeat is older than the threshold.
    pub async fn stale_running_hogs(
        &self,
        threshold_secs: i64,
    ) -> Result<Vec<Hog>, StoreError> {
        let rows: Vec<HogRow> = sqlx::query_as(
            "SELECT hogid, pid, hostname, submittime, starttime, heartbeat, status
             FROM hogs WHERE status = 'running' AND heartbeat < ?",
        )
        .bind(unix_now() - threshold_secs)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// List all hog rows.
    pub async fn list_hogs(&self) -> Result<Vec<Hog>, StoreError> {
        let rows: Vec<HogRow> = sqlx::query_as(
            "SELECT hogid, pid, hostname, submittime, starttime, heartbeat, status
             FROM hogs ORDER BY hogid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Internal row type for sqlx deserialization.
#[derive(sqlx::FromRow)]
struct HogRow {
    hogid: i64,
    pid: Option<i64>,
    hostname: Option<String>,
    submittime: i64,
    starttime: Option<i64>,
    heartbeat: i64,
    status: String,
}

impl From<HogRow> for Hog {
    fn from(row: HogRow) -> Self {
        Self {
            hogid: HogId::from_i64(row.hogid),
            pid: row.pid,
            hostname: row.hostname,
            submittime: row.submittime,
            starttime: row.starttime,
            heartbeat: row.heartbeat,
            status: parse_hog_status(&row.status),
        }
    }
}

fn parse_hog_status(s: &str) -> HogStatus {
    match HogStatus::from_db_str(s) {
        Some(status) => status,
        None => {
            tracing::warn!(status = s, "Unknown hog status in store, treating as stale");
            HogStatus::Stale
        }
    }
}
