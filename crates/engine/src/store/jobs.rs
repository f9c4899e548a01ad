use sqlx::sqlite::SqliteConnection;
use sqlx::QueryBuilder;

use hogq_common::ids::{HogId, JobId};
use hogq_common::types::{Job, JobSpec, JobStatus};

use super::{unix_now, StoreClient, StoreError};

impl StoreClient {
    /// Insert a new `waiting` job and return its assigned id.
    pub async fn insert_job(
        &self,
        exec: &str,
        cwd: &str,
        stdout: Option<&str>,
        stderr: Option<&str>,
        env_json: &str,
    ) -> Result<JobId, StoreError> {
        let result = sqlx::query(
            "INSERT INTO jobs (exec, cwd, stdout, stderr, env, status, heartbeat)
             VALUES (?, ?, ?, ?, ?, 'waiting', 0)",
        )
        .bind(exec)
        .bind(cwd)
        .bind(stdout)
        .bind(stderr)
        .bind(env_json)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(JobId::from_i64(result.last_insert_rowid()))
    }

    /// Current status of a job, or None if the row does not exist.
    pub async fn job_status(&self, jobid: JobId) -> Result<Option<JobStatus>, StoreError> {
        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM jobs WHERE jobid = ?")
                .bind(jobid.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(status.map(|(s,)| parse_job_status(&s)))
    }

    /// Flip a job to `canceled`. Guarded to non-terminal rows so terminal
    /// statuses are never resurrected; cancelling one is a no-op. Returns
    /// whether a row actually changed.
    pub async fn cancel_job(&self, jobid: JobId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'canceled'
             WHERE jobid = ? AND status IN ('waiting', 'running')",
        )
        .bind(jobid.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every job row that is neither waiting nor running. Allocation
    /// rows cascade. Returns the number of rows removed.
    pub async fn cleanup_jobs(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM jobs WHERE status NOT IN ('waiting', 'running')")
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// List jobs, optionally restricted to a set of statuses.
    pub async fn list_jobs(&self, filters: &[JobStatus]) -> Result<Vec<Job>, StoreError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT jobid, exec, cwd, stdout, stderr, env, status, heartbeat FROM jobs",
        );
        if !filters.is_empty() {
            builder.push(" WHERE status IN (");
            let mut statuses = builder.separated(", ");
            for filter in filters {
                statuses.push_bind(filter.as_db_str());
            }
            builder.push(")");
        }
        builder.push(" ORDER BY jobid");

        let rows: Vec<JobRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Claim the oldest waiting job for `hogid`: flip it to `running`,
    /// stamp its heartbeat, and record the allocation — all inside one
    /// write-exclusive transaction, the system's only cross-process mutex.
    /// Returns None when the queue is empty. Any failure rolls back and
    /// leaves the job `waiting`.
    pub async fn claim_next(&self, hogid: HogId) -> Result<Option<JobSpec>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        // BEGIN IMMEDIATE takes the write lock up front; concurrent
        // claimants queue on the busy timeout instead of racing.
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        match claim_in_tx(&mut conn, hogid).await {
            Ok(spec) => match sqlx::query("COMMIT").execute(&mut *conn).await {
                Ok(_) => Ok(spec),
                Err(e) => {
                    // Connection state unknown; dropping it outside the
                    // pool closes it and rolls the transaction back.
                    drop(conn.detach());
                    Err(StoreError::Query(e.to_string()))
                }
            },
            Err(e) => {
                if sqlx::query("ROLLBACK").execute(&mut *conn).await.is_err() {
                    drop(conn.detach());
                }
                Err(e)
            }
        }
    }

    /// Stamp a running job's heartbeat.
    pub async fn heartbeat_job(&self, jobid: JobId) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET heartbeat = ? WHERE jobid = ?")
            .bind(unix_now())
            .bind(jobid.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Move a job to a terminal status and stamp its heartbeat one last
    /// time. Guarded to non-terminal rows: a cancel that lands between
    /// claim and spawn must not be overwritten by the spawn-failure path.
    pub async fn finish_job(&self, jobid: JobId, status: JobStatus) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE jobs SET status = ?, heartbeat = ?
             WHERE jobid = ? AND status IN ('waiting', 'running')",
        )
        .bind(status.as_db_str())
        .bind(unix_now())
        .bind(jobid.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Reaper sweep: running jobs whose owner stopped heartbeating are
    /// declared stale. Returns the number of rows flipped.
    pub async fn mark_stale_jobs(&self, threshold_secs: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'stale'
             WHERE status = 'running' AND heartbeat < ?",
        )
        .bind(unix_now() - threshold_secs)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

async fn claim_in_tx(
    conn: &mut SqliteConnection,
    hogid: HogId,
) -> Result<Option<JobSpec>, StoreError> {
    let row: Option<SpecRow> = sqlx::query_as(
        "SELECT jobid, exec, cwd, stdout, stderr, env FROM jobs
         WHERE status = 'waiting' ORDER BY jobid LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| StoreError::Query(e.to_string()))?;

    let Some(row) = row else {
        return Ok(None);
    };

    sqlx::query("UPDATE jobs SET status = 'running', heartbeat = ? WHERE jobid = ?")
        .bind(unix_now())
        .bind(row.jobid)
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

    sqlx::query("INSERT INTO alloc (jobid, hogid) VALUES (?, ?)")
        .bind(row.jobid)
        .bind(hogid.0)
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

    Ok(Some(row.into()))
}

/// Internal row type for sqlx deserialization of full job rows.
#[derive(sqlx::FromRow)]
struct JobRow {
    jobid: i64,
    exec: String,
    cwd: String,
    stdout: Option<String>,
    stderr: Option<String>,
    env: String,
    status: String,
    heartbeat: i64,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Self {
            jobid: JobId::from_i64(row.jobid),
            exec: row.exec,
            cwd: row.cwd,
            stdout: row.stdout,
            stderr: row.stderr,
            env: row.env,
            status: parse_job_status(&row.status),
            heartbeat: row.heartbeat,
        }
    }
}

/// Claim result row.
#[derive(sqlx::FromRow)]
struct SpecRow {
    jobid: i64,
    exec: String,
    cwd: String,
    stdout: Option<String>,
    stderr: Option<String>,
    env: String,
}

impl From<SpecRow> for JobSpec {
    fn from(row: SpecRow) -> Self {
        Self {
            jobid: JobId::from_i64(row.jobid),
            exec: row.exec,
            cwd: row.cwd,
            stdout: row.stdout,
            stderr: row.stderr,
            env: row.env,
        }
    }
}

fn parse_job_status(s: &str) -> JobStatus {
    match JobStatus::from_db_str(s) {
        Some(status) => status,
        None => {
            tracing::warn!(status = s, "Unknown job status in store, treating as stale");
            JobStatus::Stale
        }
    }
}
