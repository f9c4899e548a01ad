//! Single-shot client operations: one short store transaction each, output
//! on stdout, diagnostics on stderr.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use hogq_common::ids::JobId;
use hogq_common::types::JobStatus;
use hogq_common::{HogqError, Result};

use crate::store::StoreClient;

/// Create a new store. Refuses to overwrite an existing file.
pub async fn init(db: &Path, busy_timeout: Duration) -> Result<()> {
    StoreClient::create(db, busy_timeout).await?;
    println!("created {}", db.display());
    Ok(())
}

/// Capture the caller's cwd and environment and enqueue a waiting job.
/// Prints the assigned jobid.
pub async fn submit(
    store: &StoreClient,
    exec: &str,
    stdout: Option<&str>,
    stderr: Option<&str>,
) -> Result<JobId> {
    let cwd = std::env::current_dir()
        .map_err(|e| HogqError::Config(format!("current directory: {e}")))?;
    let env_json = environment_snapshot()?;

    let jobid = store
        .insert_job(exec, &cwd.to_string_lossy(), stdout, stderr, &env_json)
        .await?;

    println!("{jobid}");
    Ok(jobid)
}

/// The submitter's environment as a JSON object. Keys are sorted so equal
/// environments snapshot identically; non-UTF-8 entries are carried lossily.
fn environment_snapshot() -> Result<String> {
    let env: BTreeMap<String, String> = std::env::vars_os()
        .map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                v.to_string_lossy().into_owned(),
            )
        })
        .collect();
    Ok(serde_json::to_string(&env)?)
}

/// Flip a job to `canceled`; its owning hog observes this on its next
/// check. Terminal or unknown jobs are a reported no-op.
pub async fn cancel(store: &StoreClient, jobid: JobId) -> Result<()> {
    if store.cancel_job(jobid).await? {
        println!("canceled {jobid}");
    } else {
        println!("job {jobid} already finished or unknown, nothing to cancel");
    }
    Ok(())
}

/// Print a job's current status.
pub async fn check(store: &StoreClient, jobid: JobId) -> Result<()> {
    match store.job_status(jobid).await? {
        Some(status) => println!("{status}"),
        None => println!("job {jobid} not found"),
    }
    Ok(())
}

/// Delete every job row that is neither waiting nor running.
pub async fn cleanup(store: &StoreClient) -> Result<()> {
    let removed = store.cleanup_jobs().await?;
    println!("removed {removed} finished jobs");
    Ok(())
}

/// List jobs (optionally filtered by status) or the hog table.
pub async fn show(store: &StoreClient, filters: &[JobStatus], hogs: bool) -> Result<()> {
    if hogs {
        println!(
            "{:>6}  {:>8}  {:>11}  {:>11}  {:>11}  {:<8}  hostname",
            "hogid", "pid", "submitted", "started", "heartbeat", "status"
        );
        for hog in store.list_hogs().await? {
            println!(
                "{:>6}  {:>8}  {:>11}  {:>11}  {:>11}  {:<8}  {}",
                hog.hogid.to_string(),
                hog.pid.map_or_else(|| "-".into(), |p| p.to_string()),
                hog.submittime,
                hog.starttime.map_or_else(|| "-".into(), |t| t.to_string()),
                hog.heartbeat,
                hog.status.to_string(),
                hog.hostname.as_deref().unwrap_or("-"),
            );
        }
    } else {
        println!(
            "{:>6}  {:<9}  {:>11}  exec",
            "jobid", "status", "heartbeat"
        );
        for job in store.list_jobs(filters).await? {
            println!(
                "{:>6}  {:<9}  {:>11}  {}",
                job.jobid.to_string(),
                job.status.to_string(),
                job.heartbeat,
                job.exec,
            );
        }
    }
    Ok(())
}
