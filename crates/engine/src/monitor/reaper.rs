use std::collections::HashMap;

use tokio::process::Child;

use hogq_common::ids::HogId;

use crate::proc;
use crate::store::{StoreClient, StoreError};

/// Seconds without a heartbeat before a row's owner is presumed dead.
pub const STALE_AFTER_SECS: i64 = 600;

/// One reaper pass: stale jobs first, then stale hogs. A stale hog has its
/// process group SIGTERMed twice (the backend wrapper can swallow a single
/// signal) and its tracked submitter handle dropped so the slot frees on
/// the next recount. The reaper never deletes rows.
pub async fn run(
    store: &StoreClient,
    submitters: &mut HashMap<HogId, Child>,
) -> Result<(), StoreError> {
    let stale_jobs = store.mark_stale_jobs(STALE_AFTER_SECS).await?;
    if stale_jobs > 0 {
        tracing::warn!(count = stale_jobs, "Jobs went stale");
    }

    for hog in store.stale_running_hogs(STALE_AFTER_SECS).await? {
        store.mark_hog_stale(hog.hogid).await?;
        if let Some(pid) = hog.pid {
            proc::terminate_group(pid);
            proc::terminate_group(pid);
        }
        submitters.remove(&hog.hogid);
        tracing::warn!(hogid = %hog.hogid, hostname = ?hog.hostname, "Hog went stale");
    }

    Ok(())
}
