mod spawn;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use hogq_common::ids::{HogId, JobId};
use hogq_common::types::JobStatus;
use hogq_common::{HogqError, Result};

use crate::proc;
use crate::store::StoreClient;

/// Runtime parameters of one hog. The CLI wires the spec cadences (60 s
/// tick, 120 s exit grace); tests shrink them to milliseconds.
#[derive(Clone, Debug)]
pub struct HogConfig {
    pub hogid: HogId,
    /// Concurrency bound: simultaneous child processes.
    pub simultaneous: usize,
    /// Total wall time granted to the backend slot.
    pub slot: Duration,
    /// Remaining slot time below which no new jobs are claimed.
    pub moratorium: Duration,
    /// Wall-time floor of one supervision iteration.
    pub tick: Duration,
    /// Remaining slot time below which the hog exits outright.
    pub exit_grace: Duration,
}

/// A tracked child: the concurrency permit rides along and is released
/// when the child is untracked. There is no per-child waiter task; the
/// reap pass is the waiter.
struct ChildSlot {
    pid: u32,
    child: Child,
    _permit: OwnedSemaphorePermit,
}

/// The worker shard occupying one batch-backend slot. Drains the waiting
/// queue into local children up to the concurrency bound, heartbeats
/// itself and each child, and surrenders jobs when the slot nears expiry.
pub struct HogRunner {
    store: StoreClient,
    config: HogConfig,
    slots: Arc<Semaphore>,
    children: HashMap<JobId, ChildSlot>,
    started: Instant,
}

impl HogRunner {
    pub fn new(store: StoreClient, config: HogConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.simultaneous));
        Self {
            store,
            config,
            slots,
            children: HashMap::new(),
            started: Instant::now(),
        }
    }

    /// Register, supervise until an exit condition or SIGINT, then run the
    /// finalizer: stamp self done, mark surviving children `outoftime`,
    /// and signal their process groups.
    pub async fn run(mut self) -> Result<()> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".into());
        self.store
            .register_hog(self.config.hogid, &hostname)
            .await
            .map_err(HogqError::from)?;

        tracing::info!(
            hogid = %self.config.hogid,
            hostname = %hostname,
            simultaneous = self.config.simultaneous,
            "Hog started"
        );

        tokio::select! {
            _ = self.drive() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(hogid = %self.config.hogid, "Hog interrupted");
            }
        }

        self.finalize().await;
        Ok(())
    }

    async fn drive(&mut self) {
        loop {
            let iteration_started = Instant::now();

            if self.remaining() < self.config.exit_grace {
                tracing::info!(hogid = %self.config.hogid, "Slot time nearly exhausted");
                return;
            }

            // Self first, children after: a running job's heartbeat is
            // never older than its hog's.
            if let Err(e) = self.store.heartbeat_hog(self.config.hogid).await {
                tracing::warn!(hogid = %self.config.hogid, error = %e, "Hog heartbeat failed");
            }

            self.reap().await;
            let idle = self.drain().await;

            if self.children.is_empty() && idle {
                tracing::info!(hogid = %self.config.hogid, "No children and no claimable work");
                return;
            }

            let elapsed = iteration_started.elapsed();
            if elapsed < self.config.tick {
                tokio::time::sleep(self.config.tick - elapsed).await;
            }
        }
    }

    /// Advance every tracked child: honor store-side cancels, stamp
    /// heartbeats on live children, and move exited children to their
    /// terminal status. Untracking releases the concurrency slot.
    async fn reap(&mut self) {
        let jobids: Vec<JobId> = self.children.keys().copied().collect();
        for jobid in jobids {
            let status = match self.store.job_status(jobid).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(jobid = %jobid, error = %e, "Job status read failed");
                    continue;
                }
            };

            if status == Some(JobStatus::Canceled) {
                if let Some(slot) = self.children.remove(&jobid) {
                    proc::terminate_group(slot.pid as i64);
                    tracing::info!(jobid = %jobid, "Job canceled, child signalled");
                }
                continue;
            }

            let Some(slot) = self.children.get_mut(&jobid) else {
                continue;
            };
            match slot.child.try_wait() {
                Ok(None) => {
                    if let Err(e) = self.store.heartbeat_job(jobid).await {
                        tracing::warn!(jobid = %jobid, error = %e, "Job heartbeat failed");
                    }
                }
                Ok(Some(exit)) => {
                    let terminal = if exit.success() {
                        JobStatus::Done
                    } else {
                        JobStatus::Failed
                    };
                    if let Err(e) = self.store.finish_job(jobid, terminal).await {
                        tracing::warn!(jobid = %jobid, error = %e, "Job finish update failed");
                    }
                    self.children.remove(&jobid);
                    tracing::info!(jobid = %jobid, status = %terminal, code = ?exit.code(), "Job finished");
                }
                Err(e) => {
                    tracing::warn!(jobid = %jobid, error = %e, "Child wait failed");
                }
            }
        }
    }

    /// Claim and spawn waiting jobs while local slots are free and the
    /// moratorium allows it. Returns true when no further work can start:
    /// the queue was empty, or the claim window has closed for the rest of
    /// the slot.
    async fn drain(&mut self) -> bool {
        if self.remaining() < self.config.moratorium {
            return true;
        }

        loop {
            let permit = match Arc::clone(&self.slots).try_acquire_owned() {
                Ok(permit) => permit,
                // Locally full; queue state unknown.
                Err(_) => return false,
            };

            let spec = match self.store.claim_next(self.config.hogid).await {
                Ok(Some(spec)) => spec,
                Ok(None) => return true,
                Err(e) => {
                    tracing::warn!(hogid = %self.config.hogid, error = %e, "Claim failed");
                    return false;
                }
            };

            match spawn::launch(&spec) {
                Ok(child) => {
                    let pid = child.id().unwrap_or_default();
                    tracing::info!(jobid = %spec.jobid, exec = %spec.exec, pid, "Job started");
                    self.children.insert(
                        spec.jobid,
                        ChildSlot {
                            pid,
                            child,
                            _permit: permit,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(jobid = %spec.jobid, error = %e, "Spawn failed");
                    if let Err(e) = self.store.finish_job(spec.jobid, JobStatus::Failed).await {
                        tracing::warn!(jobid = %spec.jobid, error = %e, "Job finish update failed");
                    }
                }
            }
        }
    }

    async fn finalize(mut self) {
        if let Err(e) = self.store.finish_hog(self.config.hogid).await {
            // The reaper will flag the row stale instead.
            tracing::warn!(hogid = %self.config.hogid, error = %e, "Failed to mark hog done");
        }

        for (jobid, slot) in self.children.drain() {
            if let Err(e) = self.store.finish_job(jobid, JobStatus::OutOfTime).await {
                tracing::warn!(jobid = %jobid, error = %e, "Job finish update failed");
            }
            proc::terminate_group(slot.pid as i64);
            tracing::info!(jobid = %jobid, "Job out of time");
        }

        tracing::info!(hogid = %self.config.hogid, "Hog finished");
    }

    fn remaining(&self) -> Duration {
        self.config
            .slot
            .checked_sub(self.started.elapsed())
            .unwrap_or_default()
    }
}
