pub mod reaper;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::process::{Child, Command};

use hogq_common::ids::HogId;
use hogq_common::types::HogStatus;
use hogq_common::{HogqError, Result};

use crate::store::StoreClient;

/// Runtime parameters of the Monitor. The CLI wires the spec cadence
/// (10 s tick); tests shrink it.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Max concurrent hogs.
    pub batches: usize,
    /// Backend submission invocation, prefixed verbatim (whitespace-split)
    /// to the hog command line. Opaque to the system.
    pub command_prefix: Option<String>,
    /// Pass-through hog parameters.
    pub simultaneous: usize,
    pub slot_hours: f64,
    pub moratorium_hours: f64,
    /// Store location and busy timeout, forwarded to spawned hogs.
    pub db: PathBuf,
    pub busy_timeout_secs: u64,
    pub tick: Duration,
}

/// The outer supervisor: keeps a target population of hogs submitted to
/// the batch backend and reclaims whatever stops heartbeating.
pub struct Monitor {
    store: StoreClient,
    config: MonitorConfig,
    /// Locally-spawned submitter wrappers, by hog row.
    submitters: HashMap<HogId, Child>,
}

impl Monitor {
    pub fn new(store: StoreClient, config: MonitorConfig) -> Self {
        Self {
            store,
            config,
            submitters: HashMap::new(),
        }
    }

    /// Supervise until SIGINT. Running hogs are left alone on shutdown.
    pub async fn run(mut self) {
        tracing::info!(batches = self.config.batches, "Monitor started");

        tokio::select! {
            _ = self.drive() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Monitor interrupted, leaving running hogs alone");
            }
        }
    }

    async fn drive(&mut self) {
        loop {
            if let Err(e) = reaper::run(&self.store, &mut self.submitters).await {
                tracing::warn!(error = %e, "Reaper pass failed");
            }

            self.reap_submitters().await;

            // Available slots are recomputed from the store every
            // iteration; rows surviving a Monitor restart count
            // automatically and no local counter needs reconciling.
            match self.store.active_hog_count().await {
                Ok(active) => {
                    let mut active = active.max(0) as usize;
                    while active < self.config.batches {
                        match self.launch().await {
                            Ok(hogid) => {
                                tracing::info!(hogid = %hogid, "Hog launched");
                                active += 1;
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Hog launch failed");
                                break;
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Hog count read failed"),
            }

            tokio::time::sleep(self.config.tick).await;
        }
    }

    /// Observe exits of locally-tracked submitter wrappers. A wrapper that
    /// died while its hog row is still `waiting` never started a hog; the
    /// row is marked stale so the slot frees.
    async fn reap_submitters(&mut self) {
        let mut exited: Vec<(HogId, Option<i32>)> = Vec::new();
        for (&hogid, child) in self.submitters.iter_mut() {
            match child.try_wait() {
                Ok(Some(status)) => exited.push((hogid, status.code())),
                Ok(None) => {}
                Err(e) => tracing::warn!(hogid = %hogid, error = %e, "Submitter wait failed"),
            }
        }

        for (hogid, code) in exited {
            self.submitters.remove(&hogid);
            tracing::info!(hogid = %hogid, code = ?code, "Submitter exited");

            match self.store.hog_status(hogid).await {
                Ok(Some(HogStatus::Waiting)) => {
                    if let Err(e) = self.store.mark_hog_stale(hogid).await {
                        tracing::warn!(hogid = %hogid, error = %e, "Failed to mark dead submission stale");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(hogid = %hogid, error = %e, "Hog status read failed"),
            }
        }
    }

    /// Insert the hog row, then spawn
    /// `<prefix…> <this-program> --db <db> --timeout <t> hog <hogid> …`
    /// in its own process group and record its pid on the row.
    async fn launch(&mut self) -> Result<HogId> {
        let hogid = self.store.insert_hog().await.map_err(HogqError::from)?;

        let exe = std::env::current_exe()
            .map_err(|e| HogqError::Spawn(format!("current executable: {e}")))?;

        let mut argv: Vec<String> = self
            .config
            .command_prefix
            .as_deref()
            .map(|prefix| prefix.split_whitespace().map(String::from).collect())
            .unwrap_or_default();
        argv.push(exe.to_string_lossy().into_owned());
        argv.extend([
            "--db".into(),
            self.config.db.to_string_lossy().into_owned(),
            "--timeout".into(),
            self.config.busy_timeout_secs.to_string(),
            "hog".into(),
            hogid.to_string(),
            "-s".into(),
            self.config.simultaneous.to_string(),
            "-t".into(),
            self.config.slot_hours.to_string(),
            "-m".into(),
            self.config.moratorium_hours.to_string(),
        ]);

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // Free the slot; the row was never going to start.
                let _ = self.store.mark_hog_stale(hogid).await;
                return Err(HogqError::Spawn(format!("{}: {e}", argv[0])));
            }
        };

        if let Some(pid) = child.id() {
            if let Err(e) = self.store.set_hog_pid(hogid, pid).await {
                tracing::warn!(hogid = %hogid, error = %e, "Failed to record submitter pid");
            }
        }
        self.submitters.insert(hogid, child);

        Ok(hogid)
    }
}
