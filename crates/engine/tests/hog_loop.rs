//! Hog loop behavior against real child processes: claim → spawn → reap,
//! cancellation, spawn failure, the moratorium, and slot-expiry surrender.
//! Cadences are shrunk to milliseconds; the CLI wires the production ones.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use hogq_common::ids::{HogId, JobId};
use hogq_common::types::{HogStatus, JobStatus};
use hogq_engine::hog::{HogConfig, HogRunner};
use hogq_engine::store::StoreClient;

const ENV: &str = r#"{"PATH":"/usr/bin:/bin"}"#;

async fn fresh_store() -> (TempDir, StoreClient) {
    let dir = TempDir::new().unwrap();
    let store = StoreClient::create(&dir.path().join("jobs.sqlite"), Duration::from_secs(5))
        .await
        .unwrap();
    (dir, store)
}

async fn reopen(dir: &TempDir) -> StoreClient {
    StoreClient::open(&dir.path().join("jobs.sqlite"), Duration::from_secs(5))
        .await
        .unwrap()
}

/// An executable shell script inside the test directory.
fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().into_owned()
}

fn config(hogid: i64, slot: Duration, moratorium: Duration) -> HogConfig {
    HogConfig {
        hogid: HogId::from_i64(hogid),
        simultaneous: 2,
        slot,
        moratorium,
        tick: Duration::from_millis(50),
        exit_grace: Duration::from_secs(1),
    }
}

async fn wait_for_status(store: &StoreClient, jobid: JobId, want: JobStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if store.job_status(jobid).await.unwrap() == Some(want) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for job {jobid} to become {want}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn single_job_runs_to_done() {
    let (dir, store) = fresh_store().await;
    let script = write_script(dir.path(), "hello.sh", "#!/bin/sh\necho \"jobid=$JOBID\"\n");
    let jobid = store
        .insert_job(
            &script,
            &dir.path().to_string_lossy(),
            Some("out.log"),
            None,
            ENV,
        )
        .await
        .unwrap();

    // Started directly, without a Monitor-created row: the hog registers
    // itself.
    let runner = HogRunner::new(store, config(1, Duration::from_secs(60), Duration::ZERO));
    tokio::time::timeout(Duration::from_secs(30), runner.run())
        .await
        .unwrap()
        .unwrap();

    let store = reopen(&dir).await;
    assert_eq!(
        store.job_status(jobid).await.unwrap(),
        Some(JobStatus::Done)
    );
    assert_eq!(
        store.hog_status(HogId::from_i64(1)).await.unwrap(),
        Some(HogStatus::Done)
    );

    // Redirection lands relative to the job's cwd; JOBID is injected.
    let out = std::fs::read_to_string(dir.path().join("out.log")).unwrap();
    assert_eq!(out.trim(), format!("jobid={jobid}"));
}

#[tokio::test]
async fn nonzero_exit_is_failed() {
    let (dir, store) = fresh_store().await;
    let script = write_script(dir.path(), "bad.sh", "#!/bin/sh\nexit 3\n");
    let jobid = store
        .insert_job(&script, &dir.path().to_string_lossy(), None, None, ENV)
        .await
        .unwrap();

    let runner = HogRunner::new(store, config(1, Duration::from_secs(60), Duration::ZERO));
    tokio::time::timeout(Duration::from_secs(30), runner.run())
        .await
        .unwrap()
        .unwrap();

    let store = reopen(&dir).await;
    assert_eq!(
        store.job_status(jobid).await.unwrap(),
        Some(JobStatus::Failed)
    );
}

#[tokio::test]
async fn spawn_failure_does_not_wedge_the_hog() {
    let (dir, store) = fresh_store().await;
    let missing = store
        .insert_job(
            "/nonexistent/binary",
            &dir.path().to_string_lossy(),
            None,
            None,
            ENV,
        )
        .await
        .unwrap();
    let script = write_script(dir.path(), "ok.sh", "#!/bin/sh\nexit 0\n");
    let good = store
        .insert_job(&script, &dir.path().to_string_lossy(), None, None, ENV)
        .await
        .unwrap();

    let runner = HogRunner::new(store, config(1, Duration::from_secs(60), Duration::ZERO));
    tokio::time::timeout(Duration::from_secs(30), runner.run())
        .await
        .unwrap()
        .unwrap();

    let store = reopen(&dir).await;
    assert_eq!(
        store.job_status(missing).await.unwrap(),
        Some(JobStatus::Failed)
    );
    assert_eq!(store.job_status(good).await.unwrap(), Some(JobStatus::Done));
}

#[tokio::test]
async fn cancel_while_running_terminates_the_child() {
    let (dir, store) = fresh_store().await;
    let script = write_script(dir.path(), "slow.sh", "#!/bin/sh\nsleep 30\n");
    let jobid = store
        .insert_job(&script, &dir.path().to_string_lossy(), None, None, ENV)
        .await
        .unwrap();

    let runner = HogRunner::new(store, config(1, Duration::from_secs(300), Duration::ZERO));
    let hog = tokio::spawn(runner.run());

    let store = reopen(&dir).await;
    wait_for_status(&store, jobid, JobStatus::Running).await;
    assert!(store.cancel_job(jobid).await.unwrap());

    // The hog notices the cancel on its next check, signals the child, and
    // then exits with nothing left to do.
    tokio::time::timeout(Duration::from_secs(30), hog)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(
        store.job_status(jobid).await.unwrap(),
        Some(JobStatus::Canceled)
    );
    assert_eq!(
        store.hog_status(HogId::from_i64(1)).await.unwrap(),
        Some(HogStatus::Done)
    );
}

#[tokio::test]
async fn moratorium_prevents_new_claims() {
    let (dir, store) = fresh_store().await;
    let script = write_script(dir.path(), "ok.sh", "#!/bin/sh\nexit 0\n");
    let jobid = store
        .insert_job(&script, &dir.path().to_string_lossy(), None, None, ENV)
        .await
        .unwrap();

    // The moratorium covers the whole slot: this hog must refuse the job
    // and exit.
    let runner = HogRunner::new(
        store,
        config(1, Duration::from_secs(10), Duration::from_secs(10)),
    );
    tokio::time::timeout(Duration::from_secs(30), runner.run())
        .await
        .unwrap()
        .unwrap();

    let store = reopen(&dir).await;
    assert_eq!(
        store.job_status(jobid).await.unwrap(),
        Some(JobStatus::Waiting)
    );

    // A later hog with an open claim window picks it up.
    let runner = HogRunner::new(store, config(2, Duration::from_secs(60), Duration::ZERO));
    tokio::time::timeout(Duration::from_secs(30), runner.run())
        .await
        .unwrap()
        .unwrap();

    let store = reopen(&dir).await;
    assert_eq!(
        store.job_status(jobid).await.unwrap(),
        Some(JobStatus::Done)
    );
}

#[tokio::test]
async fn slot_expiry_marks_survivors_outoftime() {
    let (dir, store) = fresh_store().await;
    let script = write_script(dir.path(), "slow.sh", "#!/bin/sh\nsleep 30\n");
    let jobid = store
        .insert_job(&script, &dir.path().to_string_lossy(), None, None, ENV)
        .await
        .unwrap();

    // Slot barely longer than the grace margin: the job starts, then the
    // hog hits the margin and surrenders it.
    let runner = HogRunner::new(store, config(1, Duration::from_secs(3), Duration::ZERO));
    tokio::time::timeout(Duration::from_secs(30), runner.run())
        .await
        .unwrap()
        .unwrap();

    let store = reopen(&dir).await;
    assert_eq!(
        store.job_status(jobid).await.unwrap(),
        Some(JobStatus::OutOfTime)
    );
    assert_eq!(
        store.hog_status(HogId::from_i64(1)).await.unwrap(),
        Some(HogStatus::Done)
    );
}
