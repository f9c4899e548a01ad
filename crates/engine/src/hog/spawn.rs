use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use hogq_common::types::JobSpec;
use hogq_common::HogqError;

/// Fork a claimed job into its own process group.
///
/// The child gets the job's cwd via the spawn API (the hog's own cwd is
/// never mutated), the environment snapshot captured at submit time
/// overlaid with `JOBID`, and its streams redirected to the requested
/// files or discarded.
pub(crate) fn launch(spec: &JobSpec) -> Result<Child, HogqError> {
    let env = spec.env_map()?;

    let mut cmd = Command::new(&spec.exec);
    cmd.current_dir(&spec.cwd)
        .env_clear()
        .envs(&env)
        .env("JOBID", spec.jobid.to_string())
        .stdin(Stdio::null())
        .stdout(redirect(spec.stdout.as_deref(), &spec.cwd)?)
        .stderr(redirect(spec.stderr.as_deref(), &spec.cwd)?)
        .process_group(0);

    cmd.spawn()
        .map_err(|e| HogqError::Spawn(format!("{}: {e}", spec.exec)))
}

/// Open a redirection target, resolved against the job's cwd when
/// relative. No path means discard.
fn redirect(path: Option<&str>, cwd: &str) -> Result<Stdio, HogqError> {
    let Some(path) = path else {
        return Ok(Stdio::null());
    };

    let path = Path::new(path);
    let full: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(cwd).join(path)
    };

    let file = File::create(&full)
        .map_err(|e| HogqError::Spawn(format!("{}: {e}", full.display())))?;
    Ok(Stdio::from(file))
}
