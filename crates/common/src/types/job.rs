use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HogqError;
use crate::ids::JobId;

/// Job lifecycle states.
///
/// A row only ever advances toward a terminal state: `waiting` → `running`
/// → one of the terminal states, with the single shortcut `waiting` →
/// `canceled`. Terminal rows are never resurrected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Running,
    Done,
    Failed,
    Canceled,
    OutOfTime,
    Stale,
}

impl JobStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::OutOfTime => "outoftime",
            Self::Stale => "stale",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            "outoftime" => Some(Self::OutOfTime),
            "stale" => Some(Self::Stale),
            _ => None,
        }
    }

    /// Terminal statuses are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::Canceled | Self::OutOfTime | Self::Stale
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for JobStatus {
    type Err = HogqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
            .ok_or_else(|| HogqError::Config(format!("unknown job status: {s:?}")))
    }
}

/// A full job row as stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub jobid: JobId,
    pub exec: String,
    pub cwd: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// JSON object snapshot of the submitter's environment.
    pub env: String,
    pub status: JobStatus,
    /// Last supervisor acknowledgement, seconds since the epoch. 0 while waiting.
    pub heartbeat: i64,
}

/// The descriptor handed to a hog by a successful claim — everything needed
/// to spawn the child process.
#[derive(Clone, Debug)]
pub struct JobSpec {
    pub jobid: JobId,
    pub exec: String,
    pub cwd: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub env: String,
}

impl JobSpec {
    /// Deserialize the environment snapshot captured at submit time.
    pub fn env_map(&self) -> Result<HashMap<String, String>, HogqError> {
        Ok(serde_json::from_str(&self.env)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_db_strings_round_trip() {
        for status in [
            JobStatus::Waiting,
            JobStatus::Running,
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::Canceled,
            JobStatus::OutOfTime,
            JobStatus::Stale,
        ] {
            assert_eq!(JobStatus::from_db_str(status.as_db_str()), Some(status));
        }
        assert_eq!(JobStatus::from_db_str("paused"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Waiting.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        for status in [
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::Canceled,
            JobStatus::OutOfTime,
            JobStatus::Stale,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn spec_env_deserializes() {
        let spec = JobSpec {
            jobid: JobId(1),
            exec: "/bin/true".into(),
            cwd: "/tmp".into(),
            stdout: None,
            stderr: None,
            env: r#"{"HOME":"/home/u","PATH":"/usr/bin"}"#.into(),
        };
        let env = spec.env_map().unwrap();
        assert_eq!(env.get("HOME").map(String::as_str), Some("/home/u"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn spec_env_rejects_malformed_snapshot() {
        let spec = JobSpec {
            jobid: JobId(1),
            exec: "/bin/true".into(),
            cwd: "/tmp".into(),
            stdout: None,
            stderr: None,
            env: "not json".into(),
        };
        assert!(spec.env_map().is_err());
    }
}
