use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HogqError;
use crate::ids::HogId;

/// Hog lifecycle states: created `waiting` by the Monitor, `running` once
/// the process starts on a compute node, then `done` on graceful exit or
/// `stale` when the reaper stops seeing heartbeats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HogStatus {
    Waiting,
    Running,
    Done,
    Stale,
}

impl HogStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Done => "done",
            Self::Stale => "stale",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "stale" => Some(Self::Stale),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Stale)
    }
}

impl fmt::Display for HogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for HogStatus {
    type Err = HogqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
            .ok_or_else(|| HogqError::Config(format!("unknown hog status: {s:?}")))
    }
}

/// A hog row as stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hog {
    pub hogid: HogId,
    /// OS pid of the batch-backend submitter wrapper, set after spawn.
    pub pid: Option<i64>,
    /// Host the hog occupied, set when it starts running.
    pub hostname: Option<String>,
    pub submittime: i64,
    pub starttime: Option<i64>,
    pub heartbeat: i64,
    pub status: HogStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_db_strings_round_trip() {
        for status in [
            HogStatus::Waiting,
            HogStatus::Running,
            HogStatus::Done,
            HogStatus::Stale,
        ] {
            assert_eq!(HogStatus::from_db_str(status.as_db_str()), Some(status));
        }
        assert_eq!(HogStatus::from_db_str("failed"), None);
    }
}
