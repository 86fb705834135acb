//! Job status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a job.
///
/// State transitions:
/// - Pending -> Ready (all dependencies completed, no retry delay pending)
/// - Ready -> Running -> Completed
/// - Running -> Pending (failed, retries remain; waits for `next_eligible_at`)
/// - Running -> Failed (failed, retries exhausted, or cancelled)
/// - Pending/Ready -> Blocked (a dependency failed or was blocked)
///
/// The string encoding is part of the public contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for dependencies, or for a retry delay to elapse.
    Pending,

    /// Dependencies satisfied, eligible for dispatch.
    Ready,

    /// Handed to the executor.
    Running,

    /// Finished successfully.
    Completed,

    /// Exhausted all attempts (or cancelled).
    Failed,

    /// A dependency failed or was blocked; will never run.
    Blocked,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Ready,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Blocked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Blocked => "blocked",
        }
    }

    /// Is this a terminal status (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Blocked
        )
    }

    /// Does this status poison dependents?
    pub fn is_failure(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Blocked)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job status: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}
