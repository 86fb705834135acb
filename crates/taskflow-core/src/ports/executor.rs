//! Executor port - runs a dispatched job somewhere else.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ExecutionOutcome, JobId};

/// What the executor receives for one attempt.
///
/// The job id doubles as the payload reference; how the executor resolves it
/// to actual work is not the scheduler's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchedJob {
    pub id: JobId,

    /// 1-based attempt number of this dispatch.
    pub attempt: u32,
}

/// Executor contract.
///
/// Called once per dispatch; must eventually return exactly one outcome. The
/// scheduler keeps the job's concurrency slot until this returns.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, job: DispatchedJob) -> ExecutionOutcome;
}
