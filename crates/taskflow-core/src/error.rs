use thiserror::Error;

use crate::domain::{JobId, JobStatus, ValidationError};
use crate::engine::Trigger;

/// Errors raised by the scheduler core.
///
/// All of these are local and recoverable: the rejected operation left the
/// graph and every record unchanged, and the caller may retry with corrected
/// input. Executor failures are not errors; they are recorded on the job.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("job {job} would create a dependency cycle: {}", join_ids(.path, " -> "))]
    CyclicDependency { job: JobId, path: Vec<JobId> },

    #[error("job {job} depends on unknown job {dependency}")]
    UnknownDependency { job: JobId, dependency: JobId },

    #[error("job {0} is already registered")]
    DuplicateJob(JobId),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("illegal transition for job {job}: {from} --{trigger}--> {to}")]
    IllegalTransition {
        job: JobId,
        from: JobStatus,
        trigger: Trigger,
        to: JobStatus,
    },

    #[error("job {job} still has live dependents: {}", join_ids(.dependents, ", "))]
    DependentsExist { job: JobId, dependents: Vec<JobId> },

    #[error("job {job} is {status}; only terminal jobs can be removed")]
    NotTerminal { job: JobId, status: JobStatus },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

fn join_ids(ids: &[JobId], sep: &str) -> String {
    ids.iter().map(JobId::as_str).collect::<Vec<_>>().join(sep)
}
