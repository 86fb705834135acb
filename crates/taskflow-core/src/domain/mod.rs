//! Domain model: ids, statuses, retry policy, job records, outcomes.

pub mod ids;
pub mod job;
pub mod outcome;
pub mod retry;
pub mod status;

pub use ids::JobId;
pub use job::{JobRecord, JobSnapshot};
pub use outcome::ExecutionOutcome;
pub use retry::{
    BackoffStrategy, FieldViolation, ParseStrategyError, RetryPolicy, RetryPolicyBuilder,
    ValidationError,
};
pub use status::{JobStatus, ParseStatusError};
