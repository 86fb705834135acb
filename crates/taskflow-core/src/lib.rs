//! taskflow-core
//!
//! A dependency-aware job scheduler kernel: jobs form a DAG, run once their
//! dependencies complete, retry with backoff on failure, and block their
//! dependents when they fail for good.
//!
//! # Modules
//! - **domain**: ids, statuses, retry policy, job records, outcomes
//! - **engine**: dependency graph, status transition engine, job store
//! - **ports**: `Executor`, `Clock`, `IdGenerator`
//! - **app**: `Scheduler`, its config and counters
//! - **error**: `SchedulerError`

pub mod app;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ports;

pub use app::{
    ConfigError, JobSubmission, Scheduler, SchedulerBuilder, SchedulerConfig, SchedulerCounts,
    SchedulerHandle,
};
pub use domain::{
    BackoffStrategy, ExecutionOutcome, JobId, JobSnapshot, JobStatus, RetryPolicy, ValidationError,
};
pub use error::{Result, SchedulerError};
pub use ports::{Clock, DispatchedJob, Executor, FixedClock, SystemClock};
