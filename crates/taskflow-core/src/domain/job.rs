//! Job record and its serializable snapshot.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobStatus, RetryPolicy};

/// A schedulable job.
///
/// Design:
/// - This is the single source of truth for a job's status.
/// - Queues and graph edges hold `JobId` only.
/// - Fields are read through accessors; only the transition engine mutates
///   status, attempts, errors and timers (the setters are crate-private).
#[derive(Debug, Clone)]
pub struct JobRecord {
    id: JobId,
    status: JobStatus,
    dependencies: BTreeSet<JobId>,
    retry_policy: RetryPolicy,

    /// Attempts consumed so far, including the current one while Running.
    attempt_count: u32,

    last_error: Option<String>,

    /// Set while a retry is pending; gates re-entry into Ready.
    next_eligible_at: Option<DateTime<Utc>>,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// New record: Ready when there is nothing to wait for, Pending otherwise.
    pub fn new(
        id: JobId,
        dependencies: BTreeSet<JobId>,
        retry_policy: RetryPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let status = if dependencies.is_empty() {
            JobStatus::Ready
        } else {
            JobStatus::Pending
        };
        Self {
            id,
            status,
            dependencies,
            retry_policy,
            attempt_count: 0,
            last_error: None,
            next_eligible_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn dependencies(&self) -> &BTreeSet<JobId> {
        &self.dependencies
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn next_eligible_at(&self) -> Option<DateTime<Utc>> {
        self.next_eligible_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Is a retry delay still pending at `now`?
    pub fn is_waiting_for_retry(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible_at.is_some_and(|at| at > now)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            dependencies: self.dependencies.iter().cloned().collect(),
            retry_policy: self.retry_policy,
            attempt_count: self.attempt_count,
            last_error: self.last_error.clone(),
            next_eligible_at: self.next_eligible_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub(crate) fn set_status(&mut self, status: JobStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    pub(crate) fn start_attempt(&mut self, now: DateTime<Utc>) {
        self.attempt_count += 1;
        self.set_status(JobStatus::Running, now);
    }

    pub(crate) fn record_error(&mut self, error: String) {
        self.last_error = Some(error);
    }

    pub(crate) fn set_next_eligible_at(&mut self, at: Option<DateTime<Utc>>) {
        self.next_eligible_at = at;
    }
}

/// Point-in-time view of a job, returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub dependencies: Vec<JobId>,
    pub retry_policy: RetryPolicy,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
