//! Status transition engine.
//!
//! A pure state machine: given a record, a trigger and the dependency state
//! derived from the graph, it either moves the record, leaves it unchanged
//! (a guard did not hold, or the trigger is an idempotent no-op), or rejects
//! the trigger. A rejected trigger never touches the record.
//!
//! | from               | trigger              | guard                              | to        |
//! |--------------------|----------------------|------------------------------------|-----------|
//! | pending            | dependency_completed | deps satisfied, no retry pending   | ready     |
//! | pending            | retry_delay_elapsed  | deps satisfied, delay elapsed      | ready     |
//! | pending/ready      | dependency_failed    | a dependency failed or is blocked  | blocked   |
//! | ready              | dispatch             |                                    | running   |
//! | running            | succeeded            |                                    | completed |
//! | running            | failed               | attempts remain                    | pending   |
//! | running            | failed               | attempts exhausted                 | failed    |
//! | pending/ready/running | cancel            |                                    | failed    |
//!
//! `dependency_failed` on a blocked or otherwise terminal job is a no-op so
//! that cascades arriving from several failed dependencies do not conflict.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use super::DependencyState;
use crate::domain::{JobRecord, JobStatus};
use crate::error::{Result, SchedulerError};

/// Event that may move a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// One of the job's dependencies completed.
    DependencyCompleted,

    /// The scheduler's poll found `next_eligible_at` in the past.
    RetryDelayElapsed,

    /// One of the job's dependencies failed or was blocked.
    DependencyFailed,

    /// The scheduler selected the job for execution.
    Dispatch,

    /// The executor reported success.
    Succeeded,

    /// The executor reported failure.
    Failed { error: String },

    /// The job was withdrawn before reaching a terminal status.
    Cancel { reason: String },
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::DependencyCompleted => "dependency_completed",
            Trigger::RetryDelayElapsed => "retry_delay_elapsed",
            Trigger::DependencyFailed => "dependency_failed",
            Trigger::Dispatch => "dispatch",
            Trigger::Succeeded => "succeeded",
            Trigger::Failed { .. } => "failed",
            Trigger::Cancel { .. } => "cancel",
        }
    }

    /// The status this trigger aims for. A failure with attempts left lands
    /// on Pending instead; the nominal target is what errors report.
    pub fn target(&self) -> JobStatus {
        match self {
            Trigger::DependencyCompleted | Trigger::RetryDelayElapsed => JobStatus::Ready,
            Trigger::DependencyFailed => JobStatus::Blocked,
            Trigger::Dispatch => JobStatus::Running,
            Trigger::Succeeded => JobStatus::Completed,
            Trigger::Failed { .. } | Trigger::Cancel { .. } => JobStatus::Failed,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs the guards read besides the record itself.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    pub dependencies: DependencyState,
    pub now: DateTime<Utc>,
}

impl TransitionContext {
    pub fn new(dependencies: DependencyState, now: DateTime<Utc>) -> Self {
        Self { dependencies, now }
    }
}

/// Result of applying a trigger that was not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Moved { from: JobStatus, to: JobStatus },
    Unchanged,
}

impl Applied {
    /// The new status, if the job moved into a terminal one.
    pub fn terminal(self) -> Option<JobStatus> {
        match self {
            Applied::Moved { to, .. } if to.is_terminal() => Some(to),
            _ => None,
        }
    }

    pub fn moved_to(self, status: JobStatus) -> bool {
        matches!(self, Applied::Moved { to, .. } if to == status)
    }
}

/// Apply `trigger` to `record`.
pub fn apply(record: &mut JobRecord, trigger: Trigger, ctx: &TransitionContext) -> Result<Applied> {
    let from = record.status();
    let now = ctx.now;

    let to = match (from, trigger) {
        (JobStatus::Pending, Trigger::DependencyCompleted | Trigger::RetryDelayElapsed) => {
            if ctx.dependencies != DependencyState::Satisfied || record.is_waiting_for_retry(now) {
                return Ok(Applied::Unchanged);
            }
            record.set_next_eligible_at(None);
            JobStatus::Ready
        }

        (JobStatus::Pending | JobStatus::Ready, Trigger::DependencyFailed) => {
            if ctx.dependencies != DependencyState::Failed {
                return Ok(Applied::Unchanged);
            }
            record.set_next_eligible_at(None);
            JobStatus::Blocked
        }
        (status, Trigger::DependencyFailed) if status.is_terminal() => {
            return Ok(Applied::Unchanged);
        }

        (JobStatus::Ready, Trigger::Dispatch) => {
            record.start_attempt(now);
            return Ok(Applied::Moved {
                from,
                to: JobStatus::Running,
            });
        }

        (JobStatus::Running, Trigger::Succeeded) => JobStatus::Completed,

        (JobStatus::Running, Trigger::Failed { error }) => {
            record.record_error(error);
            let policy = *record.retry_policy();
            let attempts = record.attempt_count();
            if policy.has_attempts_remaining(attempts) {
                let delay = Duration::seconds(i64::from(policy.compute_delay(attempts)));
                record.set_next_eligible_at(Some(now + delay));
                JobStatus::Pending
            } else {
                JobStatus::Failed
            }
        }

        (JobStatus::Pending | JobStatus::Ready | JobStatus::Running, Trigger::Cancel { reason }) => {
            record.record_error(format!("cancelled: {reason}"));
            record.set_next_eligible_at(None);
            JobStatus::Failed
        }

        (from, trigger) => {
            return Err(SchedulerError::IllegalTransition {
                job: record.id().clone(),
                from,
                to: trigger.target(),
                trigger,
            });
        }
    };

    record.set_status(to, now);
    Ok(Applied::Moved { from, to })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::domain::{BackoffStrategy, JobId, RetryPolicy};
    use chrono::TimeZone;
    use rstest::rstest;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn ctx(dependencies: DependencyState) -> TransitionContext {
        TransitionContext::new(dependencies, t0())
    }

    fn record(policy: RetryPolicy, with_dependency: bool) -> JobRecord {
        let deps: BTreeSet<JobId> = if with_dependency {
            BTreeSet::from([JobId::new("upstream")])
        } else {
            BTreeSet::new()
        };
        JobRecord::new(JobId::new("job"), deps, policy, t0())
    }

    fn running(policy: RetryPolicy) -> JobRecord {
        let mut job = record(policy, false);
        apply(&mut job, Trigger::Dispatch, &ctx(DependencyState::Satisfied)).unwrap();
        job
    }

    fn fail(job: &mut JobRecord, at: DateTime<Utc>) -> Applied {
        let ctx = TransitionContext::new(DependencyState::Satisfied, at);
        apply(job, Trigger::Failed { error: "boom".into() }, &ctx).unwrap()
    }

    #[test]
    fn pending_becomes_ready_when_dependencies_complete() {
        let mut job = record(RetryPolicy::default(), true);
        let waiting = apply(&mut job, Trigger::DependencyCompleted, &ctx(DependencyState::Waiting));
        assert_eq!(waiting.unwrap(), Applied::Unchanged);
        assert_eq!(job.status(), JobStatus::Pending);

        let applied = apply(&mut job, Trigger::DependencyCompleted, &ctx(DependencyState::Satisfied));
        assert_eq!(
            applied.unwrap(),
            Applied::Moved {
                from: JobStatus::Pending,
                to: JobStatus::Ready
            }
        );
    }

    #[test]
    fn dispatch_increments_attempts() {
        let job = running(RetryPolicy::default());
        assert_eq!(job.status(), JobStatus::Running);
        assert_eq!(job.attempt_count(), 1);
    }

    #[test]
    fn success_completes() {
        let mut job = running(RetryPolicy::default());
        let applied = apply(&mut job, Trigger::Succeeded, &ctx(DependencyState::Satisfied)).unwrap();
        assert_eq!(applied.terminal(), Some(JobStatus::Completed));
        assert!(job.last_error().is_none());
    }

    #[test]
    fn failures_back_off_then_fail_permanently() {
        // 3 attempts, exponential, 10s base: delays 10, 20, then Failed.
        let policy = RetryPolicy::new(3, BackoffStrategy::Exponential, 10, 300).unwrap();
        let mut job = running(policy);
        let mut now = t0();

        for expected_delay in [10, 20] {
            let applied = fail(&mut job, now);
            assert!(applied.moved_to(JobStatus::Pending));
            assert_eq!(job.last_error(), Some("boom"));
            let eligible = job.next_eligible_at().unwrap();
            assert_eq!(eligible - now, Duration::seconds(expected_delay));

            // Too early: stays pending.
            let early = TransitionContext::new(DependencyState::Satisfied, eligible - Duration::seconds(1));
            assert_eq!(
                apply(&mut job, Trigger::RetryDelayElapsed, &early).unwrap(),
                Applied::Unchanged
            );

            now = eligible;
            let due = TransitionContext::new(DependencyState::Satisfied, now);
            assert!(apply(&mut job, Trigger::RetryDelayElapsed, &due).unwrap().moved_to(JobStatus::Ready));
            assert!(job.next_eligible_at().is_none());
            apply(&mut job, Trigger::Dispatch, &due).unwrap();
        }

        assert_eq!(job.attempt_count(), 3);
        let applied = fail(&mut job, now);
        assert_eq!(applied.terminal(), Some(JobStatus::Failed));
        assert!(job.next_eligible_at().is_none());

        // Never returns to Ready.
        let err = apply(&mut job, Trigger::RetryDelayElapsed, &ctx(DependencyState::Satisfied));
        assert!(err.is_err());
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn retry_waits_for_dependencies_too() {
        let mut job = running(RetryPolicy::default());
        fail(&mut job, t0());
        let later = TransitionContext::new(DependencyState::Waiting, t0() + Duration::hours(1));
        assert_eq!(
            apply(&mut job, Trigger::RetryDelayElapsed, &later).unwrap(),
            Applied::Unchanged
        );
    }

    #[test]
    fn retry_pending_job_ignores_dependency_completion() {
        let mut job = running(RetryPolicy::default());
        fail(&mut job, t0());
        let applied = apply(&mut job, Trigger::DependencyCompleted, &ctx(DependencyState::Satisfied));
        assert_eq!(applied.unwrap(), Applied::Unchanged);
        assert_eq!(job.status(), JobStatus::Pending);
    }

    #[rstest]
    #[case::pending(true)]
    #[case::ready(false)]
    fn failed_dependency_blocks(#[case] with_dependency: bool) {
        let mut job = record(RetryPolicy::default(), with_dependency);
        let applied = apply(&mut job, Trigger::DependencyFailed, &ctx(DependencyState::Failed)).unwrap();
        assert_eq!(applied.terminal(), Some(JobStatus::Blocked));
    }

    #[test]
    fn block_is_guarded_by_dependency_state() {
        let mut job = record(RetryPolicy::default(), true);
        let applied = apply(&mut job, Trigger::DependencyFailed, &ctx(DependencyState::Waiting)).unwrap();
        assert_eq!(applied, Applied::Unchanged);
        assert_eq!(job.status(), JobStatus::Pending);
    }

    #[rstest]
    #[case::blocked(JobStatus::Blocked)]
    #[case::completed(JobStatus::Completed)]
    #[case::failed(JobStatus::Failed)]
    fn block_cascade_is_idempotent_on_terminal_jobs(#[case] status: JobStatus) {
        let mut job = record(RetryPolicy::default(), true);
        job.set_status(status, t0());
        let before = job.clone().snapshot();
        let applied = apply(&mut job, Trigger::DependencyFailed, &ctx(DependencyState::Failed)).unwrap();
        assert_eq!(applied, Applied::Unchanged);
        assert_eq!(job.snapshot(), before);
    }

    #[rstest]
    #[case::dispatch_pending(JobStatus::Pending, Trigger::Dispatch)]
    #[case::dispatch_running(JobStatus::Running, Trigger::Dispatch)]
    #[case::succeed_ready(JobStatus::Ready, Trigger::Succeeded)]
    #[case::fail_pending(JobStatus::Pending, Trigger::Failed { error: "x".into() })]
    #[case::succeed_completed(JobStatus::Completed, Trigger::Succeeded)]
    #[case::promote_running(JobStatus::Running, Trigger::DependencyCompleted)]
    #[case::promote_ready(JobStatus::Ready, Trigger::RetryDelayElapsed)]
    #[case::block_running(JobStatus::Running, Trigger::DependencyFailed)]
    #[case::cancel_completed(JobStatus::Completed, Trigger::Cancel { reason: "x".into() })]
    #[case::cancel_blocked(JobStatus::Blocked, Trigger::Cancel { reason: "x".into() })]
    fn rejects_transitions_outside_the_table(#[case] status: JobStatus, #[case] trigger: Trigger) {
        let mut job = record(RetryPolicy::default(), true);
        job.set_status(status, t0());
        let before = job.snapshot();
        let name = trigger.name();
        let target = trigger.target();

        let err = apply(&mut job, trigger, &ctx(DependencyState::Failed)).unwrap_err();
        match err {
            SchedulerError::IllegalTransition {
                job: id,
                from,
                trigger,
                to,
            } => {
                assert_eq!(id, JobId::new("job"));
                assert_eq!(from, status);
                assert_eq!(trigger.name(), name);
                assert_eq!(to, target);
            }
            other => panic!("expected IllegalTransition, got {other:?}"),
        }
        assert_eq!(job.snapshot(), before);
    }

    #[test]
    fn illegal_transition_message_names_state_trigger_and_target() {
        let mut job = record(RetryPolicy::default(), false);
        let err = apply(&mut job, Trigger::Succeeded, &ctx(DependencyState::Satisfied)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "illegal transition for job job: ready --succeeded--> completed"
        );
    }

    #[rstest]
    #[case::pending(JobStatus::Pending)]
    #[case::ready(JobStatus::Ready)]
    #[case::running(JobStatus::Running)]
    fn cancel_fails_live_jobs(#[case] status: JobStatus) {
        let mut job = record(RetryPolicy::default(), true);
        job.set_status(status, t0());
        job.set_next_eligible_at(Some(t0()));
        let applied = apply(
            &mut job,
            Trigger::Cancel {
                reason: "operator".into(),
            },
            &ctx(DependencyState::Waiting),
        )
        .unwrap();
        assert_eq!(applied.terminal(), Some(JobStatus::Failed));
        assert_eq!(job.last_error(), Some("cancelled: operator"));
        assert!(job.next_eligible_at().is_none());
    }
}
