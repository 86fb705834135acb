//! Scheduler - owns the graph, the store and the queues, and drives jobs
//! through the transition engine.
//!
//! Flow per poll (`tick`):
//! 1. Pop elapsed entries off the retry heap and promote them to Ready.
//! 2. Pop Ready jobs in FIFO order while a concurrency slot is free, move them
//!    to Running and hand them to the executor on their own task.
//! 3. Each execution task reports its outcome back through `report_outcome`,
//!    which re-evaluates dependents as soon as a job turns terminal.
//!
//! Lock order: graph, then store map, then one record. Queue locks are never
//! held while a record lock is taken.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, RwLock, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::config::{ConfigError, SchedulerConfig};
use super::status::SchedulerCounts;
use crate::domain::{ExecutionOutcome, JobId, JobRecord, JobSnapshot, JobStatus, RetryPolicy};
use crate::engine::{
    Applied, DependencyGraph, DependencyState, JobStore, TransitionContext, Trigger, transition,
};
use crate::error::{Result, SchedulerError};
use crate::ports::{Clock, DispatchedJob, Executor, SystemClock};

/// A request to schedule one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub id: JobId,

    #[serde(default)]
    pub dependencies: Vec<JobId>,

    /// Falls back to the scheduler's default policy when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl JobSubmission {
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            retry_policy: None,
        }
    }

    pub fn depends_on<I, D>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<JobId>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

/// Retry heap entry.
///
/// Ordering is reversed so `BinaryHeap` pops the earliest deadline first;
/// `seq` keeps entries with the same deadline in scheduling order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RetryEntry {
    eligible_at: DateTime<Utc>,
    seq: u64,
    id: JobId,
}

impl PartialOrd for RetryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RetryEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .eligible_at
            .cmp(&self.eligible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Ready queue and retry heap. Both hold ids only; the record is the truth,
/// so a stale entry is skipped when popped.
#[derive(Debug, Default)]
struct Queues {
    ready: VecDeque<JobId>,
    retry: BinaryHeap<RetryEntry>,
    next_seq: u64,
}

struct Inner {
    config: SchedulerConfig,
    graph: RwLock<DependencyGraph>,
    store: JobStore,
    queues: Mutex<Queues>,
    slots: Arc<Semaphore>,
    in_flight: Mutex<JoinSet<()>>,
    wake: Notify,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
}

/// Wires an executor, a clock and a config into a `Scheduler`.
///
/// ```ignore
/// let scheduler = Scheduler::builder(Arc::new(MyExecutor))
///     .config(SchedulerConfig::from_env()?)
///     .build()?;
/// ```
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
}

impl SchedulerBuilder {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            config: SchedulerConfig::default(),
            executor,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fails fast on an invalid config.
    pub fn build(self) -> std::result::Result<Scheduler, ConfigError> {
        self.config.validate()?;
        Ok(Scheduler {
            inner: Arc::new(Inner {
                slots: Arc::new(Semaphore::new(self.config.max_concurrency)),
                config: self.config,
                graph: RwLock::new(DependencyGraph::new()),
                store: JobStore::new(),
                queues: Mutex::new(Queues::default()),
                in_flight: Mutex::new(JoinSet::new()),
                wake: Notify::new(),
                executor: self.executor,
                clock: self.clock,
            }),
        })
    }
}

/// Dependency-aware job scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn builder(executor: Arc<dyn Executor>) -> SchedulerBuilder {
        SchedulerBuilder::new(executor)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Register a job.
    ///
    /// Dependencies must already be registered. A job whose dependencies are
    /// all completed starts Ready; one with a failed or blocked dependency is
    /// accepted and blocked at once.
    pub async fn submit(&self, submission: JobSubmission) -> Result<JobSnapshot> {
        let JobSubmission {
            id,
            dependencies,
            retry_policy,
        } = submission;
        let policy = retry_policy.unwrap_or(self.inner.config.default_retry_policy);
        let dependencies: BTreeSet<JobId> = dependencies.into_iter().collect();
        let now = self.inner.clock.now();

        // Held until the initial evaluation is done, so a dependency turning
        // terminal meanwhile either is seen here or sees this job as a dependent.
        let mut graph = self.inner.graph.write().await;
        graph.add_job(id.clone(), dependencies.iter().cloned())?;

        let record = JobRecord::new(id.clone(), dependencies, policy, now);
        let shared = match self.inner.store.insert(record).await {
            Ok(shared) => shared,
            Err(err) => {
                graph.remove_job(&id, |_| None)?;
                return Err(err);
            }
        };

        let state = self.dependency_state(&graph, &id).await;
        let snapshot = {
            let mut record = shared.lock().await;
            let trigger = match (state, record.status()) {
                (DependencyState::Failed, _) => Some(Trigger::DependencyFailed),
                (DependencyState::Satisfied, JobStatus::Pending) => {
                    Some(Trigger::DependencyCompleted)
                }
                _ => None,
            };
            if let Some(trigger) = trigger {
                transition::apply(&mut record, trigger, &TransitionContext::new(state, now))?;
            }
            record.snapshot()
        };
        drop(graph);

        match snapshot.status {
            JobStatus::Blocked => {
                warn!(job_id = %id, "job submitted with a failed dependency, blocked");
            }
            status => {
                info!(
                    job_id = %id,
                    status = %status,
                    dependencies = snapshot.dependencies.len(),
                    "job submitted"
                );
            }
        }
        if snapshot.status == JobStatus::Ready {
            self.enqueue_ready([id]).await;
        }
        Ok(snapshot)
    }

    /// Apply an executor outcome to a Running job.
    ///
    /// Fails with `IllegalTransition` when the job is not Running, e.g. a late
    /// outcome for a job that was cancelled while executing.
    pub async fn report_outcome(
        &self,
        id: &JobId,
        outcome: ExecutionOutcome,
    ) -> Result<JobSnapshot> {
        let shared = self.inner.store.require(id).await?;
        let now = self.inner.clock.now();
        let trigger = match outcome {
            ExecutionOutcome::Succeeded => Trigger::Succeeded,
            ExecutionOutcome::Failed { error } => Trigger::Failed { error },
        };

        let (applied, snapshot) = {
            let mut record = shared.lock().await;
            let ctx = TransitionContext::new(DependencyState::Satisfied, now);
            let applied = transition::apply(&mut record, trigger, &ctx)?;
            (applied, record.snapshot())
        };

        match (applied, snapshot.next_eligible_at) {
            (Applied::Moved { to: JobStatus::Pending, .. }, Some(eligible_at)) => {
                info!(
                    job_id = %id,
                    attempt = snapshot.attempt_count,
                    delay_secs = (eligible_at - now).num_seconds(),
                    error = snapshot.last_error.as_deref().unwrap_or_default(),
                    "job failed, retry scheduled"
                );
                self.schedule_retry(id.clone(), eligible_at).await;
            }
            (Applied::Moved { to: JobStatus::Completed, .. }, _) => {
                info!(job_id = %id, attempt = snapshot.attempt_count, "job completed");
            }
            (Applied::Moved { to: JobStatus::Failed, .. }, _) => {
                warn!(
                    job_id = %id,
                    attempts = snapshot.attempt_count,
                    error = snapshot.last_error.as_deref().unwrap_or_default(),
                    "job failed permanently"
                );
            }
            _ => {}
        }

        if let Some(terminal) = applied.terminal() {
            self.settle(id, terminal).await;
        }
        Ok(snapshot)
    }

    pub async fn status(&self, id: &JobId) -> Result<JobSnapshot> {
        self.inner.store.snapshot(id).await
    }

    /// Every job, oldest submission first.
    pub async fn snapshots(&self) -> Vec<JobSnapshot> {
        self.inner.store.snapshots().await
    }

    pub async fn counts(&self) -> SchedulerCounts {
        self.snapshots()
            .await
            .into_iter()
            .map(|snapshot| snapshot.status)
            .collect()
    }

    /// Withdraw a job that has not reached a terminal status.
    ///
    /// The job becomes Failed with `last_error = "cancelled: <reason>"` and
    /// its dependents are blocked. A Running job keeps its executor slot until
    /// the executor returns; that outcome is then rejected.
    pub async fn cancel(&self, id: &JobId, reason: impl Into<String>) -> Result<JobSnapshot> {
        let shared = self.inner.store.require(id).await?;
        let now = self.inner.clock.now();
        let trigger = Trigger::Cancel {
            reason: reason.into(),
        };

        let (applied, snapshot) = {
            let mut record = shared.lock().await;
            let ctx = TransitionContext::new(DependencyState::Satisfied, now);
            let applied = transition::apply(&mut record, trigger, &ctx)?;
            (applied, record.snapshot())
        };

        self.forget_queued(std::slice::from_ref(id)).await;
        if let Applied::Moved { from, .. } = applied {
            warn!(
                job_id = %id,
                from = %from,
                error = snapshot.last_error.as_deref().unwrap_or_default(),
                "job cancelled"
            );
        }
        if let Some(terminal) = applied.terminal() {
            self.settle(id, terminal).await;
        }
        Ok(snapshot)
    }

    /// Drop a terminal job from the graph and the store.
    pub async fn remove(&self, id: &JobId) -> Result<JobSnapshot> {
        let mut graph = self.inner.graph.write().await;
        let snapshot = self.inner.store.snapshot(id).await?;
        if !snapshot.status.is_terminal() {
            return Err(SchedulerError::NotTerminal {
                job: id.clone(),
                status: snapshot.status,
            });
        }

        let statuses = match graph.dependents_of(id) {
            Some(dependents) => self.inner.store.statuses(dependents).await,
            None => HashMap::new(),
        };
        graph.remove_job(id, |job| statuses.get(job).copied())?;
        self.inner.store.remove(id).await;
        drop(graph);

        info!(job_id = %id, status = %snapshot.status, "job removed");
        Ok(snapshot)
    }

    /// One poll cycle: promote elapsed retries, then dispatch what fits.
    /// Returns the ids handed to the executor.
    pub async fn tick(&self) -> Vec<JobId> {
        self.reap_finished().await;
        self.promote_due_retries().await;
        self.dispatch_ready().await
    }

    /// Poll until `shutdown` turns true (or its sender is dropped), then wait
    /// for in-flight executions to report.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let poll_interval = self.inner.config.poll_interval();
        info!(
            max_concurrency = self.inner.config.max_concurrency,
            poll_interval_ms = self.inner.config.poll_interval_ms,
            "scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick().await;

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.inner.wake.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!("scheduler stopping, waiting for in-flight executions");
        self.wait_idle().await;
        info!("scheduler stopped");
    }

    /// Run the loop on its own task.
    pub fn spawn(&self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = self.clone();
        let join = tokio::spawn(async move { scheduler.run(shutdown_rx).await });
        SchedulerHandle { shutdown_tx, join }
    }

    /// Wait until no execution is in flight.
    ///
    /// Joins in place, one task at a time, so dropping this future part way
    /// leaves the remaining executions running and tracked.
    pub async fn wait_idle(&self) {
        loop {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.join_next().await {
                Some(result) => log_join_error(result),
                None => return,
            }
        }
    }

    async fn dependency_state(&self, graph: &DependencyGraph, id: &JobId) -> DependencyState {
        let statuses = match graph.dependencies_of(id) {
            Some(dependencies) => self.inner.store.statuses(dependencies).await,
            None => HashMap::new(),
        };
        graph.dependency_state(id, |dep| statuses.get(dep).copied())
    }

    async fn settle(&self, id: &JobId, status: JobStatus) {
        match status {
            JobStatus::Completed => self.promote_dependents(id).await,
            status if status.is_failure() => self.block_dependents(id).await,
            _ => {}
        }
    }

    async fn promote_dependents(&self, id: &JobId) {
        let graph = self.inner.graph.read().await;
        let Some(dependents) = graph.dependents_of(id) else {
            return;
        };
        let now = self.inner.clock.now();

        let mut promoted = Vec::new();
        for dependent in dependents {
            let state = self.dependency_state(&graph, dependent).await;
            if state != DependencyState::Satisfied {
                continue;
            }
            let Some(shared) = self.inner.store.get(dependent).await else {
                continue;
            };
            let mut record = shared.lock().await;
            if record.status() != JobStatus::Pending {
                continue;
            }
            match transition::apply(
                &mut record,
                Trigger::DependencyCompleted,
                &TransitionContext::new(state, now),
            ) {
                Ok(applied) if applied.moved_to(JobStatus::Ready) => {
                    debug!(job_id = %dependent, completed = %id, "dependencies satisfied, job ready");
                    promoted.push(dependent.clone());
                }
                Ok(_) => {}
                Err(err) => warn!(job_id = %dependent, error = %err, "promotion rejected"),
            }
        }
        drop(graph);

        self.enqueue_ready(promoted).await;
    }

    /// Walks every transitive dependent once, breadth first. A dependent's
    /// failing dependency always comes earlier in that order, so each live
    /// one sees `DependencyState::Failed` when its turn comes.
    async fn block_dependents(&self, id: &JobId) {
        let graph = self.inner.graph.read().await;
        let now = self.inner.clock.now();

        let mut blocked = Vec::new();
        for job in graph.downstream_of(id) {
            let Some(shared) = self.inner.store.get(&job).await else {
                continue;
            };
            let state = self.dependency_state(&graph, &job).await;
            let applied = {
                let mut record = shared.lock().await;
                transition::apply(
                    &mut record,
                    Trigger::DependencyFailed,
                    &TransitionContext::new(state, now),
                )
            };
            match applied {
                Ok(applied) if applied.moved_to(JobStatus::Blocked) => {
                    debug!(job_id = %job, "job blocked");
                    blocked.push(job);
                }
                Ok(_) => {}
                Err(err) => warn!(job_id = %job, error = %err, "dependent could not be blocked"),
            }
        }
        drop(graph);

        if !blocked.is_empty() {
            warn!(job_id = %id, blocked = blocked.len(), "failure cascaded to dependents");
            self.forget_queued(&blocked).await;
        }
    }

    async fn promote_due_retries(&self) {
        let now = self.inner.clock.now();
        let due: Vec<JobId> = {
            let mut queues = self.inner.queues.lock().await;
            let mut due = Vec::new();
            while queues
                .retry
                .peek()
                .is_some_and(|entry| entry.eligible_at <= now)
            {
                if let Some(entry) = queues.retry.pop() {
                    due.push(entry.id);
                }
            }
            due
        };
        if due.is_empty() {
            return;
        }

        let graph = self.inner.graph.read().await;
        let mut promoted = Vec::new();
        let mut still_waiting = Vec::new();
        for id in due {
            let state = self.dependency_state(&graph, &id).await;
            let Some(shared) = self.inner.store.get(&id).await else {
                continue;
            };
            let mut record = shared.lock().await;
            if record.status() != JobStatus::Pending {
                debug!(job_id = %id, status = %record.status(), "skipping stale retry entry");
                continue;
            }
            match transition::apply(
                &mut record,
                Trigger::RetryDelayElapsed,
                &TransitionContext::new(state, now),
            ) {
                Ok(applied) if applied.moved_to(JobStatus::Ready) => {
                    debug!(job_id = %id, attempt = record.attempt_count(), "retry delay elapsed, job ready");
                    promoted.push(id.clone());
                }
                Ok(_) => {
                    if let Some(eligible_at) = record.next_eligible_at() {
                        still_waiting.push((id.clone(), eligible_at));
                    }
                }
                Err(err) => warn!(job_id = %id, error = %err, "retry promotion rejected"),
            }
        }
        drop(graph);

        for (id, eligible_at) in still_waiting {
            self.schedule_retry(id, eligible_at).await;
        }
        self.enqueue_ready(promoted).await;
    }

    async fn dispatch_ready(&self) -> Vec<JobId> {
        let mut dispatched = Vec::new();
        loop {
            let Ok(permit) = Arc::clone(&self.inner.slots).try_acquire_owned() else {
                break;
            };
            let next = self.inner.queues.lock().await.ready.pop_front();
            let Some(id) = next else {
                break;
            };
            let Some(shared) = self.inner.store.get(&id).await else {
                debug!(job_id = %id, "skipping ready entry for removed job");
                continue;
            };

            let now = self.inner.clock.now();
            let attempt = {
                let mut record = shared.lock().await;
                if record.status() != JobStatus::Ready {
                    debug!(job_id = %id, status = %record.status(), "skipping stale ready entry");
                    continue;
                }
                let ctx = TransitionContext::new(DependencyState::Satisfied, now);
                if let Err(err) = transition::apply(&mut record, Trigger::Dispatch, &ctx) {
                    warn!(job_id = %id, error = %err, "dispatch rejected");
                    continue;
                }
                record.attempt_count()
            };

            info!(job_id = %id, attempt, "job dispatched");
            self.spawn_execution(
                DispatchedJob {
                    id: id.clone(),
                    attempt,
                },
                permit,
            )
            .await;
            dispatched.push(id);
        }
        dispatched
    }

    async fn spawn_execution(&self, job: DispatchedJob, permit: OwnedSemaphorePermit) {
        let scheduler = self.clone();
        let executor = Arc::clone(&self.inner.executor);
        self.inner.in_flight.lock().await.spawn(async move {
            let id = job.id.clone();
            let attempt = job.attempt;
            // A panicking executor still costs exactly one attempt.
            let outcome = match tokio::spawn(async move { executor.execute(job).await }).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(job_id = %id, attempt, error = %err, "executor did not return an outcome");
                    panicked_outcome(err)
                }
            };
            if let Err(err) = scheduler.report_outcome(&id, outcome).await {
                warn!(job_id = %id, attempt, error = %err, "late outcome rejected");
            }
            drop(permit);
            scheduler.inner.wake.notify_one();
        });
    }

    async fn reap_finished(&self) {
        let mut in_flight = self.inner.in_flight.lock().await;
        while let Some(result) = in_flight.try_join_next() {
            log_join_error(result);
        }
    }

    async fn enqueue_ready(&self, ids: impl IntoIterator<Item = JobId>) {
        let mut queues = self.inner.queues.lock().await;
        let before = queues.ready.len();
        queues.ready.extend(ids);
        if queues.ready.len() > before {
            self.inner.wake.notify_one();
        }
    }

    async fn schedule_retry(&self, id: JobId, eligible_at: DateTime<Utc>) {
        let mut queues = self.inner.queues.lock().await;
        let seq = queues.next_seq;
        queues.next_seq += 1;
        queues.retry.push(RetryEntry {
            eligible_at,
            seq,
            id,
        });
    }

    async fn forget_queued(&self, ids: &[JobId]) {
        let mut queues = self.inner.queues.lock().await;
        queues.ready.retain(|id| !ids.contains(id));
        queues.retry.retain(|entry| !ids.contains(&entry.id));
    }
}

fn panicked_outcome(err: tokio::task::JoinError) -> ExecutionOutcome {
    if !err.is_panic() {
        return ExecutionOutcome::failure(format!("executor task {err}"));
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    ExecutionOutcome::failure(format!("executor panicked: {message}"))
}

fn log_join_error(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        warn!(error = %err, "execution task did not finish cleanly");
    }
}

/// Handle to a loop started with [`Scheduler::spawn`].
/// Dropping it stops the loop as well.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop taking new work; executions already handed out still report.
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            warn!(error = %err, "scheduler task did not finish cleanly");
        }
    }
}
