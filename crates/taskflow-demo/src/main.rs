use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use taskflow_core::ports::{IdGenerator, UlidGenerator};
use taskflow_core::{
    DispatchedJob, ExecutionOutcome, Executor, JobId, JobSubmission, RetryPolicy, Scheduler,
    SchedulerConfig, SystemClock,
};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Demo pipeline. `fetch` fails twice before succeeding; `flaky-upload`
/// never succeeds, so `notify` ends up blocked.
const PIPELINE: &str = r#"[
    {"id": "fetch", "retry_policy": {"max_attempts": 3, "backoff_strategy": "fixed", "base_delay_seconds": 1, "max_delay_seconds": 1}},
    {"id": "parse", "dependencies": ["fetch"]},
    {"id": "index", "dependencies": ["parse"]},
    {"id": "thumbnail", "dependencies": ["parse"]},
    {"id": "flaky-upload", "dependencies": ["index"], "retry_policy": {"max_attempts": 2, "backoff_strategy": "linear", "base_delay_seconds": 1, "max_delay_seconds": 2}},
    {"id": "notify", "dependencies": ["flaky-upload", "thumbnail"]}
]"#;

#[derive(Debug, Deserialize)]
struct StepPayload {
    name: String,
    #[serde(default)]
    failures: u32,
}

/// Looks up each job's payload and fails the configured number of times.
struct DemoExecutor {
    payloads: HashMap<JobId, StepPayload>,
    attempts: HashMap<JobId, AtomicU32>,
}

impl DemoExecutor {
    fn new(payloads: HashMap<JobId, StepPayload>) -> Self {
        let attempts = payloads
            .keys()
            .map(|id| (id.clone(), AtomicU32::new(0)))
            .collect();
        Self { payloads, attempts }
    }
}

#[async_trait]
impl Executor for DemoExecutor {
    async fn execute(&self, job: DispatchedJob) -> ExecutionOutcome {
        let Some(payload) = self.payloads.get(&job.id) else {
            return ExecutionOutcome::failure(format!("no payload for {}", job.id));
        };
        sleep(Duration::from_millis(50)).await;

        let seen = self
            .attempts
            .get(&job.id)
            .map(|n| n.fetch_add(1, Ordering::Relaxed))
            .unwrap_or_default();
        if seen < payload.failures {
            return ExecutionOutcome::failure(format!(
                "{} failed (attempt {})",
                payload.name, job.attempt
            ));
        }

        info!(job_id = %job.id, attempt = job.attempt, step = %payload.name, "step done");
        ExecutionOutcome::success()
    }
}

fn payloads(report_id: &JobId) -> Result<HashMap<JobId, StepPayload>, serde_json::Error> {
    let raw = serde_json::json!({
        "fetch": {"name": "fetch sources", "failures": 2},
        "parse": {"name": "parse documents"},
        "index": {"name": "build index"},
        "thumbnail": {"name": "render thumbnails"},
        "flaky-upload": {"name": "upload index", "failures": u32::MAX},
        "notify": {"name": "notify subscribers"},
        report_id.as_str(): {"name": "write report"},
    });
    serde_json::from_value(raw)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SchedulerConfig::from_env()?;
    let ids = UlidGenerator::new(SystemClock);
    let report_id = ids.generate_job_id();

    let executor = Arc::new(DemoExecutor::new(payloads(&report_id)?));
    let scheduler = Scheduler::builder(executor).config(config).build()?;
    let handle = scheduler.spawn();

    let mut submissions: Vec<JobSubmission> = serde_json::from_str(PIPELINE)?;
    submissions.push(
        JobSubmission::new(report_id)
            .depends_on(["thumbnail"])
            .with_retry_policy(RetryPolicy::default()),
    );
    for submission in submissions {
        scheduler.submit(submission).await?;
    }

    loop {
        let counts = scheduler.counts().await;
        if counts.live() == 0 {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, shutting down");
                break;
            }
            _ = sleep(Duration::from_millis(100)) => {}
        }
    }
    handle.shutdown_and_join().await;

    info!(counts = %serde_json::to_string(&scheduler.counts().await)?, "finished");
    println!("{}", serde_json::to_string_pretty(&scheduler.snapshots().await)?);
    Ok(())
}
