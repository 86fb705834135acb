//! Job store - arena of job records keyed by id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::domain::{JobId, JobRecord, JobSnapshot, JobStatus};
use crate::error::{Result, SchedulerError};

/// Shared handle to one record. Lock it for every read-modify-write.
pub type SharedRecord = Arc<Mutex<JobRecord>>;

/// Owns every job record.
///
/// The map lock is held only long enough to find (or insert) an entry; each
/// record carries its own lock. Callers never hold two record locks at once.
#[derive(Debug, Default)]
pub struct JobStore {
    records: RwLock<HashMap<JobId, SharedRecord>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: JobRecord) -> Result<SharedRecord> {
        let mut records = self.records.write().await;
        if records.contains_key(record.id()) {
            return Err(SchedulerError::DuplicateJob(record.id().clone()));
        }
        let id = record.id().clone();
        let shared = Arc::new(Mutex::new(record));
        records.insert(id, Arc::clone(&shared));
        Ok(shared)
    }

    pub async fn get(&self, id: &JobId) -> Option<SharedRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Like `get`, but an unknown id is an error.
    pub async fn require(&self, id: &JobId) -> Result<SharedRecord> {
        self.get(id)
            .await
            .ok_or_else(|| SchedulerError::JobNotFound(id.clone()))
    }

    pub async fn status(&self, id: &JobId) -> Option<JobStatus> {
        let record = self.get(id).await?;
        let status = record.lock().await.status();
        Some(status)
    }

    /// Current status of each known id; unknown ids are left out.
    pub async fn statuses<'a, I>(&self, ids: I) -> HashMap<JobId, JobStatus>
    where
        I: IntoIterator<Item = &'a JobId>,
    {
        let mut out = HashMap::new();
        for id in ids {
            if let Some(status) = self.status(id).await {
                out.insert(id.clone(), status);
            }
        }
        out
    }

    pub async fn snapshot(&self, id: &JobId) -> Result<JobSnapshot> {
        let record = self.require(id).await?;
        let snapshot = record.lock().await.snapshot();
        Ok(snapshot)
    }

    /// Snapshots of every job, oldest submission first.
    pub async fn snapshots(&self) -> Vec<JobSnapshot> {
        let shared: Vec<SharedRecord> = self.records.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(shared.len());
        for record in shared {
            out.push(record.lock().await.snapshot());
        }
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }

    pub async fn remove(&self, id: &JobId) -> Option<SharedRecord> {
        self.records.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
