//! Per-status counts for observability.

use serde::{Deserialize, Serialize};

use crate::domain::JobStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerCounts {
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl SchedulerCounts {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Ready => self.ready += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Blocked => self.blocked += 1,
        }
    }

    pub fn get(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Ready => self.ready,
            JobStatus::Running => self.running,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Blocked => self.blocked,
        }
    }

    pub fn total(&self) -> usize {
        JobStatus::ALL.into_iter().map(|s| self.get(s)).sum()
    }

    /// Jobs that have not reached a terminal status.
    pub fn live(&self) -> usize {
        self.pending + self.ready + self.running
    }
}

impl FromIterator<JobStatus> for SchedulerCounts {
    fn from_iter<I: IntoIterator<Item = JobStatus>>(iter: I) -> Self {
        let mut counts = Self::default();
        for status in iter {
            counts.record(status);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_each_status() {
        let counts: SchedulerCounts = [
            JobStatus::Ready,
            JobStatus::Ready,
            JobStatus::Completed,
            JobStatus::Blocked,
        ]
        .into_iter()
        .collect();
        assert_eq!(counts.ready, 2);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.blocked, 1);
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.live(), 2);
    }

    #[test]
    fn serializes_with_status_names() {
        let value = serde_json::to_value(SchedulerCounts::default()).unwrap();
        for status in JobStatus::ALL {
            assert_eq!(value[status.as_str()], 0);
        }
    }
}
