//! Execution outcome reported by the executor for one dispatched attempt.

use serde::{Deserialize, Serialize};

/// Result of a single attempt.
///
/// A failure here is ordinary input to the transition engine: it is recorded
/// on the job and decides retry vs. permanent failure. It is never surfaced as
/// a scheduler error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed { error: String },
}

impl ExecutionOutcome {
    pub fn success() -> Self {
        ExecutionOutcome::Succeeded
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ExecutionOutcome::Failed {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for ExecutionOutcome {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => ExecutionOutcome::Succeeded,
            Err(e) => ExecutionOutcome::failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_is_tagged() {
        let v = serde_json::to_value(ExecutionOutcome::failure("boom")).unwrap();
        assert_eq!(v, serde_json::json!({"outcome": "failed", "error": "boom"}));

        let v = serde_json::to_value(ExecutionOutcome::success()).unwrap();
        assert_eq!(v, serde_json::json!({"outcome": "succeeded"}));
    }

    #[test]
    fn converts_from_result() {
        let ok: Result<(), String> = Ok(());
        assert!(ExecutionOutcome::from(ok).is_success());

        let err: Result<(), String> = Err("disk full".to_string());
        assert_eq!(
            ExecutionOutcome::from(err),
            ExecutionOutcome::failure("disk full")
        );
    }
}
