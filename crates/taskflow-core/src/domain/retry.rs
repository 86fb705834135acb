//! Retry policy: decides whether a failed job gets another attempt and how
//! long it waits first.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_ATTEMPTS_RANGE: RangeInclusive<u32> = 1..=10;
pub const BASE_DELAY_RANGE: RangeInclusive<u32> = 1..=300;
pub const MAX_DELAY_RANGE: RangeInclusive<u32> = 1..=3600;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_SECONDS: u32 = 10;
const DEFAULT_MAX_DELAY_SECONDS: u32 = 300;

/// Delay growth pattern between retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay every retry.
    Fixed,

    /// Delay grows by `base_delay_seconds` each attempt.
    Linear,

    /// Delay doubles each attempt.
    #[default]
    Exponential,
}

impl BackoffStrategy {
    pub const ALL: [BackoffStrategy; 3] = [
        BackoffStrategy::Fixed,
        BackoffStrategy::Linear,
        BackoffStrategy::Exponential,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackoffStrategy::Fixed => "fixed",
            BackoffStrategy::Linear => "linear",
            BackoffStrategy::Exponential => "exponential",
        }
    }
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown backoff strategy: {0:?}")]
pub struct ParseStrategyError(pub String);

impl FromStr for BackoffStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackoffStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| ParseStrategyError(s.to_string()))
    }
}

/// One rejected field of a retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: &'static str,
    pub constraint: String,
    pub value: u32,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} must be {} (got {})", self.field, self.constraint, self.value)
    }
}

/// A retry policy was rejected at construction.
///
/// Every offending field is reported, not just the first one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid retry policy: {}", describe(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    /// Names of the rejected fields, in declaration order.
    pub fn fields(&self) -> Vec<&'static str> {
        self.violations.iter().map(|v| v.field).collect()
    }

    pub fn names(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn describe(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Retry policy for a job.
///
/// Immutable once built. The fields are private so the only way to obtain a
/// policy is through [`RetryPolicy::new`], the builder, `Default`, or
/// deserialization, all of which validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RetryPolicyFields")]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_strategy: BackoffStrategy,
    base_delay_seconds: u32,
    max_delay_seconds: u32,
}

/// Unvalidated wire shape; missing fields take the defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RetryPolicyFields {
    max_attempts: u32,
    backoff_strategy: BackoffStrategy,
    base_delay_seconds: u32,
    max_delay_seconds: u32,
}

impl Default for RetryPolicyFields {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_strategy: BackoffStrategy::default(),
            base_delay_seconds: DEFAULT_BASE_DELAY_SECONDS,
            max_delay_seconds: DEFAULT_MAX_DELAY_SECONDS,
        }
    }
}

impl TryFrom<RetryPolicyFields> for RetryPolicy {
    type Error = ValidationError;

    fn try_from(f: RetryPolicyFields) -> Result<Self, Self::Error> {
        RetryPolicy::new(
            f.max_attempts,
            f.backoff_strategy,
            f.base_delay_seconds,
            f.max_delay_seconds,
        )
    }
}

impl RetryPolicy {
    /// Validate and build a policy.
    pub fn new(
        max_attempts: u32,
        backoff_strategy: BackoffStrategy,
        base_delay_seconds: u32,
        max_delay_seconds: u32,
    ) -> Result<Self, ValidationError> {
        let mut violations = Vec::new();
        check_range(&mut violations, "max_attempts", max_attempts, &MAX_ATTEMPTS_RANGE);
        check_range(
            &mut violations,
            "base_delay_seconds",
            base_delay_seconds,
            &BASE_DELAY_RANGE,
        );
        check_range(
            &mut violations,
            "max_delay_seconds",
            max_delay_seconds,
            &MAX_DELAY_RANGE,
        );
        if max_delay_seconds < base_delay_seconds {
            violations.push(FieldViolation {
                field: "max_delay_seconds",
                constraint: format!(">= base_delay_seconds ({base_delay_seconds})"),
                value: max_delay_seconds,
            });
        }

        if !violations.is_empty() {
            return Err(ValidationError { violations });
        }
        Ok(Self {
            max_attempts,
            backoff_strategy,
            base_delay_seconds,
            max_delay_seconds,
        })
    }

    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff_strategy(&self) -> BackoffStrategy {
        self.backoff_strategy
    }

    pub fn base_delay_seconds(&self) -> u32 {
        self.base_delay_seconds
    }

    pub fn max_delay_seconds(&self) -> u32 {
        self.max_delay_seconds
    }

    /// Delay in seconds before the next attempt.
    ///
    /// `attempt_number` is the 1-based index of the attempt that just failed
    /// (0 is treated as 1). Example with base=10, max=300, exponential:
    /// attempt 1 -> 10s, 2 -> 20s, 3 -> 40s, ..., 6 -> 300s (clamped).
    pub fn compute_delay(&self, attempt_number: u32) -> u32 {
        let n = attempt_number.max(1);
        let base = u64::from(self.base_delay_seconds);
        let raw = match self.backoff_strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(u64::from(n)),
            BackoffStrategy::Exponential => 2u64
                .checked_pow(n - 1)
                .map_or(u64::MAX, |factor| base.saturating_mul(factor)),
        };
        // max_delay_seconds fits in u32, so the clamped value does too.
        raw.min(u64::from(self.max_delay_seconds)) as u32
    }

    /// [`compute_delay`](Self::compute_delay) as a `Duration`.
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        Duration::from_secs(u64::from(self.compute_delay(attempt_number)))
    }

    /// May a job that has consumed `attempt_count` attempts run again?
    pub fn has_attempts_remaining(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }
}

impl Default for RetryPolicy {
    /// 3 attempts, exponential backoff, 10s base, 300s cap.
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_strategy: BackoffStrategy::Exponential,
            base_delay_seconds: DEFAULT_BASE_DELAY_SECONDS,
            max_delay_seconds: DEFAULT_MAX_DELAY_SECONDS,
        }
    }
}

fn check_range(
    violations: &mut Vec<FieldViolation>,
    field: &'static str,
    value: u32,
    range: &RangeInclusive<u32>,
) {
    if !range.contains(&value) {
        violations.push(FieldViolation {
            field,
            constraint: format!("between {} and {}", range.start(), range.end()),
            value,
        });
    }
}

/// Overrides any subset of the default policy, validating on `build()`.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    fields: RetryPolicyFields,
}

impl RetryPolicyBuilder {
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.fields.max_attempts = max_attempts;
        self
    }

    pub fn backoff_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.fields.backoff_strategy = strategy;
        self
    }

    pub fn base_delay_seconds(mut self, seconds: u32) -> Self {
        self.fields.base_delay_seconds = seconds;
        self
    }

    pub fn max_delay_seconds(mut self, seconds: u32) -> Self {
        self.fields.max_delay_seconds = seconds;
        self
    }

    pub fn build(self) -> Result<RetryPolicy, ValidationError> {
        RetryPolicy::try_from(self.fields)
    }
}
