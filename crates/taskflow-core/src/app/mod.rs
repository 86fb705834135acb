//! Application layer: configuration, the scheduler loop and its counters.

pub mod config;
pub mod scheduler;
pub mod status;

pub use config::{CONFIG_ENV_VAR, ConfigError, SchedulerConfig};
pub use scheduler::{JobSubmission, Scheduler, SchedulerBuilder, SchedulerHandle};
pub use status::SchedulerCounts;
