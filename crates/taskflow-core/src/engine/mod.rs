//! Scheduling engine: dependency graph, transition rules and the job store.

pub mod dependency;
pub mod store;
pub mod transition;

pub use dependency::{DependencyGraph, DependencyState};
pub use store::JobStore;
pub use transition::{Applied, TransitionContext, Trigger, apply};
