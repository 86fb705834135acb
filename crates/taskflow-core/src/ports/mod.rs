//! Ports - seams to the world outside the scheduler core.
//!
//! - `Clock`: time source for retry timers
//! - `Executor`: runs dispatched jobs and reports one outcome per dispatch
//! - `IdGenerator`: mints job ids

pub mod clock;
pub mod executor;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::{DispatchedJob, Executor};
pub use self::id_generator::{IdGenerator, UlidGenerator};
