//! IdGenerator port - mints job ids for callers without their own scheme.

use ulid::Ulid;

use crate::domain::JobId;
use crate::ports::Clock;

/// IdGenerator produces fresh, unique job ids.
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;
}

/// ULID-based generator (`job-<ULID>`).
///
/// The timestamp part comes from the injected clock, so ids minted under a
/// `FixedClock` share a deterministic prefix while staying unique.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        JobId::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);
        let id1 = id_gen.generate_job_id();
        let id2 = id_gen.generate_job_id();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("job-"));
    }

    #[test]
    fn fixed_clock_pins_the_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_job_id();
        let id2 = id_gen.generate_job_id();
        assert_ne!(id1, id2);

        let timestamp = |id: &JobId| {
            let ulid: Ulid = id.as_str().trim_start_matches("job-").parse().unwrap();
            ulid.timestamp_ms()
        };
        assert_eq!(timestamp(&id1), timestamp(&id2));
        assert_eq!(timestamp(&id1), fixed_time.timestamp_millis() as u64);
    }
}
