//! IdGenerator port.
//!
//! Job ids are minted by the state store when a job is queued. The generator
//! takes its timestamp from a `Clock`, so tests using `FixedClock` get ids with a
//! known time component.

use crate::domain::JobId;
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;
}

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
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        JobId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
