//! StateStore port - per-driver job queues and in-flight markers.

use async_trait::async_trait;

use crate::domain::{DriverId, DriverSpec, Job, JobId, Payload};
use crate::error::MondegoError;
use crate::observability::StoreCounts;

/// Holds a pending queue and an in-flight set per driver lane.
///
/// `pickup_job` must pop and mark in flight atomically: two loops on the same
/// driver never receive the same job. This is the only shared mutable resource
/// of the driver pool.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Pop the next pending job of `driver` and mark it in flight.
    async fn pickup_job(&self, driver: &DriverId) -> Result<Option<Job>, MondegoError>;

    /// Append a new job to the tail of `driver`'s queue.
    async fn queue_job(&self, driver: &DriverId, payload: Payload) -> Result<JobId, MondegoError>;

    /// Terminal success. Fails if the job is not in flight on `driver`.
    async fn resolve_job(&self, driver: &DriverId, job: JobId) -> Result<(), MondegoError>;

    /// Terminal failure. Fails if the job is not in flight on `driver`.
    async fn reject_job(&self, driver: &DriverId, job: JobId) -> Result<(), MondegoError>;

    /// Durable checkpoint.
    async fn save_state(&self) -> Result<(), MondegoError>;

    /// Restore the last checkpoint (boot).
    async fn load_state(&self) -> Result<(), MondegoError>;

    /// Every configured lane, destination included.
    fn drivers(&self) -> Vec<DriverSpec>;

    async fn counts(&self) -> StoreCounts;
}
