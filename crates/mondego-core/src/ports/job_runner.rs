//! JobRunner port - the business logic executed per job.

use async_trait::async_trait;

use crate::domain::{DriverSpec, FollowOn, Job};
use crate::error::MondegoError;

/// Maps (driver, job) to the follow-on work it produces.
///
/// An `Err` rejects the job. Nothing is resubmitted automatically; a runner that
/// wants another attempt must chain it through `FollowOn::on_driver`.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, driver: &DriverSpec, job: &Job) -> Result<FollowOn, MondegoError>;
}
