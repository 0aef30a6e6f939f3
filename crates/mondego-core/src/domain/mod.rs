//! Domain model (ids, driver lanes, jobs, follow-on work).

pub mod driver;
pub mod ids;
pub mod job;

pub use driver::DriverSpec;
pub use ids::{DriverId, Id, IdMarker, JobId};
pub use job::{FollowOn, Job, JobState, Payload};
