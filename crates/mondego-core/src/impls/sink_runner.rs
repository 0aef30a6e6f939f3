use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{DriverSpec, FollowOn, Job};
use crate::error::MondegoError;
use crate::ports::{JobRunner, SinkRecord, SinkWriter};

/// Destination-lane runner: every payload is a [`SinkRecord`] to hand to the sink.
pub struct SinkRunner {
    sink: Arc<dyn SinkWriter>,
}

impl SinkRunner {
    pub fn new(sink: Arc<dyn SinkWriter>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl JobRunner for SinkRunner {
    async fn run(&self, _driver: &DriverSpec, job: &Job) -> Result<FollowOn, MondegoError> {
        let record: SinkRecord = serde_json::from_value(job.payload.clone())?;
        self.sink.write(record);
        Ok(FollowOn::none())
    }
}
