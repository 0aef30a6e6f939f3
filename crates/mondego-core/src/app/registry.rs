use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{DriverId, DriverSpec, FollowOn, Job};
use crate::error::MondegoError;
use crate::ports::JobRunner;

/// Registry of runners (driver -> runner).
///
/// Built during start-up, read-only while the pool runs, so dispatch needs no
/// lock. The registry is itself a `JobRunner` and is what the pool receives.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: HashMap<DriverId, Arc<dyn JobRunner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self {
            runners: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        driver: DriverId,
        runner: Arc<dyn JobRunner>,
    ) -> Result<(), MondegoError> {
        if self.runners.contains_key(&driver) {
            return Err(MondegoError::DuplicateRunner(driver));
        }
        self.runners.insert(driver, runner);
        Ok(())
    }

    pub fn get(&self, driver: &DriverId) -> Option<&Arc<dyn JobRunner>> {
        self.runners.get(driver)
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

#[async_trait]
impl JobRunner for RunnerRegistry {
    async fn run(&self, driver: &DriverSpec, job: &Job) -> Result<FollowOn, MondegoError> {
        let runner = self
            .get(&driver.id)
            .ok_or_else(|| MondegoError::RunnerNotFound(driver.id.clone()))?;
        runner.run(driver, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use ulid::Ulid;

    struct EchoRunner;

    #[async_trait]
    impl JobRunner for EchoRunner {
        async fn run(&self, _driver: &DriverSpec, job: &Job) -> Result<FollowOn, MondegoError> {
            Ok(FollowOn::none().on_destination(job.payload.clone()))
        }
    }

    fn job(driver: &str) -> Job {
        Job::new(
            Ulid::new().into(),
            DriverId::new(driver),
            json!({"n": 1}),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn dispatches_to_the_registered_runner() {
        let mut reg = RunnerRegistry::new();
        reg.register(DriverId::new("gitlab"), Arc::new(EchoRunner))
            .unwrap();
        assert_eq!(reg.len(), 1);

        let spec = DriverSpec::new("gitlab", 1).unwrap();
        let next = reg.run(&spec, &job("gitlab")).await.unwrap();
        assert_eq!(next.on_destination, vec![json!({"n": 1})]);
    }

    #[tokio::test]
    async fn missing_runner_fails_the_job() {
        let reg = RunnerRegistry::new();
        assert!(reg.is_empty());
        let spec = DriverSpec::new("nobody", 1).unwrap();
        let err = reg.run(&spec, &job("nobody")).await.unwrap_err();
        assert!(matches!(err, MondegoError::RunnerNotFound(_)));
    }

    #[test]
    fn registering_a_driver_twice_is_an_error() {
        let mut reg = RunnerRegistry::new();
        reg.register(DriverId::new("d"), Arc::new(EchoRunner)).unwrap();
        let err = reg
            .register(DriverId::new("d"), Arc::new(EchoRunner))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
