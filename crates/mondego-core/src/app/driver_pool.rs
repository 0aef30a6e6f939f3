//! DriverPool - concurrent consumption loops over the state store.
//!
//! Every driver lane gets `concurrency` independent loops. One iteration is
//! pickup -> run -> queue follow-ons -> resolve -> checkpoint. A rejected job
//! is never retried here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{DriverId, DriverSpec, FollowOn, Job};
use crate::error::MondegoError;
use crate::ports::{JobRunner, StateStore};

/// Backoffs applied between iterations of one loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPolicy {
    /// Wait after finding the lane empty.
    pub empty_backoff: Duration,

    /// Wait after a rejected job or a state store fault.
    pub failure_backoff: Duration,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            empty_backoff: Duration::from_millis(1_000),
            failure_backoff: Duration::from_millis(1_000),
        }
    }
}

/// Running driver loops.
/// - dropping the pool stops every loop at its next check
/// - `stop_and_join()` lets in-flight jobs finish
pub struct DriverPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl DriverPool {
    /// Spawn the loops for every lane the store knows, destination included.
    pub fn start(
        store: Arc<dyn StateStore>,
        runner: Arc<dyn JobRunner>,
        policy: PoolPolicy,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::new();
        for driver in store.drivers() {
            let driver = Arc::new(driver);
            info!(driver = %driver.id, concurrency = driver.concurrency, "starting driver loops");

            for loop_id in 0..driver.concurrency {
                let ctx = LoopContext {
                    loop_id,
                    driver: Arc::clone(&driver),
                    store: Arc::clone(&store),
                    runner: Arc::clone(&runner),
                    policy: policy.clone(),
                };
                joins.push(tokio::spawn(driver_loop(ctx, shutdown_rx.clone())));
            }
        }

        Self { shutdown_tx, joins }
    }

    /// Number of spawned loops across all lanes.
    pub fn loop_count(&self) -> usize {
        self.joins.len()
    }

    /// Loops stop taking new jobs. A job already picked up runs to completion.
    pub fn request_stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub async fn stop_and_join(self) {
        self.request_stop();
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "driver loop panicked");
            }
        }
    }
}

struct LoopContext {
    loop_id: u32,
    driver: Arc<DriverSpec>,
    store: Arc<dyn StateStore>,
    runner: Arc<dyn JobRunner>,
    policy: PoolPolicy,
}

/// What one iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Resolved,
    Empty,
    Rejected,
}

async fn driver_loop(ctx: LoopContext, mut shutdown_rx: watch::Receiver<bool>) {
    let driver = &ctx.driver.id;
    debug!(driver = %driver, loop_id = ctx.loop_id, "driver loop started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let backoff = match run_once(&ctx).await {
            Ok(Step::Resolved) => None,
            Ok(Step::Empty) => Some(ctx.policy.empty_backoff),
            Ok(Step::Rejected) => Some(ctx.policy.failure_backoff),
            Err(err) => {
                error!(driver = %driver, loop_id = ctx.loop_id, error = %err, "state store fault");
                Some(ctx.policy.failure_backoff)
            }
        };

        match backoff {
            None => tokio::task::yield_now().await,
            Some(delay) => {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // sender gone means the pool was dropped
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    debug!(driver = %driver, loop_id = ctx.loop_id, "driver loop stopped");
}

async fn run_once(ctx: &LoopContext) -> Result<Step, MondegoError> {
    let driver = &ctx.driver.id;
    let Some(job) = ctx.store.pickup_job(driver).await? else {
        return Ok(Step::Empty);
    };
    debug!(driver = %driver, job_id = %job.id, "job picked up");

    match run_isolated(ctx, &job).await {
        Ok(next) => {
            if let Err(err) = complete(ctx, &job, next).await {
                // keep the job from lingering in flight; after a resolve this is a no-op
                if ctx.store.reject_job(driver, job.id).await.is_ok() {
                    warn!(driver = %driver, job_id = %job.id, "job rejected after store fault");
                }
                return Err(err);
            }
            debug!(driver = %driver, job_id = %job.id, "job resolved");
            Ok(Step::Resolved)
        }
        Err(err) => {
            warn!(driver = %driver, job_id = %job.id, error = %err, "job rejected");
            ctx.store.reject_job(driver, job.id).await?;
            Ok(Step::Rejected)
        }
    }
}

/// Run the job on its own task so a panicking runner rejects the job instead
/// of ending the loop.
async fn run_isolated(ctx: &LoopContext, job: &Job) -> Result<FollowOn, MondegoError> {
    let runner = Arc::clone(&ctx.runner);
    let spec = Arc::clone(&ctx.driver);
    let job = job.clone();
    match tokio::spawn(async move { runner.run(&spec, &job).await }).await {
        Ok(result) => result,
        Err(err) => Err(MondegoError::job(format!("runner aborted: {err}"))),
    }
}

/// Queue the follow-ons, then resolve, then checkpoint.
async fn complete(
    ctx: &LoopContext,
    job: &Job,
    next: FollowOn,
) -> Result<(), MondegoError> {
    let driver = &ctx.driver.id;
    let destination = DriverId::destination();

    for payload in next.on_driver {
        ctx.store.queue_job(driver, payload).await?;
    }
    for payload in next.on_destination {
        ctx.store.queue_job(&destination, payload).await?;
    }
    ctx.store.resolve_job(driver, job.id).await?;
    ctx.store.save_state().await
}
