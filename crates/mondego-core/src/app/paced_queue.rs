//! PacedQueue - single-lane, rate-adaptive serial drain.
//!
//! Calls against a slow or flaky upstream are queued here and executed strictly
//! one at a time. Each task resolves to a [`Pace`]: `SlowDown` grows the delay
//! before the next task by one step, `SpeedUp` shrinks it by one step. A failed
//! task is never put back.
//!
//! When the queue is observed empty for `idle_limit` in a row the drain loop
//! stops for good. From then on `enqueue` fails with `PacerStopped` and anything
//! still buffered is discarded.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pacing::{Pace, PaceState, PacingPolicy};
use crate::error::MondegoError;

/// A one-shot unit of work. Runs its own I/O and reports how to pace the next one.
pub type PacedTask = Pin<Box<dyn Future<Output = Pace> + Send + 'static>>;

/// Handle to a running paced queue. Cheap to clone; every clone feeds the same lane.
#[derive(Clone)]
pub struct PacedQueue {
    tx: mpsc::UnboundedSender<PacedTask>,
    state_rx: watch::Receiver<PaceState>,
}

impl PacedQueue {
    /// Start the drain loop. The join handle yields the final state once the
    /// idle limit stops the loop.
    pub fn spawn(policy: PacingPolicy) -> (Self, JoinHandle<PaceState>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = PaceState::new(&policy);
        let (state_tx, state_rx) = watch::channel(state);
        let join = tokio::spawn(drain_loop(rx, policy, state, state_tx));
        (Self { tx, state_rx }, join)
    }

    /// Append a task to the tail of the queue.
    pub fn enqueue<F>(&self, task: F) -> Result<(), MondegoError>
    where
        F: Future<Output = Pace> + Send + 'static,
    {
        self.tx
            .send(Box::pin(task))
            .map_err(|_| MondegoError::PacerStopped)
    }

    /// Latest published scheduler state.
    pub fn state(&self) -> PaceState {
        *self.state_rx.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the drain loop has stopped.
    pub async fn stopped(&self) {
        let mut rx = self.state_rx.clone();
        // Err means the loop is gone, which also counts as stopped.
        let _ = rx.wait_for(|s| s.stopped).await;
    }
}

async fn drain_loop(
    mut rx: mpsc::UnboundedReceiver<PacedTask>,
    policy: PacingPolicy,
    mut state: PaceState,
    state_tx: watch::Sender<PaceState>,
) -> PaceState {
    debug!(?policy, "paced queue started");

    loop {
        let delay = match rx.try_recv() {
            Ok(task) => {
                // spawned so a panicking task cannot take the lane down
                let pace = match tokio::spawn(task).await {
                    Ok(pace) => pace,
                    Err(err) => {
                        warn!(error = %err, "paced task aborted");
                        Pace::SlowDown
                    }
                };
                let delay = state.apply(pace, &policy);
                debug!(?pace, delay_ms = delay.as_millis() as u64, "paced task done");
                delay
            }
            Err(_) => {
                if !state.record_idle(&policy) {
                    break;
                }
                policy.poll_interval
            }
        };
        state_tx.send_replace(state);
        tokio::time::sleep(delay).await;
    }

    rx.close();
    let mut discarded = 0usize;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    state_tx.send_replace(state);

    info!(
        executed = state.executed,
        idle_ms = state.idle_accumulated.as_millis() as u64,
        discarded,
        "paced queue reached its idle limit, draining stopped"
    );
    state
}
