//! ReadinessGate - one-shot start-up barrier.
//!
//! Start-up actions registered before the sink is confirmed reachable wait here
//! and run once, in registration order, when the gate opens. The gate never
//! closes again.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

/// Zero-argument start-up action.
pub type GateAction = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Pending {
    open: bool,
    actions: Vec<GateAction>,
}

pub struct ReadinessGate {
    pending: Mutex<Pending>,
    open_tx: watch::Sender<bool>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (open_tx, _) = watch::channel(false);
        Self {
            pending: Mutex::new(Pending::default()),
            open_tx,
        }
    }

    // Actions never run under the lock, so a poisoned lock still holds consistent data.
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `action`, or run it right away if the gate is already open.
    pub fn when_ready<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = self.lock();
        if pending.open {
            drop(pending);
            action();
        } else {
            pending.actions.push(Box::new(action));
        }
    }

    /// Open the gate and run every queued action in FIFO order.
    ///
    /// Returns how many actions were released. Opening twice is a no-op.
    pub fn open(&self) -> usize {
        let actions = {
            let mut pending = self.lock();
            if pending.open {
                return 0;
            }
            pending.open = true;
            std::mem::take(&mut pending.actions)
        };

        let released = actions.len();
        debug!(released, "readiness gate opened");
        for action in actions {
            action();
        }
        self.open_tx.send_replace(true);
        released
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Resolves once the gate is open.
    pub async fn wait_open(&self) {
        let mut rx = self.open_tx.subscribe();
        // the sender lives in `self`, so this only ends when the gate opens
        let _ = rx.wait_for(|open| *open).await;
    }
}
