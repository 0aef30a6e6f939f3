//! Pacing policy: decides the delay between serial upstream calls.

use std::time::Duration;

use crate::error::UpstreamError;

/// Outcome signal a paced task hands back to its queue.
///
/// It only affects when the *next* task runs. The task that produced it is
/// consumed either way; nothing is resubmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    SlowDown,
    SpeedUp,
}

impl Pace {
    /// Transport errors and 5xx slow the lane down, everything else speeds it up.
    pub fn for_call<T>(result: &Result<T, UpstreamError>) -> Self {
        match result {
            Err(err) if err.is_upstream_fault() => Pace::SlowDown,
            _ => Pace::SpeedUp,
        }
    }
}

/// Step-wise pacing with an idle cut-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingPolicy {
    /// Delay before the first step after startup.
    pub initial_delay: Duration,

    /// Amount added by `SlowDown` and removed by `SpeedUp`.
    pub step: Duration,

    /// Upper clamp of the pacing delay.
    pub max_delay: Duration,

    /// How often an empty queue is polled.
    pub poll_interval: Duration,

    /// Idle time after which draining stops for good.
    pub idle_limit: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            step: Duration::from_millis(100),
            max_delay: Duration::from_millis(10_000),
            poll_interval: Duration::from_millis(100),
            idle_limit: Duration::from_millis(60_000),
        }
    }
}

impl PacingPolicy {
    pub fn slowed(&self, current: Duration) -> Duration {
        current.saturating_add(self.step).min(self.max_delay)
    }

    pub fn sped_up(&self, current: Duration) -> Duration {
        current.saturating_sub(self.step)
    }
}

/// Scheduler state owned by the single drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaceState {
    /// Always within `[0, max_delay]`.
    pub current_delay: Duration,

    /// Idle time observed since the last executed task.
    pub idle_accumulated: Duration,

    /// Number of tasks executed so far.
    pub executed: u64,

    /// Set once the idle limit was hit. Never cleared.
    pub stopped: bool,
}

impl PaceState {
    pub fn new(policy: &PacingPolicy) -> Self {
        Self {
            current_delay: policy.initial_delay.min(policy.max_delay),
            idle_accumulated: Duration::ZERO,
            executed: 0,
            stopped: false,
        }
    }

    /// Account for one executed task; returns the delay before the next step.
    pub fn apply(&mut self, pace: Pace, policy: &PacingPolicy) -> Duration {
        self.current_delay = match pace {
            Pace::SlowDown => policy.slowed(self.current_delay),
            Pace::SpeedUp => policy.sped_up(self.current_delay),
        };
        self.executed += 1;
        self.idle_accumulated = Duration::ZERO;
        self.current_delay
    }

    /// Account for one empty poll. Returns `false` once the idle limit is reached.
    pub fn record_idle(&mut self, policy: &PacingPolicy) -> bool {
        self.idle_accumulated = self
            .idle_accumulated
            .saturating_add(policy.poll_interval)
            .min(policy.idle_limit);
        if self.idle_accumulated >= policy.idle_limit {
            self.stopped = true;
        }
        !self.stopped
    }
}
