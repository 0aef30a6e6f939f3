//! Jobs and the follow-on work they produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DriverId, JobId};

/// Opaque job payload, interpreted only by the job runner.
pub type Payload = serde_json::Value;

/// A unit of chainable work owned by exactly one driver lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub driver: DriverId,
    pub payload: Payload,
    pub queued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: JobId, driver: DriverId, payload: Payload, queued_at: DateTime<Utc>) -> Self {
        Self {
            id,
            driver,
            payload,
            queued_at,
        }
    }
}

/// Job lifecycle.
///
/// - Pending -> InFlight -> Resolved
/// - Pending -> InFlight -> Rejected
///
/// A job leaves the lane on its first terminal transition, so it can never be
/// both resolved and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    InFlight,
    Resolved,
    Rejected,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Resolved | JobState::Rejected)
    }
}

/// What a successful job run asks to be scheduled next.
///
/// `on_driver` payloads are queued on the lane that ran the job,
/// `on_destination` payloads on the reserved destination lane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowOn {
    #[serde(default)]
    pub on_driver: Vec<Payload>,
    #[serde(default)]
    pub on_destination: Vec<Payload>,
}

impl FollowOn {
    /// Ends the chain.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn on_driver(mut self, payload: Payload) -> Self {
        self.on_driver.push(payload);
        self
    }

    pub fn on_destination(mut self, payload: Payload) -> Self {
        self.on_destination.push(payload);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.on_driver.is_empty() && self.on_destination.is_empty()
    }

    pub fn len(&self) -> usize {
        self.on_driver.len() + self.on_destination.len()
    }
}
