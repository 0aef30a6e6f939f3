//! Driver lanes.

use serde::{Deserialize, Serialize};

use super::ids::DriverId;
use crate::error::MondegoError;

/// A named lane of work with its own job queue and worker concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSpec {
    pub id: DriverId,

    /// Number of independent consumption loops. Always >= 1.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

fn default_concurrency() -> u32 {
    1
}

impl DriverSpec {
    pub fn new(id: impl Into<DriverId>, concurrency: u32) -> Result<Self, MondegoError> {
        let id = id.into();
        if concurrency == 0 {
            return Err(MondegoError::InvalidDriver {
                driver: id,
                reason: "concurrency must be at least 1".to_string(),
            });
        }
        Ok(Self { id, concurrency })
    }

    /// The reserved destination lane with a single loop.
    pub fn destination() -> Self {
        Self {
            id: DriverId::destination(),
            concurrency: 1,
        }
    }

    pub fn validate(&self) -> Result<(), MondegoError> {
        if self.concurrency == 0 {
            return Err(MondegoError::InvalidDriver {
                driver: self.id.clone(),
                reason: "concurrency must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
