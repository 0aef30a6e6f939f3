//! Status views.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::DriverId;

/// Job counts for one driver lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub resolved: u64,
    pub rejected: u64,
}

/// Job counts for every lane, keyed by driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub lanes: BTreeMap<DriverId, LaneCounts>,
}

impl StoreCounts {
    pub fn lane(&self, driver: &DriverId) -> LaneCounts {
        self.lanes.get(driver).copied().unwrap_or_default()
    }

    pub fn total(&self) -> LaneCounts {
        self.lanes.values().fold(LaneCounts::default(), |acc, c| LaneCounts {
            pending: acc.pending + c.pending,
            in_flight: acc.in_flight + c.in_flight,
            resolved: acc.resolved + c.resolved,
            rejected: acc.rejected + c.rejected,
        })
    }

    /// True when nothing is pending or in flight on any lane.
    pub fn is_idle(&self) -> bool {
        let total = self.total();
        total.pending == 0 && total.in_flight == 0
    }
}
