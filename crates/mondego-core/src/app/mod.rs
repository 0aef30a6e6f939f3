//! Scheduling core (paced serial queue, driver pool, readiness gate, runner registry).

pub mod driver_pool;
pub mod gate;
pub mod paced_queue;
pub mod pacing;
pub mod registry;

pub use driver_pool::{DriverPool, PoolPolicy};
pub use gate::{GateAction, ReadinessGate};
pub use paced_queue::{PacedQueue, PacedTask};
pub use pacing::{Pace, PaceState, PacingPolicy};
pub use registry::RunnerRegistry;
