//! Ports - contracts for the collaborators around the scheduling core.
//!
//! The core only talks to these traits. `impls` provides the in-memory and HTTP
//! implementations wired up by the CLI.

pub mod clock;
pub mod id_generator;
pub mod job_runner;
pub mod sink;
pub mod state_store;
pub mod upstream;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_runner::JobRunner;
pub use self::sink::{SinkRecord, SinkWriter};
pub use self::state_store::StateStore;
pub use self::upstream::{Fetched, UpstreamClient};
