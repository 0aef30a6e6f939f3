//! mondego-core
//!
//! Scheduling core of the mondego sync daemon.
//!
//! # Modules
//! - **domain**: ids, driver lanes, jobs, follow-on work
//! - **ports**: contracts around the core (StateStore, JobRunner, SinkWriter, UpstreamClient, Clock)
//! - **app**: paced serial queue, driver pool, readiness gate, runner registry
//! - **impls**: in-memory state store, HTTP upstream/sink, fetch and CI runners
//! - **config**: TOML configuration with env overrides
//! - **observability**: status views

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{
    DriverPool, Pace, PaceState, PacedQueue, PacingPolicy, PoolPolicy, ReadinessGate,
    RunnerRegistry,
};
pub use config::MondegoConfig;
pub use domain::{DriverId, DriverSpec, FollowOn, Job, JobId, JobState, Payload};
pub use error::{MondegoError, UpstreamError};
pub use observability::{LaneCounts, StoreCounts};
