//! Configuration for mondego.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. path given on the command line
//!   2. $MONDEGO_CONFIG
//!   3. ./mondego.toml

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::{PacingPolicy, PoolPolicy};
use crate::domain::{DriverId, DriverSpec, Payload};
use crate::error::MondegoError;

pub const CONFIG_ENV: &str = "MONDEGO_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "mondego.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MondegoConfig {
    pub pacing: PacingConfig,
    pub pool: PoolConfig,
    pub state: StateConfig,
    pub sink: SinkConfig,
    pub ci: CiConfig,
    pub drivers: Vec<DriverConfig>,
    pub seeds: Vec<SeedConfig>,
    /// How often lane counts are logged.
    pub status_interval_ms: u64,
    /// Timeout of every upstream HTTP call.
    pub request_timeout_ms: u64,
}

/// Paced queue used for the CI crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub initial_delay_ms: u64,
    pub step_ms: u64,
    pub max_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub idle_limit_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub empty_backoff_ms: u64,
    pub failure_backoff_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// JSON checkpoint file. None = state is lost on exit.
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub url: String,
    /// Collection every record is written to.
    pub collection: String,
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CiConfig {
    /// CI server root. None = no crawl.
    pub url: Option<String>,
}

/// One driver lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub id: DriverId,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    /// Paginated API served by this lane. None = no fetch runner.
    #[serde(default)]
    pub upstream_url: Option<String>,
    /// Sent as `PRIVATE-TOKEN` on every upstream call.
    #[serde(default)]
    pub private_token: Option<String>,
}

/// A job queued at start-up when its lane is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfig {
    pub driver: DriverId,
    pub payload: Payload,
}

fn default_concurrency() -> u32 {
    1
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for MondegoConfig {
    fn default() -> Self {
        Self {
            pacing: PacingConfig::default(),
            pool: PoolConfig::default(),
            state: StateConfig::default(),
            sink: SinkConfig::default(),
            ci: CiConfig::default(),
            drivers: Vec::new(),
            seeds: Vec::new(),
            status_interval_ms: 30_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            step_ms: 100,
            max_delay_ms: 10_000,
            poll_interval_ms: 100,
            idle_limit_ms: 60_000,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            empty_backoff_ms: 1_000,
            failure_backoff_ms: 1_000,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            collection: "mondego".to_string(),
            probe_timeout_ms: 1_000,
        }
    }
}

// ── Typed views ───────────────────────────────────────────────────────────────

impl PacingConfig {
    pub fn policy(&self) -> PacingPolicy {
        PacingPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            step: Duration::from_millis(self.step_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            idle_limit: Duration::from_millis(self.idle_limit_ms),
        }
    }
}

impl PoolConfig {
    pub fn policy(&self) -> PoolPolicy {
        PoolPolicy {
            empty_backoff: Duration::from_millis(self.empty_backoff_ms),
            failure_backoff: Duration::from_millis(self.failure_backoff_ms),
        }
    }
}

impl SinkConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl DriverConfig {
    pub fn spec(&self) -> Result<DriverSpec, MondegoError> {
        DriverSpec::new(self.id.clone(), self.concurrency)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MondegoConfig {
    /// Load config: env vars → file → defaults, then validate.
    ///
    /// A missing file falls back to defaults unless the path was given
    /// explicitly.
    pub fn load(explicit: Option<&Path>) -> Result<Self, MondegoError> {
        let path = Self::file_path(explicit, std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| MondegoError::Config(format!("failed to read {}: {e}", path.display())))?;
            Self::from_toml_str(&text)
                .map_err(|e| MondegoError::Config(format!("{}: {e}", path.display())))?
        } else if explicit.is_some() {
            return Err(MondegoError::Config(format!(
                "config file {} does not exist",
                path.display()
            )));
        } else {
            MondegoConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path(explicit: Option<&Path>, from_env: Option<PathBuf>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or(from_env)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, MondegoError> {
        toml::from_str(text).map_err(|e| MondegoError::Config(e.to_string()))
    }

    /// Apply MONDEGO_* overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = lookup("MONDEGO_SINK__URL") {
            self.sink.url = v;
        }
        if let Some(v) = lookup("MONDEGO_SINK__COLLECTION") {
            self.sink.collection = v;
        }
        if let Some(v) = millis("MONDEGO_SINK__PROBE_TIMEOUT_MS") {
            self.sink.probe_timeout_ms = v;
        }
        if let Some(v) = lookup("MONDEGO_CI__URL") {
            self.ci.url = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = lookup("MONDEGO_STATE__SNAPSHOT_PATH") {
            self.state.snapshot_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = millis("MONDEGO_PACING__IDLE_LIMIT_MS") {
            self.pacing.idle_limit_ms = v;
        }
        if let Some(v) = millis("MONDEGO_POOL__EMPTY_BACKOFF_MS") {
            self.pool.empty_backoff_ms = v;
        }
        if let Some(v) = millis("MONDEGO_POOL__FAILURE_BACKOFF_MS") {
            self.pool.failure_backoff_ms = v;
        }
        if let Some(v) = millis("MONDEGO_STATUS_INTERVAL_MS") {
            self.status_interval_ms = v;
        }
    }

    pub fn validate(&self) -> Result<(), MondegoError> {
        let mut known: HashSet<&DriverId> = HashSet::new();
        for driver in &self.drivers {
            if !known.insert(&driver.id) {
                return Err(MondegoError::Config(format!(
                    "driver {} is configured twice",
                    driver.id
                )));
            }
            driver.spec()?;
        }

        let destination = DriverId::destination();
        for seed in &self.seeds {
            if seed.driver != destination && !known.contains(&seed.driver) {
                return Err(MondegoError::Config(format!(
                    "seed refers to unknown driver {}",
                    seed.driver
                )));
            }
        }

        if self.pacing.poll_interval_ms == 0 {
            return Err(MondegoError::Config("pacing.poll_interval_ms must be > 0".into()));
        }
        if self.status_interval_ms == 0 {
            return Err(MondegoError::Config("status_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Configured lanes. The store adds the destination lane if it is missing.
    pub fn driver_specs(&self) -> Result<Vec<DriverSpec>, MondegoError> {
        self.drivers.iter().map(DriverConfig::spec).collect()
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
