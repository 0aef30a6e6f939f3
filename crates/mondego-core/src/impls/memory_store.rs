//! In-memory state store with an optional JSON snapshot file.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{DriverId, DriverSpec, Job, JobId, JobState, Payload};
use crate::error::MondegoError;
use crate::observability::{LaneCounts, StoreCounts};
use crate::ports::{Clock, IdGenerator, StateStore, SystemClock, UlidGenerator};

/// Terminal outcomes remembered per lane for `job_state`.
const FINISHED_HISTORY: usize = 1_024;

/// One driver's queue plus the jobs currently handed out to its loops.
#[derive(Debug, Default)]
struct Lane {
    pending: VecDeque<Job>,
    in_flight: HashMap<JobId, Job>,
    resolved: u64,
    rejected: u64,
    /// Most recent terminal outcomes, oldest first.
    finished: VecDeque<(JobId, JobState)>,
}

impl Lane {
    /// Move an in-flight job to a terminal state.
    fn finish(
        &mut self,
        driver: &DriverId,
        job: JobId,
        state: JobState,
    ) -> Result<(), MondegoError> {
        if self.in_flight.remove(&job).is_none() {
            return Err(MondegoError::NotInFlight {
                driver: driver.clone(),
                job,
            });
        }
        match state {
            JobState::Rejected => self.rejected += 1,
            _ => self.resolved += 1,
        }
        if self.finished.len() == FINISHED_HISTORY {
            self.finished.pop_front();
        }
        self.finished.push_back((job, state));
        Ok(())
    }

    fn state_of(&self, job: JobId) -> Option<JobState> {
        if self.in_flight.contains_key(&job) {
            return Some(JobState::InFlight);
        }
        if self.pending.iter().any(|j| j.id == job) {
            return Some(JobState::Pending);
        }
        self.finished
            .iter()
            .rev()
            .find(|(id, _)| *id == job)
            .map(|(_, state)| *state)
    }

    fn counts(&self) -> LaneCounts {
        LaneCounts {
            pending: self.pending.len(),
            in_flight: self.in_flight.len(),
            resolved: self.resolved,
            rejected: self.rejected,
        }
    }

    fn snapshot(&self) -> LaneSnapshot {
        let mut in_flight: Vec<Job> = self.in_flight.values().cloned().collect();
        in_flight.sort_by_key(|job| job.id);
        LaneSnapshot {
            pending: self.pending.iter().cloned().collect(),
            in_flight,
            resolved: self.resolved,
            rejected: self.rejected,
        }
    }

    /// Jobs that were in flight at checkpoint time never finished, so they go
    /// back to the head of the queue.
    fn restore(snapshot: LaneSnapshot) -> Self {
        let mut pending: VecDeque<Job> = snapshot.in_flight.into_iter().collect();
        pending.extend(snapshot.pending);
        Self {
            pending,
            in_flight: HashMap::new(),
            resolved: snapshot.resolved,
            rejected: snapshot.rejected,
            finished: VecDeque::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LaneSnapshot {
    pending: Vec<Job>,
    in_flight: Vec<Job>,
    resolved: u64,
    rejected: u64,
}

/// On-disk checkpoint format.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    saved_at: DateTime<Utc>,
    lanes: BTreeMap<DriverId, LaneSnapshot>,
}

/// Per-driver job lanes behind a single lock.
///
/// Every operation takes the lock once and never awaits while holding it, so
/// `pickup_job` pops and marks in flight atomically. The destination lane always
/// exists.
pub struct InMemoryStateStore {
    drivers: Vec<DriverSpec>,
    lanes: Mutex<BTreeMap<DriverId, Lane>>,
    snapshot_path: Option<PathBuf>,
    /// Serializes snapshot writers so they never share the temp file.
    save_lock: Mutex<()>,
    ids: Box<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStateStore {
    pub fn new(drivers: Vec<DriverSpec>) -> Result<Self, MondegoError> {
        let mut specs: Vec<DriverSpec> = Vec::with_capacity(drivers.len() + 1);
        for spec in drivers {
            spec.validate()?;
            if specs.iter().any(|s| s.id == spec.id) {
                return Err(MondegoError::InvalidDriver {
                    driver: spec.id,
                    reason: "configured twice".to_string(),
                });
            }
            specs.push(spec);
        }
        if !specs.iter().any(|s| s.id.is_destination()) {
            specs.push(DriverSpec::destination());
        }

        let lanes = specs
            .iter()
            .map(|s| (s.id.clone(), Lane::default()))
            .collect();

        Ok(Self {
            drivers: specs,
            lanes: Mutex::new(lanes),
            snapshot_path: None,
            save_lock: Mutex::new(()),
            ids: Box::new(UlidGenerator::new(SystemClock)),
            clock: Arc::new(SystemClock),
        })
    }

    /// Persist checkpoints to `path` and restore from it in `load_state`.
    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn with_clock<C: Clock + Clone + 'static>(mut self, clock: C) -> Self {
        self.ids = Box::new(UlidGenerator::new(clock.clone()));
        self.clock = Arc::new(clock);
        self
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Where a job stands on its lane. Terminal outcomes are kept for the last
    /// `FINISHED_HISTORY` jobs of the lane and are not part of the snapshot;
    /// older or unknown ids yield `None`.
    pub async fn job_state(
        &self,
        driver: &DriverId,
        job: JobId,
    ) -> Result<Option<JobState>, MondegoError> {
        let lanes = self.lanes.lock().await;
        let lane = lanes
            .get(driver)
            .ok_or_else(|| MondegoError::UnknownDriver(driver.clone()))?;
        Ok(lane.state_of(job))
    }

    /// Pending jobs of a lane in pickup order.
    pub async fn pending_jobs(&self, driver: &DriverId) -> Result<Vec<Job>, MondegoError> {
        let lanes = self.lanes.lock().await;
        let lane = lanes
            .get(driver)
            .ok_or_else(|| MondegoError::UnknownDriver(driver.clone()))?;
        Ok(lane.pending.iter().cloned().collect())
    }

    async fn write_snapshot(&self, path: &Path, bytes: Vec<u8>) -> Result<(), MondegoError> {
        let _guard = self.save_lock.lock().await;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn pickup_job(&self, driver: &DriverId) -> Result<Option<Job>, MondegoError> {
        let mut lanes = self.lanes.lock().await;
        let lane = lanes
            .get_mut(driver)
            .ok_or_else(|| MondegoError::UnknownDriver(driver.clone()))?;

        let Some(job) = lane.pending.pop_front() else {
            return Ok(None);
        };
        lane.in_flight.insert(job.id, job.clone());
        Ok(Some(job))
    }

    async fn queue_job(&self, driver: &DriverId, payload: Payload) -> Result<JobId, MondegoError> {
        let job = Job::new(
            self.ids.generate_job_id(),
            driver.clone(),
            payload,
            self.clock.now(),
        );
        let id = job.id;

        let mut lanes = self.lanes.lock().await;
        let lane = lanes
            .get_mut(driver)
            .ok_or_else(|| MondegoError::UnknownDriver(driver.clone()))?;
        lane.pending.push_back(job);
        Ok(id)
    }

    async fn resolve_job(&self, driver: &DriverId, job: JobId) -> Result<(), MondegoError> {
        let mut lanes = self.lanes.lock().await;
        lanes
            .get_mut(driver)
            .ok_or_else(|| MondegoError::UnknownDriver(driver.clone()))?
            .finish(driver, job, JobState::Resolved)
    }

    async fn reject_job(&self, driver: &DriverId, job: JobId) -> Result<(), MondegoError> {
        let mut lanes = self.lanes.lock().await;
        lanes
            .get_mut(driver)
            .ok_or_else(|| MondegoError::UnknownDriver(driver.clone()))?
            .finish(driver, job, JobState::Rejected)
    }

    async fn save_state(&self) -> Result<(), MondegoError> {
        let Some(path) = self.snapshot_path.as_deref() else {
            return Ok(());
        };

        let snapshot = {
            let lanes = self.lanes.lock().await;
            Snapshot {
                saved_at: self.clock.now(),
                lanes: lanes
                    .iter()
                    .map(|(id, lane)| (id.clone(), lane.snapshot()))
                    .collect(),
            }
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        self.write_snapshot(path, bytes).await
    }

    async fn load_state(&self) -> Result<(), MondegoError> {
        let Some(path) = self.snapshot_path.as_deref() else {
            return Ok(());
        };
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no snapshot yet, starting empty");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;

        let mut lanes = self.lanes.lock().await;
        let mut restored = 0usize;
        for (driver, lane_snapshot) in snapshot.lanes {
            let Some(lane) = lanes.get_mut(&driver) else {
                warn!(
                    driver = %driver,
                    jobs = lane_snapshot.pending.len() + lane_snapshot.in_flight.len(),
                    "snapshot lane is not configured, skipping its jobs"
                );
                continue;
            };
            *lane = Lane::restore(lane_snapshot);
            restored += lane.pending.len();
        }
        info!(
            path = %path.display(),
            saved_at = %snapshot.saved_at,
            restored,
            "state restored"
        );
        Ok(())
    }

    fn drivers(&self) -> Vec<DriverSpec> {
        self.drivers.clone()
    }

    async fn counts(&self) -> StoreCounts {
        let lanes = self.lanes.lock().await;
        StoreCounts {
            lanes: lanes
                .iter()
                .map(|(id, lane)| (id.clone(), lane.counts()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use serde_json::json;

    fn store() -> InMemoryStateStore {
        InMemoryStateStore::new(vec![DriverSpec::new("d1", 2).unwrap()]).unwrap()
    }

    fn d1() -> DriverId {
        DriverId::new("d1")
    }

    #[tokio::test]
    async fn destination_lane_is_always_present() {
        let store = store();
        let ids: Vec<_> = store.drivers().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![d1(), DriverId::destination()]);
    }

    #[tokio::test]
    async fn configured_destination_keeps_its_concurrency() {
        let store = InMemoryStateStore::new(vec![DriverSpec::new("destination", 3).unwrap()]).unwrap();
        let drivers = store.drivers();
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].concurrency, 3);
    }

    #[tokio::test]
    async fn duplicate_driver_is_rejected() {
        let result = InMemoryStateStore::new(vec![
            DriverSpec::new("d1", 1).unwrap(),
            DriverSpec::new("d1", 2).unwrap(),
        ]);
        assert!(matches!(result, Err(MondegoError::InvalidDriver { .. })));
    }

    #[tokio::test]
    async fn pickup_is_fifo_and_marks_in_flight() {
        let store = store();
        let first = store.queue_job(&d1(), json!("x")).await.unwrap();
        let second = store.queue_job(&d1(), json!("y")).await.unwrap();

        let job = store.pickup_job(&d1()).await.unwrap().unwrap();
        assert_eq!(job.id, first);
        assert_eq!(job.payload, json!("x"));
        assert_eq!(job.driver, d1());

        let counts = store.counts().await.lane(&d1());
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.in_flight, 1);

        let job = store.pickup_job(&d1()).await.unwrap().unwrap();
        assert_eq!(job.id, second);
        assert!(store.pickup_job(&d1()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_pickups_never_share_a_job() {
        let store = Arc::new(store());
        for i in 0..200 {
            store.queue_job(&d1(), json!(i)).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                while let Some(job) = store.pickup_job(&d1()).await.unwrap() {
                    mine.push(job.id);
                }
                mine
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 200);
        assert_eq!(all.len(), 200);
    }

    #[tokio::test]
    async fn resolve_and_reject_are_terminal_and_exclusive() {
        let store = store();
        store.queue_job(&d1(), json!("x")).await.unwrap();
        let job = store.pickup_job(&d1()).await.unwrap().unwrap();

        store.resolve_job(&d1(), job.id).await.unwrap();
        let err = store.reject_job(&d1(), job.id).await.unwrap_err();
        assert!(matches!(err, MondegoError::NotInFlight { .. }));
        let err = store.resolve_job(&d1(), job.id).await.unwrap_err();
        assert!(matches!(err, MondegoError::NotInFlight { .. }));

        let counts = store.counts().await.lane(&d1());
        assert_eq!(counts.resolved, 1);
        assert_eq!(counts.rejected, 0);
        assert_eq!(counts.in_flight, 0);
    }

    #[tokio::test]
    async fn job_state_follows_the_lifecycle() {
        let store = store();
        let kept = store.queue_job(&d1(), json!("kept")).await.unwrap();
        let dropped = store.queue_job(&d1(), json!("dropped")).await.unwrap();
        assert_eq!(store.job_state(&d1(), kept).await.unwrap(), Some(JobState::Pending));

        store.pickup_job(&d1()).await.unwrap();
        store.pickup_job(&d1()).await.unwrap();
        assert_eq!(store.job_state(&d1(), kept).await.unwrap(), Some(JobState::InFlight));

        store.resolve_job(&d1(), kept).await.unwrap();
        store.reject_job(&d1(), dropped).await.unwrap();
        let kept_state = store.job_state(&d1(), kept).await.unwrap();
        assert_eq!(kept_state, Some(JobState::Resolved));
        assert!(kept_state.is_some_and(JobState::is_terminal));
        assert_eq!(store.job_state(&d1(), dropped).await.unwrap(), Some(JobState::Rejected));

        let other = store.ids.generate_job_id();
        assert_eq!(store.job_state(&d1(), other).await.unwrap(), None);
        assert!(store.job_state(&DriverId::new("ghost"), kept).await.is_err());
    }

    #[tokio::test]
    async fn finished_history_is_bounded() {
        let store = store();
        let first = store.queue_job(&d1(), json!(0)).await.unwrap();
        for i in 1..=FINISHED_HISTORY {
            store.queue_job(&d1(), json!(i)).await.unwrap();
        }
        while let Some(job) = store.pickup_job(&d1()).await.unwrap() {
            store.resolve_job(&d1(), job.id).await.unwrap();
        }

        assert_eq!(store.job_state(&d1(), first).await.unwrap(), None);
        assert_eq!(store.counts().await.lane(&d1()).resolved, FINISHED_HISTORY as u64 + 1);
    }

    #[tokio::test]
    async fn resolving_a_pending_job_fails() {
        let store = store();
        let id = store.queue_job(&d1(), json!("x")).await.unwrap();
        assert!(store.resolve_job(&d1(), id).await.is_err());
    }

    #[tokio::test]
    async fn unknown_driver_is_an_error() {
        let store = store();
        let nope = DriverId::new("nope");
        assert!(matches!(
            store.queue_job(&nope, json!(1)).await,
            Err(MondegoError::UnknownDriver(_))
        ));
        assert!(matches!(
            store.pickup_job(&nope).await,
            Err(MondegoError::UnknownDriver(_))
        ));
    }

    #[tokio::test]
    async fn fixed_clock_stamps_queued_jobs() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let store = store().with_clock(FixedClock::new(at));
        store.queue_job(&d1(), json!(1)).await.unwrap();
        let job = store.pickup_job(&d1()).await.unwrap().unwrap();
        assert_eq!(job.queued_at, at);
        assert_eq!(job.id.as_ulid().timestamp_ms(), at.timestamp_millis() as u64);
    }

    #[tokio::test]
    async fn snapshot_round_trip_requeues_in_flight_jobs_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("mondego.json");

        let store = store().with_snapshot(&path);
        store.queue_job(&d1(), json!("a")).await.unwrap();
        store.queue_job(&d1(), json!("b")).await.unwrap();
        store.queue_job(&d1(), json!("c")).await.unwrap();
        let a = store.pickup_job(&d1()).await.unwrap().unwrap();
        store.resolve_job(&d1(), a.id).await.unwrap();
        let b = store.pickup_job(&d1()).await.unwrap().unwrap();
        store.save_state().await.unwrap();
        assert!(path.exists());

        let restored = self::store().with_snapshot(&path);
        restored.load_state().await.unwrap();

        let pending = restored.pending_jobs(&d1()).await.unwrap();
        let payloads: Vec<_> = pending.iter().map(|j| j.payload.clone()).collect();
        assert_eq!(payloads, vec![json!("b"), json!("c")]);
        assert_eq!(pending[0].id, b.id);

        let counts = restored.counts().await.lane(&d1());
        assert_eq!(counts.resolved, 1);
        assert_eq!(counts.in_flight, 0);
    }

    #[tokio::test]
    async fn missing_snapshot_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store().with_snapshot(dir.path().join("absent.json"));
        store.load_state().await.unwrap();
        assert!(store.counts().await.is_idle());
    }

    #[tokio::test]
    async fn snapshot_lanes_that_are_no_longer_configured_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mondego.json");

        let old = InMemoryStateStore::new(vec![DriverSpec::new("retired", 1).unwrap()])
            .unwrap()
            .with_snapshot(&path);
        old.queue_job(&DriverId::new("retired"), json!(1)).await.unwrap();
        old.queue_job(&DriverId::destination(), json!(2)).await.unwrap();
        old.save_state().await.unwrap();

        let store = store().with_snapshot(&path);
        store.load_state().await.unwrap();
        let counts = store.counts().await;
        assert_eq!(counts.lane(&DriverId::destination()).pending, 1);
        assert_eq!(counts.lane(&d1()).pending, 0);
    }

    #[tokio::test]
    async fn save_without_snapshot_path_is_a_no_op() {
        let store = store();
        store.queue_job(&d1(), json!(1)).await.unwrap();
        store.save_state().await.unwrap();
        store.load_state().await.unwrap();
        assert_eq!(store.counts().await.lane(&d1()).pending, 1);
    }
}
