//! mondego: syncs CI and source-control activity into a document store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

use mondego_core::app::{DriverPool, PacedQueue, ReadinessGate, RunnerRegistry};
use mondego_core::config::MondegoConfig;
use mondego_core::domain::DriverId;
use mondego_core::impls::{
    CiCrawler, HttpSink, HttpUpstream, InMemoryStateStore, MemorySink, PagedFetchRunner,
    SinkRunner,
};
use mondego_core::ports::{SinkWriter, StateStore};
use mondego_core::StoreCounts;

#[derive(Parser, Debug)]
#[command(name = "mondego")]
#[command(about = "Sync CI builds and source-control activity into a document store")]
#[command(version)]
struct Args {
    /// Config file. Defaults to $MONDEGO_CONFIG, then ./mondego.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep records in memory instead of writing them to the sink.
    #[arg(long, env = "MONDEGO_DRY_RUN")]
    dry_run: bool,

    /// With --dry-run, write the captured records to this file on shutdown.
    #[arg(long, requires = "dry_run")]
    dump_records: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = MondegoConfig::load(args.config.as_deref()).context("failed to load config")?;
    tracing::info!(
        drivers = config.drivers.len(),
        seeds = config.seeds.len(),
        ci = config.ci.url.is_some(),
        dry_run = args.dry_run,
        "mondego starting"
    );

    // ── State ────────────────────────────────────────────────────────────────
    let mut store = InMemoryStateStore::new(config.driver_specs()?)?;
    if let Some(path) = &config.state.snapshot_path {
        store = store.with_snapshot(path);
    }
    let store = Arc::new(store);
    store.load_state().await.context("failed to restore state")?;
    seed(&store, &config).await?;

    // ── Sink ─────────────────────────────────────────────────────────────────
    let captured = args.dry_run.then(|| Arc::new(MemorySink::new()));
    let sink: Arc<dyn SinkWriter> = match &captured {
        Some(memory) => memory.clone() as Arc<dyn SinkWriter>,
        None => Arc::new(HttpSink::new(
            &config.sink.url,
            config.request_timeout(),
            config.sink.probe_timeout(),
        )?),
    };

    let registry = Arc::new(build_registry(&config, sink.clone())?);
    tracing::info!(runners = registry.len(), "runners registered");

    // ── Start-up actions, released once the sink answers ────────────────────
    let gate = ReadinessGate::new();

    let (pool_tx, pool_rx) = oneshot::channel();
    {
        let store = store.clone();
        let policy = config.pool.policy();
        gate.when_ready(move || {
            let pool = DriverPool::start(store, registry, policy);
            tracing::info!(loops = pool.loop_count(), "driver pool started");
            let _ = pool_tx.send(pool);
        });
    }

    let crawl_queue = match &config.ci.url {
        Some(url) => {
            let (queue, _join) = PacedQueue::spawn(config.pacing.policy());
            let upstream = Arc::new(HttpUpstream::new(config.request_timeout())?);
            let crawler = CiCrawler::new(
                url,
                upstream,
                sink.clone(),
                config.sink.collection.clone(),
                queue.clone(),
            )?;
            gate.when_ready(move || {
                if let Err(e) = crawler.start() {
                    tracing::error!(error = %e, "CI crawl could not start");
                }
            });
            Some(queue)
        }
        None => None,
    };

    match tokio::time::timeout(config.sink.probe_timeout(), sink.ping()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e).context("sink is not reachable"),
        Err(_) => anyhow::bail!("sink probe timed out after {:?}", config.sink.probe_timeout()),
    }
    let released = gate.open();
    tracing::info!(released, "sink ready, start-up actions released");

    let pool = pool_rx.await.context("driver pool did not start")?;

    // ── Run until Ctrl-C ─────────────────────────────────────────────────────
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(config.status_interval());
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("failed to listen for Ctrl-C")?;
                tracing::info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                log_status(&store.counts().await);
                if let Some(queue) = &crawl_queue {
                    let pace = queue.state();
                    tracing::info!(
                        executed = pace.executed,
                        delay_ms = pace.current_delay.as_millis() as u64,
                        stopped = pace.stopped,
                        "crawl status"
                    );
                }
            }
        }
    }

    pool.stop_and_join().await;
    store.save_state().await.context("final checkpoint failed")?;
    log_status(&store.counts().await);

    if let (Some(memory), Some(path)) = (&captured, &args.dump_records) {
        let json = serde_json::to_vec_pretty(&memory.records())?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(records = memory.len(), path = %path.display(), "captured records written");
    }

    tracing::info!("mondego stopped");
    Ok(())
}

/// Queue configured seeds on lanes that restored nothing.
async fn seed(store: &InMemoryStateStore, config: &MondegoConfig) -> Result<()> {
    let restored = store.counts().await;
    for seed in &config.seeds {
        if restored.lane(&seed.driver).pending > 0 {
            tracing::debug!(driver = %seed.driver, "lane restored from snapshot, seed skipped");
            continue;
        }
        let job_id = store.queue_job(&seed.driver, seed.payload.clone()).await?;
        tracing::info!(driver = %seed.driver, job_id = %job_id, "seed job queued");
    }
    Ok(())
}

/// Fetch runner per driver with an upstream, sink runner on the destination lane.
fn build_registry(config: &MondegoConfig, sink: Arc<dyn SinkWriter>) -> Result<RunnerRegistry> {
    let mut registry = RunnerRegistry::new();
    for driver in &config.drivers {
        if driver.id.is_destination() {
            continue;
        }
        let Some(url) = &driver.upstream_url else {
            tracing::warn!(driver = %driver.id, "no upstream_url, jobs on this lane will be rejected");
            continue;
        };
        let upstream = match &driver.private_token {
            Some(token) => HttpUpstream::with_private_token(config.request_timeout(), token)?,
            None => HttpUpstream::new(config.request_timeout())?,
        };
        let runner = PagedFetchRunner::new(Arc::new(upstream), config.sink.collection.clone())
            .with_base(url)?;
        registry.register(driver.id.clone(), Arc::new(runner))?;
    }
    registry.register(DriverId::destination(), Arc::new(SinkRunner::new(sink)))?;
    Ok(registry)
}

fn log_status(counts: &StoreCounts) {
    for (driver, lane) in &counts.lanes {
        tracing::info!(
            driver = %driver,
            pending = lane.pending,
            in_flight = lane.in_flight,
            resolved = lane.resolved,
            rejected = lane.rejected,
            "lane status"
        );
    }
}
