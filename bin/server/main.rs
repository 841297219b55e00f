//! Job Queue Worker Server
//!
//! Runs one worker node: registers it, heartbeats, processes jobs from the
//! shared store and serves the REST API until Ctrl-C.

use anyhow::Result;
use clap::Parser;
use jobqueue::api::{self, ApiState};
use jobqueue::{
    open_store, BroadcastNotifier, JobPriority, JobProcessor, JobQueue, NewJob, Notifier,
    SimulatedExecutor, StoreConfig, WorkerConfig, WorkerRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "jobqueue")]
#[command(about = "Lease-based job queue worker with REST API")]
struct Args {
    /// Server port
    #[arg(short, long, default_value = "8080", env = "JOBQUEUE_PORT")]
    port: u16,

    /// Server host
    #[arg(long, default_value = "0.0.0.0", env = "JOBQUEUE_HOST")]
    host: String,

    /// PostgreSQL URL; takes precedence over the SQLite path
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// SQLite database file shared by workers on this host
    #[arg(long, env = "SQLITE_PATH")]
    sqlite_path: Option<PathBuf>,

    /// Worker display name
    #[arg(long, env = "WORKER_NAME")]
    worker_name: Option<String>,

    #[arg(long, default_value = "5", env = "POLL_INTERVAL_SECS")]
    poll_interval_secs: u64,

    #[arg(long, default_value = "15", env = "HEARTBEAT_INTERVAL_SECS")]
    heartbeat_interval_secs: u64,

    /// Leases older than this are reclaimable by other workers
    #[arg(long, default_value = "120", env = "STALE_LEASE_SECS")]
    stale_lease_secs: u64,

    /// Delay between progress steps of the simulated payload
    #[arg(long, default_value = "1000", env = "STEP_DELAY_MS")]
    step_delay_ms: u64,

    /// Enqueue this many demo jobs at startup
    #[arg(long, default_value = "0", env = "SEED_DEMO_JOBS")]
    seed_demo_jobs: usize,
}

impl Args {
    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            name: self
                .worker_name
                .clone()
                .unwrap_or_else(|| format!("worker-{}", std::process::id())),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            stale_lease: Duration::from_secs(self.stale_lease_secs),
            step_delay: Duration::from_millis(self.step_delay_ms),
            ..WorkerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jobqueue=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = args.worker_config();
    config.validate()?;

    let store_config = StoreConfig::resolve(args.database_url.clone(), args.sqlite_path.clone());

    info!("Starting job queue worker");
    info!("  Worker name: {}", config.name);
    info!("  Store: {:?}", store_config);
    info!("  Listening on: {}:{}", args.host, args.port);

    let store = open_store(&store_config).await?;
    let events = BroadcastNotifier::default();
    let notifier: Arc<dyn Notifier> = Arc::new(events.clone());

    let queue = JobQueue::new(store.clone(), notifier.clone()).with_stale_lease(config.stale_lease);
    seed_demo_jobs(&queue, args.seed_demo_jobs).await;

    let registry = WorkerRegistry::new(config.name.clone(), store, notifier);
    if !registry.register().await {
        warn!("Worker registration failed; continuing, heartbeat will retry");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat = registry.spawn_heartbeat(config.heartbeat_interval, shutdown_rx.clone());

    let processor = JobProcessor::new(
        queue.clone(),
        registry.clone(),
        Arc::new(SimulatedExecutor::new(config.step_delay)),
        config,
    )
    .spawn(shutdown_rx.clone());

    let state = Arc::new(ApiState::new(queue, events));
    let host = args.host.clone();
    let server = tokio::spawn(async move { api::serve(state, &host, args.port, shutdown_rx).await });

    info!("Worker {} ready", registry.id());

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping gracefully");
    if let Err(e) = shutdown_tx.send(true) {
        warn!("Failed to send shutdown signal: {}", e);
    }

    if let Err(e) = processor.await {
        error!("Processor task failed: {}", e);
    }
    if let Err(e) = heartbeat.await {
        error!("Heartbeat task failed: {}", e);
    }
    match server.await {
        Ok(Err(e)) => error!("API server error: {}", e),
        Err(e) => error!("API server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    registry.deregister().await;
    info!("Shutdown complete");
    Ok(())
}

async fn seed_demo_jobs(queue: &JobQueue, count: usize) {
    for i in 0..count {
        let priority = if i % 3 == 0 {
            JobPriority::High
        } else {
            JobPriority::Regular
        };
        if let Err(e) = queue
            .enqueue(NewJob::new(format!("demo-job-{}", i + 1), priority))
            .await
        {
            warn!("Failed to seed demo job: {}", e);
        }
    }
    if count > 0 {
        info!("Seeded {} demo jobs", count);
    }
}
