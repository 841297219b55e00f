//! Processing loop.
//!
//! One job per worker at a time. Each iteration claims at most one job,
//! runs it through an [`Executor`], and writes the terminal status under the
//! lease. The job being worked on lives in a loop-local variable only; the
//! store's `lease_holder` stays authoritative.
//!
//! A shutdown signal interrupts the poll sleep and any in-flight execution.
//! A job held at that moment is written as `Stopped`. When a caller stops a
//! running job, the next lease-guarded progress write fails, the executor is
//! aborted, and no terminal write is attempted.
//!
//! Several jobs per worker would run this same claim/finalize contract once
//! per slot, with slots bounded by a semaphore; the default is one slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::job::{Job, JobOutcome};
use crate::queue::JobQueue;
use crate::registry::WorkerRegistry;

pub const SHUTDOWN_MESSAGE: &str = "Worker shutting down";

/// The holder no longer owns the job's running lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("lease lost on job {0}")]
pub struct LeaseLost(pub Uuid);

/// Handle given to an executor for the job it is running.
pub struct JobContext {
    queue: JobQueue,
    job: Job,
    worker_id: Uuid,
    lease_lost: AtomicBool,
}

impl JobContext {
    pub fn new(queue: JobQueue, job: Job, worker_id: Uuid) -> Self {
        Self {
            queue,
            job,
            worker_id,
            lease_lost: AtomicBool::new(false),
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Persist progress and renew the lease. A store failure is logged and
    /// ignored; losing the lease is returned so the executor can stop.
    pub async fn report_progress(&self, progress: i32) -> Result<(), LeaseLost> {
        let result = self
            .queue
            .report_progress(&self.job, self.worker_id, progress)
            .await;
        self.check_lease(result, "progress")
    }

    /// Renew the lease without changing progress.
    pub async fn renew_lease(&self) -> Result<(), LeaseLost> {
        let result = self.queue.renew_lease(&self.job, self.worker_id).await;
        self.check_lease(result, "lease renewal")
    }

    pub fn lease_lost(&self) -> bool {
        self.lease_lost.load(Ordering::SeqCst)
    }

    fn check_lease(
        &self,
        result: crate::error::Result<bool>,
        action: &str,
    ) -> Result<(), LeaseLost> {
        match result {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.lease_lost.store(true, Ordering::SeqCst);
                warn!(job_id = %self.job.id, "Lease lost during {}", action);
                Err(LeaseLost(self.job.id))
            }
            Err(e) => {
                warn!(job_id = %self.job.id, "Failed to persist {}: {}", action, e);
                Ok(())
            }
        }
    }
}

/// Does the actual work of a job.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()>;
}

/// Placeholder payload: progress 10, 20, ... 100 with a fixed delay per step.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    pub step_delay: Duration,
}

impl SimulatedExecutor {
    pub const STEP: i32 = 10;

    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let mut progress = ctx.job().progress;
        while progress < 100 {
            tokio::time::sleep(self.step_delay).await;
            progress = (progress + Self::STEP).min(100);
            ctx.report_progress(progress).await?;
        }
        Ok(())
    }
}

pub struct JobProcessor {
    queue: JobQueue,
    registry: WorkerRegistry,
    executor: Arc<dyn Executor>,
    config: WorkerConfig,
}

impl JobProcessor {
    pub fn new(
        queue: JobQueue,
        registry: WorkerRegistry,
        executor: Arc<dyn Executor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            executor,
            config,
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.registry.id()
    }

    /// Run until `shutdown_rx` turns true.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let worker_id = self.worker_id();
        info!(
            worker = %worker_id,
            "Job processor started (poll={:?}, stale_lease={:?})",
            self.config.poll_interval,
            self.queue.stale_lease()
        );

        let mut current: Option<Job> = None;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let Some(job) = self.queue.claim(worker_id, 1).await.into_iter().next() else {
                debug!(worker = %worker_id, "No jobs available");
                if self.idle(&mut shutdown_rx).await {
                    break;
                }
                continue;
            };

            current = self.run_job(job, &mut shutdown_rx).await;
            if current.is_some() {
                break;
            }
        }

        if let Some(job) = current.take() {
            self.stop_held_job(job).await;
        }
        info!(worker = %worker_id, "Job processor stopped");
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn spawn(self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown_rx).await })
    }

    /// Execute one claimed job. Returns the job if shutdown interrupted it
    /// while it was still held.
    async fn run_job(&self, job: Job, shutdown_rx: &mut watch::Receiver<bool>) -> Option<Job> {
        let worker_id = self.worker_id();
        info!(job_id = %job.id, worker = %worker_id, "Processing job '{}'", job.name);
        self.registry.set_busy(job.id).await;

        let ctx = JobContext::new(self.queue.clone(), job.clone(), worker_id);
        let result = tokio::select! {
            result = self.executor.execute(&ctx) => Some(result),
            _ = wait_for_shutdown(shutdown_rx) => None,
        };

        match result {
            None => return Some(job),
            Some(_) if ctx.lease_lost() => {
                info!(job_id = %job.id, "Job was taken out of our hands, abandoning it");
            }
            Some(Ok(())) => {
                self.finalize(&job, JobOutcome::Completed).await;
            }
            Some(Err(e)) => {
                error!(job_id = %job.id, "Job execution failed: {:#}", e);
                self.finalize(&job, JobOutcome::Failed(e.to_string())).await;
            }
        }

        self.registry.set_available().await;
        None
    }

    async fn finalize(&self, job: &Job, outcome: JobOutcome) {
        if let Err(e) = self.queue.finish(job, self.worker_id(), outcome).await {
            error!(job_id = %job.id, "Failed to write final status: {}", e);
        }
    }

    async fn stop_held_job(&self, job: Job) {
        info!(job_id = %job.id, "Stopping held job on shutdown");
        self.finalize(&job, JobOutcome::Stopped(SHUTDOWN_MESSAGE.to_string()))
            .await;
        self.registry.set_available().await;
    }

    /// Sleep one poll interval. Returns `true` if shutdown was signalled.
    async fn idle(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        let delay = poll_delay(self.config.poll_interval, self.config.poll_jitter);
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = wait_for_shutdown(shutdown_rx) => true,
        }
    }
}

/// Resolves once shutdown is signalled or the sender is gone.
async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

fn poll_delay(base: Duration, jitter: Duration) -> Duration {
    let jitter_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
    if jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}
