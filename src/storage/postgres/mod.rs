//! PostgreSQL storage.
//!
//! Shared backend for workers on different hosts. Claims lock candidate rows
//! with `FOR UPDATE SKIP LOCKED`, so concurrent claimers partition the queue
//! instead of queueing behind each other.

mod jobs;
mod workers;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;
use tracing::info;
use uuid::Uuid;

use super::{JobStore, RowUpdate, WorkerStore};
use crate::claim::ClaimRequest;
use crate::error::Result;
use crate::job::{Job, JobFilter, JobOutcome, JobStatus};
use crate::worker_node::{WorkerNode, WorkerStatus};

pub type PgPool = Pool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    priority SMALLINT NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    progress INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    scheduled_start TIMESTAMPTZ,
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    error_message TEXT,
    lease_holder UUID,
    lease_time TIMESTAMPTZ,
    retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(status, priority DESC, created_at ASC);
CREATE INDEX IF NOT EXISTS idx_jobs_lease ON jobs(lease_holder);

CREATE TABLE IF NOT EXISTS worker_nodes (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    last_heartbeat TIMESTAMPTZ NOT NULL,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    status TEXT NOT NULL DEFAULT 'available',
    current_job_id UUID,
    registered_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect using a `postgres://` URL and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let mut config = Config::new();
        config.url = Some(database_url.to_string());
        let pool = config.create_pool(Some(Runtime::Tokio1), NoTls)?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: PgPool) -> Result<Self> {
        let client = pool.get().await?;
        info!("Connected to PostgreSQL database");

        client.batch_execute(SCHEMA).await?;
        info!("Job store schema initialized");

        Ok(Self { pool })
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        jobs::insert_job(&self.pool, job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        jobs::get_job(&self.pool, id).await
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        jobs::list_jobs(&self.pool, filter).await
    }

    async fn set_progress(&self, id: Uuid, progress: i32) -> Result<RowUpdate> {
        jobs::set_progress(&self.pool, id, progress).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        target: JobStatus,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RowUpdate> {
        jobs::transition_status(&self.pool, id, target, message, now).await
    }

    async fn restart_job(&self, id: Uuid) -> Result<RowUpdate> {
        jobs::restart_job(&self.pool, id).await
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool> {
        jobs::delete_job(&self.pool, id).await
    }

    async fn claim_jobs(&self, request: &ClaimRequest) -> Result<Vec<Job>> {
        jobs::claim_jobs(&self.pool, request).await
    }

    async fn report_progress(
        &self,
        id: Uuid,
        worker_id: Uuid,
        progress: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>> {
        jobs::report_progress(&self.pool, id, worker_id, progress, now).await
    }

    async fn renew_lease(&self, id: Uuid, worker_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        jobs::renew_lease(&self.pool, id, worker_id, now).await
    }

    async fn finish_job(
        &self,
        id: Uuid,
        worker_id: Uuid,
        outcome: &JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        jobs::finish_job(&self.pool, id, worker_id, outcome, now).await
    }
}

#[async_trait]
impl WorkerStore for PgStore {
    async fn upsert_worker(&self, worker: &WorkerNode) -> Result<()> {
        workers::upsert_worker(&self.pool, worker).await
    }

    async fn touch_worker(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        workers::touch_worker(&self.pool, id, now).await
    }

    async fn set_worker_status(
        &self,
        id: Uuid,
        status: WorkerStatus,
        current_job_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        workers::set_worker_status(&self.pool, id, status, current_job_id, now).await
    }

    async fn deactivate_worker(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        workers::deactivate_worker(&self.pool, id, now).await
    }

    async fn get_worker(&self, id: Uuid) -> Result<Option<WorkerNode>> {
        workers::get_worker(&self.pool, id).await
    }

    async fn list_workers(&self) -> Result<Vec<WorkerNode>> {
        workers::list_workers(&self.pool).await
    }
}
