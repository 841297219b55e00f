//! Data persistence layer.
//!
//! Two backends implement the same traits:
//! - `postgres`: shared PostgreSQL database, one per deployment
//! - `sqlite`: local SQLite file, shareable by processes on one host
//!
//! Every mutation is either the atomic claim or a single-row conditional
//! update whose precondition is enforced by the database.

pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::claim::ClaimRequest;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::job::{Job, JobFilter, JobOutcome, JobStatus};
use crate::worker_node::{WorkerNode, WorkerStatus};

pub use postgres::PgStore;
pub use sqlite::SqliteStore;

/// Result of a keyed conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum RowUpdate {
    /// Precondition held; the row after the write.
    Applied(Job),
    /// Row exists but the precondition did not hold; the row as it is.
    Unchanged(Job),
    /// No row with that id.
    Missing,
}

impl RowUpdate {
    pub fn is_applied(&self) -> bool {
        matches!(self, RowUpdate::Applied(_))
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;

    /// Jobs matching `filter`, in claim order.
    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>>;

    /// Keyed progress write; applies only to a running job and never lowers progress.
    async fn set_progress(&self, id: Uuid, progress: i32) -> Result<RowUpdate>;

    /// Keyed write of a terminal status (`Completed`, `Failed` or `Stopped`),
    /// guarded by the lifecycle's permitted sources.
    async fn transition_status(
        &self,
        id: Uuid,
        target: JobStatus,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RowUpdate>;

    /// `Failed | Stopped -> Pending`, clearing the previous run.
    async fn restart_job(&self, id: Uuid) -> Result<RowUpdate>;

    async fn delete_job(&self, id: Uuid) -> Result<bool>;

    /// Atomically lease up to `request.max_jobs` eligible jobs to the caller.
    /// Concurrent callers never receive the same job.
    async fn claim_jobs(&self, request: &ClaimRequest) -> Result<Vec<Job>>;

    /// Lease-guarded, monotonic progress write that also renews the lease.
    /// Returns the persisted progress, or `None` when the caller no longer
    /// holds the running lease.
    async fn report_progress(
        &self,
        id: Uuid,
        worker_id: Uuid,
        progress: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>>;

    /// Refresh `lease_time` without touching progress.
    async fn renew_lease(&self, id: Uuid, worker_id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Lease-guarded terminal write. Returns `false` when the lease was lost.
    async fn finish_job(
        &self,
        id: Uuid,
        worker_id: Uuid,
        outcome: &JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

#[async_trait]
pub trait WorkerStore: Send + Sync {
    /// Insert or fully replace a worker row.
    async fn upsert_worker(&self, worker: &WorkerNode) -> Result<()>;

    /// Refresh `last_heartbeat`. Returns `false` if the row does not exist.
    async fn touch_worker(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn set_worker_status(
        &self,
        id: Uuid,
        status: WorkerStatus,
        current_job_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Mark inactive and offline.
    async fn deactivate_worker(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn get_worker(&self, id: Uuid) -> Result<Option<WorkerNode>>;

    async fn list_workers(&self) -> Result<Vec<WorkerNode>>;
}

/// A backend holding both tables.
pub trait Store: JobStore + WorkerStore {}

impl<T: JobStore + WorkerStore> Store for T {}

/// Open the backend selected by `config`, creating the schema if needed.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    match config {
        StoreConfig::Postgres { url } => Ok(Arc::new(PgStore::connect(url).await?)),
        StoreConfig::Sqlite { path } => Ok(Arc::new(SqliteStore::open(path)?)),
        StoreConfig::SqliteInMemory => Ok(Arc::new(SqliteStore::in_memory()?)),
    }
}
