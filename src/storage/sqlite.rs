//! Local SQLite storage.
//!
//! Single-host backend. Several processes may open the same database file:
//! the claim runs inside a `BEGIN IMMEDIATE` transaction, so the database
//! write lock serializes concurrent claimers. Timestamps are stored as Unix
//! milliseconds and ids as hyphenated UUID text, which keeps `ORDER BY`
//! identical to the PostgreSQL backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::{JobStore, RowUpdate, WorkerStore};
use crate::claim::{claim_order, ClaimRequest};
use crate::error::{Result, StoreError};
use crate::job::{clamp_progress, Job, JobFilter, JobOutcome, JobPriority, JobStatus};
use crate::lifecycle::{sql_source_list, stamps_completion};
use crate::worker_node::{WorkerNode, WorkerStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    progress INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    scheduled_start INTEGER,
    started_at INTEGER,
    completed_at INTEGER,
    error_message TEXT,
    lease_holder TEXT,
    lease_time INTEGER,
    retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(status, priority DESC, created_at ASC);
CREATE INDEX IF NOT EXISTS idx_jobs_lease ON jobs(lease_holder);

CREATE TABLE IF NOT EXISTS worker_nodes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    last_heartbeat INTEGER NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'available',
    current_job_id TEXT,
    registered_at INTEGER NOT NULL
);
"#;

const JOB_COLUMNS: &str = "id, name, priority, status, progress, created_at, scheduled_start, \
     started_at, completed_at, error_message, lease_holder, lease_time, retry_count";

const WORKER_COLUMNS: &str =
    "id, name, last_heartbeat, active, status, current_job_id, registered_at";

/// How long a connection waits for another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Config(format!("cannot create {:?}: {}", parent, e)))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute_batch(SCHEMA)?;
        info!("SQLite job store initialized at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory database (for testing and demos).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn conversion_error(idx: usize, ty: Type, err: StoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        conversion_error(
            idx,
            Type::Integer,
            StoreError::InvalidData(format!("timestamp out of range: {}", ms)),
        )
    })
}

fn opt_ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => ts_at(row, idx).map(Some),
        None => Ok(None),
    }
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| {
        conversion_error(
            idx,
            Type::Text,
            StoreError::InvalidData(format!("bad uuid {}: {}", text, e)),
        )
    })
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => uuid_at(row, idx).map(Some),
        None => Ok(None),
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let priority = JobPriority::from_rank(row.get(2)?)
        .map_err(|e| conversion_error(2, Type::Integer, e))?;
    let status = row
        .get::<_, String>(3)?
        .parse::<JobStatus>()
        .map_err(|e| conversion_error(3, Type::Text, e))?;

    Ok(Job {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        priority,
        status,
        progress: row.get(4)?,
        created_at: ts_at(row, 5)?,
        scheduled_start: opt_ts_at(row, 6)?,
        started_at: opt_ts_at(row, 7)?,
        completed_at: opt_ts_at(row, 8)?,
        error_message: row.get(9)?,
        lease_holder: opt_uuid_at(row, 10)?,
        lease_time: opt_ts_at(row, 11)?,
        retry_count: row.get(12)?,
    })
}

fn worker_from_row(row: &Row<'_>) -> rusqlite::Result<WorkerNode> {
    let status = row
        .get::<_, String>(4)?
        .parse::<WorkerStatus>()
        .map_err(|e| conversion_error(4, Type::Text, e))?;

    Ok(WorkerNode {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        last_heartbeat: ts_at(row, 2)?,
        active: row.get::<_, i64>(3)? != 0,
        status,
        current_job_id: opt_uuid_at(row, 5)?,
        registered_at: ts_at(row, 6)?,
    })
}

fn select_job(conn: &Connection, id: &str) -> Result<Option<Job>> {
    let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
    Ok(conn.query_row(&sql, params![id], job_from_row).optional()?)
}

/// Run a conditional `UPDATE ... RETURNING` on one job and classify the result.
fn update_one(
    conn: &Connection,
    id: &str,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<RowUpdate> {
    let updated = conn.query_row(sql, params, job_from_row).optional()?;
    match updated {
        Some(job) => Ok(RowUpdate::Applied(job)),
        None => Ok(match select_job(conn, id)? {
            Some(job) => RowUpdate::Unchanged(job),
            None => RowUpdate::Missing,
        }),
    }
}

// ============================================================================
// JOBS
// ============================================================================

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        let job = job.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO jobs (id, name, priority, status, progress, created_at, scheduled_start,
                                   started_at, completed_at, error_message, lease_holder, lease_time, retry_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    job.id.to_string(),
                    job.name,
                    job.priority.rank(),
                    job.status.as_str(),
                    job.progress,
                    to_millis(job.created_at),
                    job.scheduled_start.map(to_millis),
                    job.started_at.map(to_millis),
                    job.completed_at.map(to_millis),
                    job.error_message,
                    job.lease_holder.map(|u| u.to_string()),
                    job.lease_time.map(to_millis),
                    job.retry_count,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        self.call(move |conn| select_job(conn, &id.to_string()))
            .await
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        self.call(move |conn| {
            let sql = format!(
                "SELECT {} FROM jobs
                 WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR priority = ?2)
                 ORDER BY priority DESC, created_at ASC, id ASC",
                JOB_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let jobs = stmt
                .query_map(
                    params![
                        filter.status.map(|s| s.as_str()),
                        filter.priority.map(|p| p.rank())
                    ],
                    job_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(jobs)
        })
        .await
    }

    async fn set_progress(&self, id: Uuid, progress: i32) -> Result<RowUpdate> {
        let progress = clamp_progress(progress);
        self.call(move |conn| {
            let id = id.to_string();
            let sql = format!(
                "UPDATE jobs SET progress = ?2
                 WHERE id = ?1 AND status = 'running' AND progress <= ?2
                 RETURNING {}",
                JOB_COLUMNS
            );
            update_one(conn, &id, &sql, params![id, progress])
        })
        .await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        target: JobStatus,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RowUpdate> {
        let message = message.map(str::to_string);
        let completed_at = stamps_completion(target).then(|| to_millis(now));
        self.call(move |conn| {
            let id = id.to_string();
            let sql = format!(
                "UPDATE jobs SET
                    status = ?2,
                    progress = CASE WHEN ?2 = 'completed' THEN 100 ELSE progress END,
                    completed_at = COALESCE(completed_at, ?3),
                    error_message = COALESCE(?4, error_message)
                 WHERE id = ?1 AND status IN ({})
                 RETURNING {}",
                sql_source_list(target),
                JOB_COLUMNS
            );
            update_one(
                conn,
                &id,
                &sql,
                params![id, target.as_str(), completed_at, message],
            )
        })
        .await
    }

    async fn restart_job(&self, id: Uuid) -> Result<RowUpdate> {
        self.call(move |conn| {
            let id = id.to_string();
            let sql = format!(
                "UPDATE jobs SET
                    status = 'pending',
                    progress = 0,
                    lease_holder = NULL,
                    lease_time = NULL,
                    error_message = NULL,
                    started_at = NULL,
                    completed_at = NULL,
                    retry_count = retry_count + 1
                 WHERE id = ?1 AND status IN ({})
                 RETURNING {}",
                sql_source_list(JobStatus::Pending),
                JOB_COLUMNS
            );
            update_one(conn, &id, &sql, params![id])
        })
        .await
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool> {
        self.call(move |conn| {
            let count = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])?;
            Ok(count > 0)
        })
        .await
    }

    async fn claim_jobs(&self, request: &ClaimRequest) -> Result<Vec<Job>> {
        let request = *request;
        let limit = i64::try_from(request.max_jobs).unwrap_or(i64::MAX);
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let jobs = {
                let sql = format!(
                    "UPDATE jobs SET
                        lease_holder = ?1,
                        lease_time = ?2,
                        status = 'running',
                        started_at = COALESCE(started_at, ?2)
                     WHERE id IN (
                        SELECT id FROM jobs
                        WHERE (status = 'pending' OR (status = 'running' AND lease_time < ?3))
                          AND (scheduled_start IS NULL OR scheduled_start <= ?2)
                        ORDER BY priority DESC, created_at ASC, id ASC
                        LIMIT ?4
                     )
                     RETURNING {}",
                    JOB_COLUMNS
                );
                let mut stmt = tx.prepare(&sql)?;
                let mut claimed = stmt
                    .query_map(
                        params![
                            request.worker_id.to_string(),
                            to_millis(request.now),
                            to_millis(request.stale_before),
                            limit
                        ],
                        job_from_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                claimed.sort_by(claim_order);
                claimed
            };
            tx.commit()?;
            Ok(jobs)
        })
        .await
    }

    async fn report_progress(
        &self,
        id: Uuid,
        worker_id: Uuid,
        progress: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>> {
        let progress = clamp_progress(progress);
        self.call(move |conn| {
            let persisted = conn
                .query_row(
                    "UPDATE jobs SET progress = MAX(progress, ?3), lease_time = ?4
                     WHERE id = ?1 AND lease_holder = ?2 AND status = 'running'
                     RETURNING progress",
                    params![
                        id.to_string(),
                        worker_id.to_string(),
                        progress,
                        to_millis(now)
                    ],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(persisted)
        })
        .await
    }

    async fn renew_lease(&self, id: Uuid, worker_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.call(move |conn| {
            let count = conn.execute(
                "UPDATE jobs SET lease_time = ?3
                 WHERE id = ?1 AND lease_holder = ?2 AND status = 'running'",
                params![id.to_string(), worker_id.to_string(), to_millis(now)],
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn finish_job(
        &self,
        id: Uuid,
        worker_id: Uuid,
        outcome: &JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let status = outcome.status();
        let message = outcome.message().map(str::to_string);
        let completed_at = stamps_completion(status).then(|| to_millis(now));
        self.call(move |conn| {
            let count = conn.execute(
                "UPDATE jobs SET
                    status = ?3,
                    progress = CASE WHEN ?3 = 'completed' THEN 100 ELSE progress END,
                    completed_at = COALESCE(completed_at, ?4),
                    error_message = COALESCE(?5, error_message)
                 WHERE id = ?1 AND lease_holder = ?2 AND status = 'running'",
                params![
                    id.to_string(),
                    worker_id.to_string(),
                    status.as_str(),
                    completed_at,
                    message
                ],
            )?;
            Ok(count > 0)
        })
        .await
    }
}

// ============================================================================
// WORKER NODES
// ============================================================================

#[async_trait]
impl WorkerStore for SqliteStore {
    async fn upsert_worker(&self, worker: &WorkerNode) -> Result<()> {
        let worker = worker.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO worker_nodes (id, name, last_heartbeat, active, status, current_job_id, registered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    worker.id.to_string(),
                    worker.name,
                    to_millis(worker.last_heartbeat),
                    worker.active as i64,
                    worker.status.as_str(),
                    worker.current_job_id.map(|u| u.to_string()),
                    to_millis(worker.registered_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn touch_worker(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.call(move |conn| {
            let count = conn.execute(
                "UPDATE worker_nodes SET last_heartbeat = ?2 WHERE id = ?1",
                params![id.to_string(), to_millis(now)],
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn set_worker_status(
        &self,
        id: Uuid,
        status: WorkerStatus,
        current_job_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.call(move |conn| {
            let count = conn.execute(
                "UPDATE worker_nodes SET status = ?2, current_job_id = ?3, last_heartbeat = ?4
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    status.as_str(),
                    current_job_id.map(|u| u.to_string()),
                    to_millis(now)
                ],
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn deactivate_worker(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.call(move |conn| {
            let count = conn.execute(
                "UPDATE worker_nodes SET active = 0, status = 'offline', current_job_id = NULL, last_heartbeat = ?2
                 WHERE id = ?1",
                params![id.to_string(), to_millis(now)],
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn get_worker(&self, id: Uuid) -> Result<Option<WorkerNode>> {
        self.call(move |conn| {
            let sql = format!("SELECT {} FROM worker_nodes WHERE id = ?1", WORKER_COLUMNS);
            Ok(conn
                .query_row(&sql, params![id.to_string()], worker_from_row)
                .optional()?)
        })
        .await
    }

    async fn list_workers(&self) -> Result<Vec<WorkerNode>> {
        self.call(move |conn| {
            let sql = format!(
                "SELECT {} FROM worker_nodes ORDER BY registered_at ASC, id ASC",
                WORKER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let workers = stmt
                .query_map([], worker_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(workers)
        })
        .await
    }
}
