use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use uuid::Uuid;

use super::PgPool;
use crate::error::Result;
use crate::worker_node::{WorkerNode, WorkerStatus};

fn worker_from_row(row: &Row) -> Result<WorkerNode> {
    let status: String = row.try_get("status")?;
    Ok(WorkerNode {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        last_heartbeat: row.try_get("last_heartbeat")?,
        active: row.try_get("active")?,
        status: status.parse()?,
        current_job_id: row.try_get("current_job_id")?,
        registered_at: row.try_get("registered_at")?,
    })
}

pub async fn upsert_worker(pool: &PgPool, worker: &WorkerNode) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            "INSERT INTO worker_nodes (id, name, last_heartbeat, active, status, current_job_id, registered_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                last_heartbeat = EXCLUDED.last_heartbeat,
                active = EXCLUDED.active,
                status = EXCLUDED.status,
                current_job_id = EXCLUDED.current_job_id,
                registered_at = EXCLUDED.registered_at",
            &[
                &worker.id,
                &worker.name,
                &worker.last_heartbeat,
                &worker.active,
                &worker.status.as_str(),
                &worker.current_job_id,
                &worker.registered_at,
            ],
        )
        .await?;
    Ok(())
}

pub async fn touch_worker(pool: &PgPool, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let client = pool.get().await?;
    let count = client
        .execute(
            "UPDATE worker_nodes SET last_heartbeat = $2 WHERE id = $1",
            &[&id, &now],
        )
        .await?;
    Ok(count > 0)
}

pub async fn set_worker_status(
    pool: &PgPool,
    id: Uuid,
    status: WorkerStatus,
    current_job_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let client = pool.get().await?;
    let count = client
        .execute(
            "UPDATE worker_nodes SET status = $2, current_job_id = $3, last_heartbeat = $4
             WHERE id = $1",
            &[&id, &status.as_str(), &current_job_id, &now],
        )
        .await?;
    Ok(count > 0)
}

pub async fn deactivate_worker(pool: &PgPool, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let client = pool.get().await?;
    let count = client
        .execute(
            "UPDATE worker_nodes
             SET active = false, status = 'offline', current_job_id = NULL, last_heartbeat = $2
             WHERE id = $1",
            &[&id, &now],
        )
        .await?;
    Ok(count > 0)
}

pub async fn get_worker(pool: &PgPool, id: Uuid) -> Result<Option<WorkerNode>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT id, name, last_heartbeat, active, status, current_job_id, registered_at
             FROM worker_nodes WHERE id = $1",
            &[&id],
        )
        .await?;
    row.as_ref().map(worker_from_row).transpose()
}

pub async fn list_workers(pool: &PgPool) -> Result<Vec<WorkerNode>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id, name, last_heartbeat, active, status, current_job_id, registered_at
             FROM worker_nodes
             ORDER BY registered_at ASC, id ASC",
            &[],
        )
        .await?;
    rows.iter().map(worker_from_row).collect()
}
