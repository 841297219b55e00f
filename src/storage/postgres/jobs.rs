use chrono::{DateTime, Utc};
use tokio_postgres::{Client, Row};
use uuid::Uuid;

use super::PgPool;
use crate::claim::{claim_order, ClaimRequest};
use crate::error::Result;
use crate::job::{clamp_progress, Job, JobFilter, JobOutcome, JobPriority, JobStatus};
use crate::lifecycle::{permitted_sources, sql_source_list, stamps_completion};
use crate::storage::RowUpdate;

const JOB_COLUMNS: &str = "id, name, priority, status, progress, created_at, scheduled_start, \
     started_at, completed_at, error_message, lease_holder, lease_time, retry_count";

fn job_from_row(row: &Row) -> Result<Job> {
    let status: String = row.try_get("status")?;
    Ok(Job {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        priority: JobPriority::from_rank(row.try_get("priority")?)?,
        status: status.parse()?,
        progress: row.try_get("progress")?,
        created_at: row.try_get("created_at")?,
        scheduled_start: row.try_get("scheduled_start")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
        lease_holder: row.try_get("lease_holder")?,
        lease_time: row.try_get("lease_time")?,
        retry_count: row.try_get("retry_count")?,
    })
}

async fn select_job(client: &Client, id: Uuid) -> Result<Option<Job>> {
    let sql = format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS);
    let row = client.query_opt(sql.as_str(), &[&id]).await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Classify the outcome of a conditional single-row `UPDATE ... RETURNING`.
async fn classify(
    client: &Client,
    id: Uuid,
    updated: Option<Row>,
) -> Result<RowUpdate> {
    if let Some(row) = updated {
        return Ok(RowUpdate::Applied(job_from_row(&row)?));
    }
    Ok(match select_job(client, id).await? {
        Some(job) => RowUpdate::Unchanged(job),
        None => RowUpdate::Missing,
    })
}

pub async fn insert_job(pool: &PgPool, job: &Job) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            "INSERT INTO jobs (id, name, priority, status, progress, created_at, scheduled_start,
                               started_at, completed_at, error_message, lease_holder, lease_time, retry_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            &[
                &job.id,
                &job.name,
                &job.priority.rank(),
                &job.status.as_str(),
                &job.progress,
                &job.created_at,
                &job.scheduled_start,
                &job.started_at,
                &job.completed_at,
                &job.error_message,
                &job.lease_holder,
                &job.lease_time,
                &job.retry_count,
            ],
        )
        .await?;
    Ok(())
}

pub async fn get_job(pool: &PgPool, id: Uuid) -> Result<Option<Job>> {
    let client = pool.get().await?;
    select_job(&client, id).await
}

pub async fn list_jobs(pool: &PgPool, filter: JobFilter) -> Result<Vec<Job>> {
    let client = pool.get().await?;
    let sql = format!(
        "SELECT {} FROM jobs
         WHERE ($1::TEXT IS NULL OR status = $1) AND ($2::SMALLINT IS NULL OR priority = $2)
         ORDER BY priority DESC, created_at ASC, id ASC",
        JOB_COLUMNS
    );
    let status = filter.status.map(|s| s.as_str());
    let priority = filter.priority.map(|p| p.rank());
    let rows = client.query(sql.as_str(), &[&status, &priority]).await?;
    rows.iter().map(job_from_row).collect()
}

pub async fn set_progress(pool: &PgPool, id: Uuid, progress: i32) -> Result<RowUpdate> {
    let client = pool.get().await?;
    let progress = clamp_progress(progress);
    let sql = format!(
        "UPDATE jobs SET progress = $2
         WHERE id = $1 AND status = 'running' AND progress <= $2
         RETURNING {}",
        JOB_COLUMNS
    );
    let updated = client.query_opt(sql.as_str(), &[&id, &progress]).await?;
    classify(&client, id, updated).await
}

pub async fn transition_status(
    pool: &PgPool,
    id: Uuid,
    target: JobStatus,
    message: Option<&str>,
    now: DateTime<Utc>,
) -> Result<RowUpdate> {
    let client = pool.get().await?;
    if permitted_sources(target).is_empty() {
        return classify(&client, id, None).await;
    }

    let sql = format!(
        "UPDATE jobs SET
            status = $2,
            progress = CASE WHEN $2 = 'completed' THEN 100 ELSE progress END,
            completed_at = COALESCE(completed_at, $3),
            error_message = COALESCE($4, error_message)
         WHERE id = $1 AND status IN ({})
         RETURNING {}",
        sql_source_list(target),
        JOB_COLUMNS
    );
    let completed_at = stamps_completion(target).then_some(now);
    let updated = client
        .query_opt(
            sql.as_str(),
            &[&id, &target.as_str(), &completed_at, &message],
        )
        .await?;
    classify(&client, id, updated).await
}

pub async fn restart_job(pool: &PgPool, id: Uuid) -> Result<RowUpdate> {
    let client = pool.get().await?;
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
         WHERE id = $1 AND status IN ({})
         RETURNING {}",
        sql_source_list(JobStatus::Pending),
        JOB_COLUMNS
    );
    let updated = client.query_opt(sql.as_str(), &[&id]).await?;
    classify(&client, id, updated).await
}

pub async fn delete_job(pool: &PgPool, id: Uuid) -> Result<bool> {
    let client = pool.get().await?;
    let count = client
        .execute("DELETE FROM jobs WHERE id = $1", &[&id])
        .await?;
    Ok(count > 0)
}

pub async fn claim_jobs(pool: &PgPool, request: &ClaimRequest) -> Result<Vec<Job>> {
    let client = pool.get().await?;
    let limit = i64::try_from(request.max_jobs).unwrap_or(i64::MAX);
    let sql = format!(
        "UPDATE jobs SET
            lease_holder = $1,
            lease_time = $2,
            status = 'running',
            started_at = COALESCE(started_at, $2)
         WHERE id IN (
            SELECT id FROM jobs
            WHERE (status = 'pending' OR (status = 'running' AND lease_time < $3))
              AND (scheduled_start IS NULL OR scheduled_start <= $2)
            ORDER BY priority DESC, created_at ASC, id ASC
            LIMIT $4
            FOR UPDATE SKIP LOCKED
         )
           AND (status = 'pending' OR (status = 'running' AND lease_time < $3))
         RETURNING {}",
        JOB_COLUMNS
    );
    let rows = client
        .query(
            sql.as_str(),
            &[
                &request.worker_id,
                &request.now,
                &request.stale_before,
                &limit,
            ],
        )
        .await?;
    let mut jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>>>()?;
    jobs.sort_by(claim_order);
    Ok(jobs)
}

pub async fn report_progress(
    pool: &PgPool,
    id: Uuid,
    worker_id: Uuid,
    progress: i32,
    now: DateTime<Utc>,
) -> Result<Option<i32>> {
    let client = pool.get().await?;
    let progress = clamp_progress(progress);
    let row = client
        .query_opt(
            "UPDATE jobs SET progress = GREATEST(progress, $3), lease_time = $4
             WHERE id = $1 AND lease_holder = $2 AND status = 'running'
             RETURNING progress",
            &[&id, &worker_id, &progress, &now],
        )
        .await?;
    Ok(row.map(|r| r.try_get("progress")).transpose()?)
}

pub async fn renew_lease(
    pool: &PgPool,
    id: Uuid,
    worker_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    let client = pool.get().await?;
    let count = client
        .execute(
            "UPDATE jobs SET lease_time = $3
             WHERE id = $1 AND lease_holder = $2 AND status = 'running'",
            &[&id, &worker_id, &now],
        )
        .await?;
    Ok(count > 0)
}

pub async fn finish_job(
    pool: &PgPool,
    id: Uuid,
    worker_id: Uuid,
    outcome: &JobOutcome,
    now: DateTime<Utc>,
) -> Result<bool> {
    let client = pool.get().await?;
    let status = outcome.status();
    let completed_at = stamps_completion(status).then_some(now);
    let count = client
        .execute(
            "UPDATE jobs SET
                status = $3,
                progress = CASE WHEN $3 = 'completed' THEN 100 ELSE progress END,
                completed_at = COALESCE(completed_at, $4),
                error_message = COALESCE($5, error_message)
             WHERE id = $1 AND lease_holder = $2 AND status = 'running'",
            &[
                &id,
                &worker_id,
                &status.as_str(),
                &completed_at,
                &outcome.message(),
            ],
        )
        .await?;
    Ok(count > 0)
}
