//! Job endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{ApiError, ApiState};
use crate::job::{Job, JobFilter, JobPriority, JobStatus, NewJob};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
}

impl ListJobsQuery {
    fn into_filter(self) -> ApiResult<JobFilter> {
        let status = self
            .status
            .map(|s| s.parse::<JobStatus>())
            .transpose()?;
        let priority = self
            .priority
            .map(|p| p.parse::<JobPriority>())
            .transpose()?;
        Ok(JobFilter { status, priority })
    }
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub progress: i32,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

pub async fn create_job(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<NewJob>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.queue.enqueue(req).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn list_jobs(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    let jobs = state.queue.list(query.into_filter()?).await?;
    Ok(Json(jobs))
}

pub async fn get_job(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    match state.queue.get(id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(ApiError::NotFound(format!("job {} not found", id))),
    }
}

pub async fn update_progress(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProgressRequest>,
) -> ApiResult<Json<Job>> {
    let job = state.queue.update_progress(id, req.progress).await?;
    Ok(Json(job))
}

pub async fn update_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> ApiResult<Json<Job>> {
    let status = req.status.parse::<JobStatus>()?;
    let job = state.queue.update_status(id, status, req.message).await?;
    Ok(Json(job))
}

pub async fn stop_job(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.queue.stop(id).await?))
}

pub async fn restart_job(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.queue.restart(id).await?))
}

pub async fn delete_job(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.queue.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
