use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::api::{ApiError, ApiState};
use crate::worker_node::WorkerNode;

pub async fn list_workers(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<WorkerNode>>, ApiError> {
    Ok(Json(state.queue.workers().await?))
}
