//! API route handlers.
//!
//! - `jobs`: job creation, queries and lifecycle actions
//! - `workers`: worker node listing
//! - `events`: server-sent event stream of job and worker changes

pub mod events;
pub mod jobs;
pub mod workers;

pub use events::stream_events;
pub use jobs::{
    create_job, delete_job, get_job, list_jobs, restart_job, stop_job, update_progress,
    update_status,
};
pub use workers::list_workers;

use axum::Json;
use serde_json::{json, Value};

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
