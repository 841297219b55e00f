//! REST API.
//!
//! A thin HTTP surface over [`JobQueue`](crate::queue::JobQueue): job CRUD and
//! lifecycle actions, the worker list, a server-sent event stream and a
//! health check.

pub mod errors;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use errors::ApiError;
pub use state::ApiState;

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(routes::health_check))
        .route("/api/jobs", get(routes::list_jobs).post(routes::create_job))
        .route(
            "/api/jobs/:id",
            get(routes::get_job).delete(routes::delete_job),
        )
        .route("/api/jobs/:id/progress", put(routes::update_progress))
        .route("/api/jobs/:id/status", put(routes::update_status))
        .route("/api/jobs/:id/stop", post(routes::stop_job))
        .route("/api/jobs/:id/restart", post(routes::restart_job))
        .route("/api/workers", get(routes::list_workers))
        .route("/api/events", get(routes::stream_events))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve the API until `shutdown_rx` turns true.
pub async fn serve(
    state: Arc<ApiState>,
    host: &str,
    port: u16,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Job queue API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await?;

    info!("Job queue API stopped");
    Ok(())
}
