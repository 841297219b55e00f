//! Server-sent events.
//!
//! Each queue event becomes one SSE message named `job` or `worker` whose
//! data is the JSON event payload. Subscribers that fall behind skip the
//! events they missed.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::api::ApiState;
use crate::notify::QueueEvent;

pub async fn stream_events(
    State(state): State<Arc<ApiState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|item| match item {
        Ok(event) => to_sse(&event).map(Ok),
        Err(e) => {
            debug!("Event subscriber lagged: {}", e);
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &QueueEvent) -> Option<Event> {
    let data = match event {
        QueueEvent::Job(e) => Event::default().json_data(e),
        QueueEvent::Worker(e) => Event::default().json_data(e),
    };
    match data {
        Ok(sse) => Some(sse.event(event.kind())),
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.kind(), e);
            None
        }
    }
}
