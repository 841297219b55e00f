//! Shared state of the API handlers.

use crate::notify::BroadcastNotifier;
use crate::queue::JobQueue;

pub struct ApiState {
    pub queue: JobQueue,
    /// Source of the `/api/events` stream.
    pub events: BroadcastNotifier,
}

impl ApiState {
    pub fn new(queue: JobQueue, events: BroadcastNotifier) -> Self {
        Self { queue, events }
    }
}
