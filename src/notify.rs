//! Notification sink.
//!
//! Best-effort fan-out of job progress and worker status changes. The queue,
//! registry and processor call [`emit_job`] / [`emit_worker`], which log and
//! swallow every sink error: a notification never changes the outcome of the
//! operation that produced it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::job::{Job, JobStatus};
use crate::worker_node::{WorkerNode, WorkerStatus};

/// Default capacity of the broadcast channel; slow subscribers lag past this.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: Uuid,
    pub progress: i32,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    pub fn from_job(job: &Job, timestamp: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id,
            progress: job.progress,
            status: job.status,
            status_message: job.error_message.clone(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatusEvent {
    pub node_id: Uuid,
    pub name: String,
    pub status: WorkerStatus,
    pub is_processing_job: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl WorkerStatusEvent {
    pub fn from_node(node: &WorkerNode, timestamp: DateTime<Utc>) -> Self {
        Self {
            node_id: node.id,
            name: node.name.clone(),
            status: node.status,
            is_processing_job: node.is_processing_job(),
            current_job_id: node.current_job_id,
            timestamp,
        }
    }
}

/// Event as carried by [`BroadcastNotifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum QueueEvent {
    Job(JobProgressEvent),
    Worker(WorkerStatusEvent),
}

impl QueueEvent {
    /// Event name used on the SSE stream.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueEvent::Job(_) => "job",
            QueueEvent::Worker(_) => "worker",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_job(&self, event: &JobProgressEvent) -> anyhow::Result<()>;

    async fn notify_worker(&self, event: &WorkerStatusEvent) -> anyhow::Result<()>;
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify_job(&self, _event: &JobProgressEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn notify_worker(&self, _event: &WorkerStatusEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Publishes events on a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    event_tx: broadcast::Sender<QueueEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self { event_tx }
    }

    /// Subscribe to queue events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    fn publish(&self, event: QueueEvent) {
        // An error here only means nobody is listening.
        if self.event_tx.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify_job(&self, event: &JobProgressEvent) -> anyhow::Result<()> {
        self.publish(QueueEvent::Job(event.clone()));
        Ok(())
    }

    async fn notify_worker(&self, event: &WorkerStatusEvent) -> anyhow::Result<()> {
        self.publish(QueueEvent::Worker(event.clone()));
        Ok(())
    }
}

pub async fn emit_job(notifier: &dyn Notifier, event: JobProgressEvent) {
    if let Err(e) = notifier.notify_job(&event).await {
        warn!(job_id = %event.job_id, "Failed to send job notification: {}", e);
    }
}

pub async fn emit_worker(notifier: &dyn Notifier, event: WorkerStatusEvent) {
    if let Err(e) = notifier.notify_worker(&event).await {
        warn!(node_id = %event.node_id, "Failed to send worker notification: {}", e);
    }
}
