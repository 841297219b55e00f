//! Worker registry.
//!
//! Keeps this process's `worker_nodes` row current: registration at start,
//! a heartbeat on a timer, occupancy while a job runs, and deregistration at
//! shutdown. Every write is best-effort; failures are logged and the caller
//! carries on. Reclamation never consults these rows.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::job::now_millis;
use crate::notify::{emit_worker, NoopNotifier, Notifier, WorkerStatusEvent};
use crate::storage::Store;
use crate::worker_node::{WorkerNode, WorkerStatus};

#[derive(Clone)]
pub struct WorkerRegistry {
    id: Uuid,
    name: String,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    /// Job this worker is running, restored if the row has to be recreated.
    current_job: Arc<Mutex<Option<Uuid>>>,
}

impl WorkerRegistry {
    /// A registry for a new worker identity. Ids are never reused across processes.
    pub fn new(name: impl Into<String>, store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            store,
            notifier,
            current_job: Arc::new(Mutex::new(None)),
        }
    }

    pub fn without_notifier(name: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self::new(name, store, Arc::new(NoopNotifier))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upsert this worker as active, busy with its current job if it has one.
    pub async fn register(&self) -> bool {
        let mut node = WorkerNode::new(self.id, self.name.clone(), now_millis());
        if let Some(job_id) = *self.current_job.lock() {
            node.status = WorkerStatus::Busy;
            node.current_job_id = Some(job_id);
        }
        match self.store.upsert_worker(&node).await {
            Ok(()) => {
                info!(node_id = %self.id, "Registered worker node '{}'", self.name);
                emit_worker(
                    self.notifier.as_ref(),
                    WorkerStatusEvent::from_node(&node, node.last_heartbeat),
                )
                .await;
                true
            }
            Err(e) => {
                error!(node_id = %self.id, "Failed to register worker node: {}", e);
                false
            }
        }
    }

    /// Refresh `last_heartbeat`, re-registering if the row has disappeared.
    pub async fn heartbeat(&self) -> bool {
        match self.store.touch_worker(self.id, now_millis()).await {
            Ok(true) => {
                debug!(node_id = %self.id, "Heartbeat");
                self.notify_current().await;
                true
            }
            Ok(false) => {
                warn!(node_id = %self.id, "Worker node row missing, re-registering");
                self.register().await
            }
            Err(e) => {
                warn!(node_id = %self.id, "Heartbeat failed: {}", e);
                false
            }
        }
    }

    /// Mark this worker inactive and offline.
    pub async fn deregister(&self) -> bool {
        match self.store.deactivate_worker(self.id, now_millis()).await {
            Ok(found) => {
                info!(node_id = %self.id, "Deregistered worker node");
                if found {
                    self.notify_current().await;
                }
                found
            }
            Err(e) => {
                error!(node_id = %self.id, "Failed to deregister worker node: {}", e);
                false
            }
        }
    }

    pub async fn set_busy(&self, job_id: Uuid) -> bool {
        self.set_status(WorkerStatus::Busy, Some(job_id)).await
    }

    pub async fn set_available(&self) -> bool {
        self.set_status(WorkerStatus::Available, None).await
    }

    pub async fn get_worker(&self, id: Uuid) -> Result<Option<WorkerNode>> {
        self.store.get_worker(id).await
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerNode>> {
        self.store.list_workers().await
    }

    /// Heartbeat every `period` until `shutdown_rx` turns true.
    pub fn spawn_heartbeat(
        &self,
        period: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; registration already happened.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.heartbeat().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!(node_id = %registry.id, "Heartbeat loop stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn set_status(&self, status: WorkerStatus, current_job_id: Option<Uuid>) -> bool {
        *self.current_job.lock() = current_job_id;
        match self
            .store
            .set_worker_status(self.id, status, current_job_id, now_millis())
            .await
        {
            Ok(found) => {
                if found {
                    self.notify_current().await;
                } else {
                    warn!(node_id = %self.id, status = %status, "Worker node row missing");
                }
                found
            }
            Err(e) => {
                warn!(node_id = %self.id, "Failed to set worker status {}: {}", status, e);
                false
            }
        }
    }

    async fn notify_current(&self) {
        match self.store.get_worker(self.id).await {
            Ok(Some(node)) => {
                emit_worker(
                    self.notifier.as_ref(),
                    WorkerStatusEvent::from_node(&node, now_millis()),
                )
                .await;
            }
            Ok(None) => {}
            Err(e) => debug!(node_id = %self.id, "Could not load worker node for notification: {}", e),
        }
    }
}
