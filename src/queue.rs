//! Job queue façade.
//!
//! The operations the REST surface and the processing loop call. Every write
//! goes through one store primitive; this layer adds input validation,
//! lifecycle routing, logging and notifications.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::claim::{claim_batch, ClaimRequest, DEFAULT_STALE_LEASE};
use crate::error::{Result, StoreError};
use crate::job::{now_millis, Job, JobFilter, JobOutcome, JobStatus, NewJob};
use crate::lifecycle::StatusChange;
use crate::notify::{emit_job, JobProgressEvent, NoopNotifier, Notifier};
use crate::storage::{RowUpdate, Store};
use crate::worker_node::WorkerNode;

pub const STOPPED_BY_USER: &str = "Stopped by user";

#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    stale_lease: Duration,
}

impl JobQueue {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            stale_lease: DEFAULT_STALE_LEASE,
        }
    }

    /// Queue without notifications.
    pub fn without_notifier(store: Arc<dyn Store>) -> Self {
        Self::new(store, Arc::new(NoopNotifier))
    }

    pub fn with_stale_lease(mut self, stale_lease: Duration) -> Self {
        self.stale_lease = stale_lease;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn stale_lease(&self) -> Duration {
        self.stale_lease
    }

    // ========================================================================
    // CALLER OPERATIONS
    // ========================================================================

    /// Create a `Pending` job.
    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job> {
        let name = new_job.name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidData("job name must not be empty".to_string()));
        }

        let job = Job {
            id: Uuid::new_v4(),
            name: name.to_string(),
            priority: new_job.priority,
            status: JobStatus::Pending,
            progress: 0,
            created_at: now_millis(),
            scheduled_start: new_job.scheduled_start,
            started_at: None,
            completed_at: None,
            error_message: None,
            lease_holder: None,
            lease_time: None,
            retry_count: 0,
        };
        self.store.insert_job(&job).await?;

        info!(job_id = %job.id, priority = ?job.priority, "Enqueued job '{}'", job.name);
        self.emit(&job).await;
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        self.store.get_job(id).await
    }

    pub async fn list(&self, filter: JobFilter) -> Result<Vec<Job>> {
        self.store.list_jobs(filter).await
    }

    /// Externally set progress of a running job. Lower values are ignored.
    pub async fn update_progress(&self, id: Uuid, progress: i32) -> Result<Job> {
        let update = self.store.set_progress(id, progress).await?;
        self.settle(id, update, "progress update").await
    }

    /// Externally requested status change, routed through the lifecycle.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        message: Option<String>,
    ) -> Result<Job> {
        match StatusChange::for_target(status) {
            StatusChange::Restart => self.restart(id).await,
            StatusChange::ClaimOnly => {
                let job = self
                    .store
                    .get_job(id)
                    .await?
                    .ok_or_else(|| not_found(id))?;
                warn!(job_id = %id, "Refusing to set Running outside a claim");
                Ok(job)
            }
            StatusChange::Finish(target) => {
                let update = self
                    .store
                    .transition_status(id, target, message.as_deref(), now_millis())
                    .await?;
                self.settle(id, update, target.as_str()).await
            }
        }
    }

    /// Cancel a pending or running job.
    pub async fn stop(&self, id: Uuid) -> Result<Job> {
        self.update_status(id, JobStatus::Stopped, Some(STOPPED_BY_USER.to_string()))
            .await
    }

    /// `Failed | Stopped -> Pending`. Repeating it on a pending job is a no-op.
    pub async fn restart(&self, id: Uuid) -> Result<Job> {
        let update = self.store.restart_job(id).await?;
        self.settle(id, update, "restart").await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if self.store.delete_job(id).await? {
            info!(job_id = %id, "Deleted job");
            Ok(())
        } else {
            Err(not_found(id))
        }
    }

    pub async fn workers(&self) -> Result<Vec<WorkerNode>> {
        self.store.list_workers().await
    }

    // ========================================================================
    // WORKER OPERATIONS
    // ========================================================================

    /// Lease up to `max_jobs` jobs to `worker_id`. Never fails; store errors
    /// yield an empty batch.
    pub async fn claim(&self, worker_id: Uuid, max_jobs: usize) -> Vec<Job> {
        let request = ClaimRequest::new(worker_id, max_jobs, now_millis(), self.stale_lease);
        let jobs = claim_batch(self.store.as_ref(), request).await;
        for job in &jobs {
            self.emit(job).await;
        }
        jobs
    }

    /// Lease-guarded progress write. `Ok(false)` means the lease is gone.
    /// Observers see the persisted value, which never decreases.
    pub async fn report_progress(&self, job: &Job, worker_id: Uuid, progress: i32) -> Result<bool> {
        let now = now_millis();
        let Some(persisted) = self
            .store
            .report_progress(job.id, worker_id, progress, now)
            .await?
        else {
            return Ok(false);
        };

        let event = JobProgressEvent {
            job_id: job.id,
            progress: persisted,
            status: JobStatus::Running,
            status_message: None,
            timestamp: now,
        };
        emit_job(self.notifier.as_ref(), event).await;
        Ok(true)
    }

    /// Refresh the lease without reporting progress. `Ok(false)` means the lease is gone.
    pub async fn renew_lease(&self, job: &Job, worker_id: Uuid) -> Result<bool> {
        self.store.renew_lease(job.id, worker_id, now_millis()).await
    }

    /// Lease-guarded terminal write. `Ok(false)` means the lease is gone.
    pub async fn finish(&self, job: &Job, worker_id: Uuid, outcome: JobOutcome) -> Result<bool> {
        let finished = self
            .store
            .finish_job(job.id, worker_id, &outcome, now_millis())
            .await?;
        if finished {
            info!(job_id = %job.id, status = %outcome.status(), "Job finished");
            if let Some(updated) = self.store.get_job(job.id).await? {
                self.emit(&updated).await;
            }
        } else {
            warn!(job_id = %job.id, worker = %worker_id, "Lease lost before final status write");
        }
        Ok(finished)
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    async fn settle(&self, id: Uuid, update: RowUpdate, action: &str) -> Result<Job> {
        match update {
            RowUpdate::Applied(job) => {
                info!(job_id = %id, status = %job.status, "Applied {}", action);
                self.emit(&job).await;
                Ok(job)
            }
            RowUpdate::Unchanged(job) => {
                warn!(
                    job_id = %id,
                    status = %job.status,
                    "Ignoring {} not permitted from current state",
                    action
                );
                Ok(job)
            }
            RowUpdate::Missing => Err(not_found(id)),
        }
    }

    async fn emit(&self, job: &Job) {
        emit_job(
            self.notifier.as_ref(),
            JobProgressEvent::from_job(job, now_millis()),
        )
        .await;
    }
}

fn not_found(id: Uuid) -> StoreError {
    StoreError::NotFound(format!("job {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobPriority;
    use crate::notify::{BroadcastNotifier, QueueEvent};
    use crate::storage::SqliteStore;

    fn queue() -> JobQueue {
        JobQueue::without_notifier(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    #[tokio::test]
    async fn test_enqueue_rejects_empty_name() {
        let queue = queue();
        let err = queue
            .enqueue(NewJob::new("   ", JobPriority::High))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_enqueue_creates_pending_job() {
        let queue = queue();
        let job = queue
            .enqueue(NewJob::new(" render ", JobPriority::High))
            .await
            .unwrap();
        assert_eq!(job.name, "render");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(queue.get(job.id).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn test_invalid_transition_is_noop() {
        let queue = queue();
        let job = queue
            .enqueue(NewJob::new("a", JobPriority::Regular))
            .await
            .unwrap();

        let unchanged = queue
            .update_status(job.id, JobStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(unchanged.status, JobStatus::Pending);

        let still = queue
            .update_status(job.id, JobStatus::Running, None)
            .await
            .unwrap();
        assert_eq!(still.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let queue = queue();
        let id = Uuid::new_v4();
        assert!(matches!(queue.stop(id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(queue.restart(id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(queue.delete(id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            queue.update_progress(id, 10).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_pending_then_restart() {
        let queue = queue();
        let job = queue
            .enqueue(NewJob::new("a", JobPriority::Regular))
            .await
            .unwrap();

        let stopped = queue.stop(job.id).await.unwrap();
        assert_eq!(stopped.status, JobStatus::Stopped);
        assert_eq!(stopped.error_message.as_deref(), Some(STOPPED_BY_USER));
        assert_eq!(stopped.completed_at, None);

        let restarted = queue.restart(job.id).await.unwrap();
        assert_eq!(restarted.status, JobStatus::Pending);
        assert_eq!(restarted.error_message, None);
        assert_eq!(restarted.retry_count, 1);

        let again = queue.restart(job.id).await.unwrap();
        assert_eq!(again, restarted);
    }

    #[tokio::test]
    async fn test_progress_only_applies_while_running() {
        let queue = queue();
        let job = queue
            .enqueue(NewJob::new("a", JobPriority::Regular))
            .await
            .unwrap();
        assert_eq!(queue.update_progress(job.id, 50).await.unwrap().progress, 0);

        let worker = Uuid::new_v4();
        assert_eq!(queue.claim(worker, 1).await.len(), 1);
        assert_eq!(queue.update_progress(job.id, 50).await.unwrap().progress, 50);
        assert_eq!(queue.update_progress(job.id, 20).await.unwrap().progress, 50);
        assert_eq!(queue.update_progress(job.id, 250).await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn test_progress_events_carry_persisted_value() {
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let mut rx = notifier.subscribe();
        let queue = JobQueue::new(Arc::new(SqliteStore::in_memory().unwrap()), notifier);

        queue
            .enqueue(NewJob::new("a", JobPriority::Regular))
            .await
            .unwrap();
        let worker = Uuid::new_v4();
        let claimed = queue.claim(worker, 1).await;
        for p in [60, 20, 250, -5] {
            assert!(queue.report_progress(&claimed[0], worker, p).await.unwrap());
        }

        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let QueueEvent::Job(event) = event {
                progress.push(event.progress);
            }
        }
        assert_eq!(progress, vec![0, 0, 60, 60, 100, 100]);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert!(progress.iter().all(|p| (0..=100).contains(p)));

        let stored = queue.get(claimed[0].id).await.unwrap().unwrap();
        assert_eq!(stored.progress, 100);
    }

    #[tokio::test]
    async fn test_claim_and_finish_emit_events() {
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let mut rx = notifier.subscribe();
        let queue = JobQueue::new(Arc::new(SqliteStore::in_memory().unwrap()), notifier);

        let job = queue
            .enqueue(NewJob::new("a", JobPriority::Regular))
            .await
            .unwrap();
        let worker = Uuid::new_v4();
        let claimed = queue.claim(worker, 1).await;
        assert!(queue.finish(&claimed[0], worker, JobOutcome::Completed).await.unwrap());

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let QueueEvent::Job(event) = event {
                assert_eq!(event.job_id, job.id);
                statuses.push(event.status);
            }
        }
        assert_eq!(
            statuses,
            vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
        );
    }
}
