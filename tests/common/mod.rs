//! Test doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobqueue::{
    ClaimRequest, Job, JobFilter, JobOutcome, JobProgressEvent, JobStatus, JobStore, Notifier,
    Result, RowUpdate, SqliteStore, StoreError, WorkerNode, WorkerStatus, WorkerStore,
    WorkerStatusEvent,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

/// SQLite store whose claims and progress writes can be made to fail a
/// given number of times.
pub struct FlakyStore {
    inner: SqliteStore,
    failing_claims: AtomicUsize,
    failing_progress: AtomicUsize,
    claim_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            failing_claims: AtomicUsize::new(0),
            failing_progress: AtomicUsize::new(0),
            claim_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_claims(&self, n: usize) {
        self.failing_claims.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_progress(&self, n: usize) {
        self.failing_progress.store(n, Ordering::SeqCst);
    }

    pub fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }

    pub fn pending_claim_failures(&self) -> usize {
        self.failing_claims.load(Ordering::SeqCst)
    }

    pub fn pending_progress_failures(&self) -> usize {
        self.failing_progress.load(Ordering::SeqCst)
    }
}

/// Consume one scheduled failure, if any remain.
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn unavailable() -> StoreError {
    StoreError::Task("store unavailable".to_string())
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        self.inner.insert_job(job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        self.inner.list_jobs(filter).await
    }

    async fn set_progress(&self, id: Uuid, progress: i32) -> Result<RowUpdate> {
        self.inner.set_progress(id, progress).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        target: JobStatus,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RowUpdate> {
        self.inner.transition_status(id, target, message, now).await
    }

    async fn restart_job(&self, id: Uuid) -> Result<RowUpdate> {
        self.inner.restart_job(id).await
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool> {
        self.inner.delete_job(id).await
    }

    async fn claim_jobs(&self, request: &ClaimRequest) -> Result<Vec<Job>> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_claims) {
            return Err(unavailable());
        }
        self.inner.claim_jobs(request).await
    }

    async fn report_progress(
        &self,
        id: Uuid,
        worker_id: Uuid,
        progress: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>> {
        if take_failure(&self.failing_progress) {
            return Err(unavailable());
        }
        self.inner.report_progress(id, worker_id, progress, now).await
    }

    async fn renew_lease(&self, id: Uuid, worker_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.inner.renew_lease(id, worker_id, now).await
    }

    async fn finish_job(
        &self,
        id: Uuid,
        worker_id: Uuid,
        outcome: &JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.finish_job(id, worker_id, outcome, now).await
    }
}

#[async_trait]
impl WorkerStore for FlakyStore {
    async fn upsert_worker(&self, worker: &WorkerNode) -> Result<()> {
        self.inner.upsert_worker(worker).await
    }

    async fn touch_worker(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.inner.touch_worker(id, now).await
    }

    async fn set_worker_status(
        &self,
        id: Uuid,
        status: WorkerStatus,
        current_job_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner
            .set_worker_status(id, status, current_job_id, now)
            .await
    }

    async fn deactivate_worker(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.inner.deactivate_worker(id, now).await
    }

    async fn get_worker(&self, id: Uuid) -> Result<Option<WorkerNode>> {
        self.inner.get_worker(id).await
    }

    async fn list_workers(&self) -> Result<Vec<WorkerNode>> {
        self.inner.list_workers().await
    }
}

/// Rejects every event.
pub struct FailingNotifier {
    pub attempts: AtomicUsize,
}

impl FailingNotifier {
    pub fn new() -> Self {
        Self {
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify_job(&self, _event: &JobProgressEvent) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("subscriber gone")
    }

    async fn notify_worker(&self, _event: &WorkerStatusEvent) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("subscriber gone")
    }
}
