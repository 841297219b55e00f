//! Claim protocol.
//!
//! A claim selects up to `max_jobs` eligible jobs and leases them to one worker
//! in a single conditional write. Eligible means `Pending`, or `Running` with a
//! lease older than the stale-lease window (the holder is presumed dead), and
//! not scheduled for the future. Selection order is priority descending, then
//! age, then id.
//!
//! The store primitive may fail; [`claim_batch`] turns every failure into an
//! empty batch so the processing loop simply polls again.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::job::Job;
use crate::storage::Store;

/// A lease not renewed for this long may be taken over by another worker.
pub const DEFAULT_STALE_LEASE: Duration = Duration::from_secs(120);

/// Parameters of one claim against the job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimRequest {
    pub worker_id: Uuid,
    pub max_jobs: usize,
    pub now: DateTime<Utc>,
    /// Running jobs whose `lease_time` is strictly before this are reclaimable.
    pub stale_before: DateTime<Utc>,
}

impl ClaimRequest {
    pub fn new(worker_id: Uuid, max_jobs: usize, now: DateTime<Utc>, stale_lease: Duration) -> Self {
        let stale_before = chrono::Duration::from_std(stale_lease)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self {
            worker_id,
            max_jobs,
            now,
            stale_before,
        }
    }
}

/// Strict claim order: High before Regular, oldest first, then id.
pub fn claim_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .rank()
        .cmp(&a.priority.rank())
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Claim through the store, logging and absorbing any store failure.
pub async fn claim_batch(store: &dyn Store, request: ClaimRequest) -> Vec<Job> {
    if request.max_jobs == 0 {
        return Vec::new();
    }

    match store.claim_jobs(&request).await {
        Ok(mut jobs) => {
            jobs.sort_by(claim_order);
            if jobs.is_empty() {
                debug!(worker = %request.worker_id, "No claimable jobs");
            }
            for job in &jobs {
                let reclaimed = job
                    .started_at
                    .zip(job.lease_time)
                    .is_some_and(|(started, leased)| started < leased);
                info!(
                    job_id = %job.id,
                    worker = %request.worker_id,
                    priority = ?job.priority,
                    reclaimed,
                    "Job claimed"
                );
            }
            jobs
        }
        Err(e) => {
            error!(worker = %request.worker_id, "Error claiming jobs: {}", e);
            Vec::new()
        }
    }
}
