//! Job lifecycle state machine.
//!
//! ```text
//!            claim                finish
//!  Pending ─────────► Running ─────────► Completed
//!     ▲  │               │ │
//!     │  │ stop          │ └──────────► Failed ──┐
//!     │  ▼               └────────────► Stopped ─┤
//!     │ Stopped                                  │
//!     └──────────────── restart ─────────────────┘
//! ```
//!
//! Both store backends turn these rules into SQL preconditions, so a write the
//! table does not allow never reaches a row.

use crate::job::JobStatus;

const FROM_RUNNING: &[JobStatus] = &[JobStatus::Running];
const FROM_RUNNING_OR_PENDING: &[JobStatus] = &[JobStatus::Running, JobStatus::Pending];
const RESTARTABLE: &[JobStatus] = &[JobStatus::Failed, JobStatus::Stopped];
const NONE: &[JobStatus] = &[];

impl JobStatus {
    /// No further progress is expected without an explicit restart.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped
        )
    }

    pub fn is_restartable(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Stopped)
    }

    /// Whether `self -> next` is an edge of the state machine. Claims are the
    /// only way into `Running`, including the reclaim of a stale lease.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match next {
            JobStatus::Running => matches!(self, JobStatus::Pending | JobStatus::Running),
            _ => permitted_sources(next).contains(&self),
        }
    }
}

/// Statuses from which an explicit (non-claim) write may move a job to `target`.
pub fn permitted_sources(target: JobStatus) -> &'static [JobStatus] {
    match target {
        JobStatus::Pending => RESTARTABLE,
        JobStatus::Running => NONE,
        JobStatus::Completed | JobStatus::Failed => FROM_RUNNING,
        JobStatus::Stopped => FROM_RUNNING_OR_PENDING,
    }
}

/// Statuses whose first entry stamps `completed_at`.
pub fn stamps_completion(status: JobStatus) -> bool {
    matches!(status, JobStatus::Completed | JobStatus::Failed)
}

/// How an externally requested status write is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// `Failed | Stopped -> Pending`, clears the run.
    Restart,
    /// Conditional write guarded by [`permitted_sources`].
    Finish(JobStatus),
    /// Only a claim may start a job.
    ClaimOnly,
}

impl StatusChange {
    pub fn for_target(target: JobStatus) -> Self {
        match target {
            JobStatus::Pending => StatusChange::Restart,
            JobStatus::Running => StatusChange::ClaimOnly,
            other => StatusChange::Finish(other),
        }
    }
}

/// SQL literal list of the sources allowed for `target`, e.g. `'running','pending'`.
/// The values are fixed identifiers, never user input.
pub(crate) fn sql_source_list(target: JobStatus) -> String {
    permitted_sources(target)
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}
