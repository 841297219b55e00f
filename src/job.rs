//! Job records and the values used to create, filter and finish them.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StoreError;

/// Two-level admission priority. High jobs are always claimed before Regular ones.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum JobPriority {
    #[default]
    Regular,
    High,
}

impl JobPriority {
    /// Persisted rank; `ORDER BY priority DESC` yields High first.
    pub fn rank(self) -> i16 {
        match self {
            JobPriority::Regular => 0,
            JobPriority::High => 1,
        }
    }

    pub fn from_rank(rank: i16) -> Result<Self, StoreError> {
        match rank {
            0 => Ok(JobPriority::Regular),
            1 => Ok(JobPriority::High),
            other => Err(StoreError::InvalidData(format!(
                "unknown priority rank {}",
                other
            ))),
        }
    }
}

impl FromStr for JobPriority {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "regular" => Ok(JobPriority::Regular),
            "high" => Ok(JobPriority::High),
            other => Err(StoreError::InvalidData(format!("unknown priority {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Stopped,
    ];

    /// Column value used by both SQL backends.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StoreError::InvalidData(format!("unknown job status {}", s)))
    }
}

/// A job row as persisted by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub progress: i32,
    pub created_at: DateTime<Utc>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub lease_holder: Option<Uuid>,
    pub lease_time: Option<DateTime<Utc>>,
    pub retry_count: i32,
}

/// Enqueue request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub name: String,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(name: impl Into<String>, priority: JobPriority) -> Self {
        Self {
            name: name.into(),
            priority,
            scheduled_start: None,
        }
    }

    pub fn scheduled_at(mut self, start: DateTime<Utc>) -> Self {
        self.scheduled_start = Some(start);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub priority: Option<JobPriority>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.priority.map_or(true, |p| job.priority == p)
    }
}

/// Terminal result of one run, written by the lease holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
    Stopped(String),
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed => JobStatus::Completed,
            JobOutcome::Failed(_) => JobStatus::Failed,
            JobOutcome::Stopped(_) => JobStatus::Stopped,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            JobOutcome::Completed => None,
            JobOutcome::Failed(msg) | JobOutcome::Stopped(msg) => Some(msg),
        }
    }
}

/// Current time at millisecond precision, the resolution both stores keep.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Progress values are percentages.
pub fn clamp_progress(progress: i32) -> i32 {
    progress.clamp(0, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_rank_orders_high_first() {
        assert!(JobPriority::High.rank() > JobPriority::Regular.rank());
        assert_eq!(JobPriority::from_rank(1).unwrap(), JobPriority::High);
        assert!(JobPriority::from_rank(7).is_err());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Running".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert_eq!("stopped".parse::<JobStatus>().unwrap(), JobStatus::Stopped);
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_serializes_camel_case() {
        let job = Job {
            id: Uuid::nil(),
            name: "encode".to_string(),
            priority: JobPriority::High,
            status: JobStatus::Pending,
            progress: 0,
            created_at: Utc::now(),
            scheduled_start: None,
            started_at: None,
            completed_at: None,
            error_message: None,
            lease_holder: None,
            lease_time: None,
            retry_count: 0,
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["priority"], "High");
        assert_eq!(value["status"], "Pending");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("leaseHolder").is_some());
    }

    #[test]
    fn test_filter_matches() {
        let filter = JobFilter {
            status: Some(JobStatus::Pending),
            priority: None,
        };
        let mut job = Job {
            id: Uuid::new_v4(),
            name: "a".to_string(),
            priority: JobPriority::Regular,
            status: JobStatus::Pending,
            progress: 0,
            created_at: Utc::now(),
            scheduled_start: None,
            started_at: None,
            completed_at: None,
            error_message: None,
            lease_holder: None,
            lease_time: None,
            retry_count: 0,
        };
        assert!(filter.matches(&job));
        job.status = JobStatus::Failed;
        assert!(!filter.matches(&job));
    }

    #[test]
    fn test_clamp_progress() {
        assert_eq!(clamp_progress(-5), 0);
        assert_eq!(clamp_progress(140), 100);
        assert_eq!(clamp_progress(40), 40);
    }

    #[test]
    fn test_now_millis_has_no_sub_millisecond_part() {
        assert_eq!(now_millis().timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
