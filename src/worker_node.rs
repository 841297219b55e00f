use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerStatus {
    Available,
    Busy,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Available => "available",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "available" => Ok(WorkerStatus::Available),
            "busy" => Ok(WorkerStatus::Busy),
            "offline" => Ok(WorkerStatus::Offline),
            other => Err(StoreError::InvalidData(format!(
                "unknown worker status {}",
                other
            ))),
        }
    }
}

/// Observational record of one worker process. Never consulted by the claim path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerNode {
    pub id: Uuid,
    pub name: String,
    pub last_heartbeat: DateTime<Utc>,
    pub active: bool,
    pub status: WorkerStatus,
    pub current_job_id: Option<Uuid>,
    pub registered_at: DateTime<Utc>,
}

impl WorkerNode {
    /// Fresh registration row: active and available.
    pub fn new(id: Uuid, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            last_heartbeat: now,
            active: true,
            status: WorkerStatus::Available,
            current_job_id: None,
            registered_at: now,
        }
    }

    pub fn is_processing_job(&self) -> bool {
        self.current_job_id.is_some()
    }
}
