//! Runtime configuration for the store and the worker process.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::claim::DEFAULT_STALE_LEASE;
use crate::error::{Result, StoreError};

/// Which backend to open.
#[derive(Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Postgres { url: String },
    Sqlite { path: PathBuf },
    SqliteInMemory,
}

impl StoreConfig {
    /// PostgreSQL when a URL is given, else the SQLite file, else an in-memory database.
    pub fn resolve(database_url: Option<String>, sqlite_path: Option<PathBuf>) -> Self {
        match (database_url.filter(|u| !u.is_empty()), sqlite_path) {
            (Some(url), _) => StoreConfig::Postgres { url },
            (None, Some(path)) => StoreConfig::Sqlite { path },
            (None, None) => StoreConfig::SqliteInMemory,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreConfig::Postgres { .. } => f
                .debug_struct("Postgres")
                .field("url", &"[REDACTED]")
                .finish(),
            StoreConfig::Sqlite { path } => f.debug_struct("Sqlite").field("path", path).finish(),
            StoreConfig::SqliteInMemory => f.write_str("SqliteInMemory"),
        }
    }
}

/// Timing of one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Display name of the worker node.
    pub name: String,
    /// Sleep between claims when the queue is empty
    pub poll_interval: Duration,
    /// Upper bound of the random delay added to each poll sleep
    pub poll_jitter: Duration,
    pub heartbeat_interval: Duration,
    /// Leases older than this may be reclaimed by other workers
    pub stale_lease: Duration,
    /// Delay between progress ticks of the simulated payload
    pub step_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            poll_interval: Duration::from_secs(5),
            poll_jitter: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(15),
            stale_lease: DEFAULT_STALE_LEASE,
            step_delay: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    /// The stale window must exceed twice the longest gap between renewals.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() || self.heartbeat_interval.is_zero() {
            return Err(StoreError::Config(
                "poll and heartbeat intervals must be positive".to_string(),
            ));
        }
        let renew_every = self.heartbeat_interval.max(self.step_delay);
        if self.stale_lease <= renew_every * 2 {
            return Err(StoreError::Config(format!(
                "stale lease {:?} must exceed twice the renewal interval {:?}",
                self.stale_lease, renew_every
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.stale_lease, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_stale_lease() {
        let config = WorkerConfig {
            stale_lease: Duration::from_secs(30),
            ..WorkerConfig::default()
        };
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));

        let slow_steps = WorkerConfig {
            step_delay: Duration::from_secs(90),
            ..WorkerConfig::default()
        };
        assert!(slow_steps.validate().is_err());
    }

    #[test]
    fn test_store_config_resolution() {
        assert_eq!(
            StoreConfig::resolve(Some("postgres://db".into()), Some("x.db".into())),
            StoreConfig::Postgres {
                url: "postgres://db".into()
            }
        );
        assert_eq!(
            StoreConfig::resolve(Some(String::new()), Some("x.db".into())),
            StoreConfig::Sqlite {
                path: "x.db".into()
            }
        );
        assert_eq!(StoreConfig::resolve(None, None), StoreConfig::SqliteInMemory);
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let store = format!(
            "{:?}",
            StoreConfig::Postgres {
                url: "postgres://u:secret@h/db".into()
            }
        );
        assert!(!store.contains("secret"));
    }
}
