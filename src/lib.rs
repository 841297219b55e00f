//! Lease-based distributed job queue
//!
//! Many worker processes pull jobs from one shared table without processing
//! any job twice at the same time. Each claim leases jobs to a worker; a
//! lease that is not renewed within the stale window can be reclaimed by
//! another worker, so a crashed worker never strands its job.
//!
//! ## Module Structure
//!
//! - `job`, `worker_node`: persisted records
//! - `lifecycle`: job state machine
//! - `claim`: eligibility, ordering and the never-failing claim wrapper
//! - `storage/`: PostgreSQL and SQLite backends behind `JobStore` / `WorkerStore`
//! - `queue`: job operations used by the API and the processor
//! - `registry`: worker registration and heartbeat
//! - `processor`: per-worker claim/execute/finalize loop
//! - `notify`: progress and worker event sinks
//! - `api/`: REST and server-sent events
//! - `config`, `error`: configuration and error types

/// REST API
pub mod api;

/// Claim protocol
pub mod claim;

pub mod config;
pub mod error;

/// Job records
pub mod job;

/// Job state machine
pub mod lifecycle;

/// Event sinks
pub mod notify;

/// Processing loop
pub mod processor;

pub mod queue;

/// Worker registration and heartbeat
pub mod registry;

/// Data persistence layer
pub mod storage;

pub mod worker_node;

pub use claim::{claim_batch, claim_order, ClaimRequest, DEFAULT_STALE_LEASE};
pub use config::{StoreConfig, WorkerConfig};
pub use error::{Result, StoreError};
pub use job::{Job, JobFilter, JobOutcome, JobPriority, JobStatus, NewJob};
pub use lifecycle::StatusChange;
pub use notify::{
    BroadcastNotifier, JobProgressEvent, NoopNotifier, Notifier, QueueEvent, WorkerStatusEvent,
};
pub use processor::{Executor, JobContext, JobProcessor, LeaseLost, SimulatedExecutor};
pub use queue::JobQueue;
pub use registry::WorkerRegistry;
pub use storage::{open_store, JobStore, PgStore, RowUpdate, SqliteStore, Store, WorkerStore};
pub use worker_node::{WorkerNode, WorkerStatus};
