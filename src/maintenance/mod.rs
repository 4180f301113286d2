//! # Storage Maintenance
//!
//! Periodic housekeeping of workload container storage with failure-aware
//! throttling.
//!
//! ## Core Components
//!
//! - **[`MaintenanceThrottle`]**: per-container, per-job-kind cooldown state machine
//! - **[`StorageMaintainer`]**: disk usage, stale file removal, core-dump handling
//!   and full storage cleanup for one host
//! - **[`CoreDumpHandler`]**: discovered → processed → reported pipeline for core dumps
//! - **[`CleanupRule`]**: declarative file retention rules run inside the container
//! - **[`Clock`]**: time source, [`ManualClock`] for tests
//!
//! ## Throttling
//!
//! ```text
//!            success                 cooldown expired
//!   Idle ─────────────▶ Cooling ──────────────────────▶ Idle
//!    ▲  │ failure                         │ node cleanup
//!    └──┘                                 └───────────▶ Idle
//! ```
//!
//! Only periodic file cleanup is throttled. Core-dump handling and full node
//! cleanup run on every invocation, and a node cleanup makes file cleanup
//! eligible again immediately.
//!
//! ## Concurrency
//!
//! The scheduler normally assigns each container to a single worker. The
//! maintainer still serializes all operations on one container behind a
//! per-container lock so the throttle's read-decide-update cycle is never
//! interleaved for the same container.

use crate::container::ContainerError;
use crate::paths::PathError;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

pub mod cleanup;
pub mod coredump;
pub mod disk;
pub mod storage;
pub mod throttle;

pub use cleanup::CleanupRule;
pub use coredump::{
    CoreDumpEntry, CoreDumpHandler, CoreDumpMetadata, CoreDumpReporter, CoreDumpState,
    FeedReporter,
};
pub use disk::disk_used_in_bytes;
pub use storage::StorageMaintainer;
pub use throttle::{JobKind, MaintenanceRecord, MaintenanceThrottle, Outcome, ThrottleState};

/// Errors from maintenance jobs
#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// Core-dump feed unreachable or rejected the report
    #[error("Failed to upload core dump {id}: {message}")]
    Upload { id: String, message: String },

    #[error("Invalid core dump metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl MaintenanceError {
    /// Whether the scheduler may retry the job without changing its input
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidPath(_) => false,
            Self::Container(e) => e.is_retryable(),
            _ => true,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Container(ContainerError::Timeout { .. }))
    }
}

pub type Result<T> = std::result::Result<T, MaintenanceError>;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
