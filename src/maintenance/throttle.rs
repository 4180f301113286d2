//! Maintenance throttling.
//!
//! Decides per (container, job kind) whether a maintenance job may run now.
//! State is held in memory only and starts empty after every agent restart.

use crate::container::ContainerName;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Kinds of maintenance job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Periodic removal of stale files; throttled
    FileCleanup,
    /// Core-dump capture and reporting; never throttled
    CoreDumps,
    /// Full archive-and-clear of a container's storage; never throttled
    NodeCleanup,
}

impl JobKind {
    pub fn is_throttled(self) -> bool {
        matches!(self, JobKind::FileCleanup)
    }
}

/// Outcome of a permitted attempt, reported back by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl<T, E> From<&Result<T, E>> for Outcome {
    fn from(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    /// May run now
    Idle,
    /// Last attempt succeeded; next run allowed at `until`
    Cooling { until: DateTime<Utc> },
}

/// Maintenance history of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceRecord {
    last_success: HashMap<JobKind, DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

impl MaintenanceRecord {
    pub fn last_success(&self, kind: JobKind) -> Option<DateTime<Utc>> {
        self.last_success.get(&kind).copied()
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Cooldown state machine for maintenance jobs.
///
/// [`should_run`](Self::should_run) is pure given the stored records and `now`;
/// records change only through [`record`](Self::record) and [`reset`](Self::reset).
/// Callers must not interleave decide and record for the same container.
#[derive(Debug)]
pub struct MaintenanceThrottle {
    cooldown: chrono::Duration,
    records: DashMap<ContainerName, MaintenanceRecord>,
}

impl MaintenanceThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown: chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX),
            records: DashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown.to_std().unwrap_or(Duration::MAX)
    }

    pub fn state(&self, container: &ContainerName, kind: JobKind, now: DateTime<Utc>) -> ThrottleState {
        if !kind.is_throttled() {
            return ThrottleState::Idle;
        }

        let last_success = self
            .records
            .get(container)
            .and_then(|record| record.last_success(kind));

        match last_success {
            Some(at) => {
                let until = at
                    .checked_add_signed(self.cooldown)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                if now < until {
                    ThrottleState::Cooling { until }
                } else {
                    ThrottleState::Idle
                }
            }
            None => ThrottleState::Idle,
        }
    }

    /// Whether `kind` may run for `container` at `now`
    pub fn should_run(&self, container: &ContainerName, kind: JobKind, now: DateTime<Utc>) -> bool {
        let state = self.state(container, kind, now);
        debug!("Throttle for {} {:?}: {:?}", container, kind, state);
        state == ThrottleState::Idle
    }

    /// Record the outcome of an attempt made at `now`.
    ///
    /// Success starts the cooldown of a throttled kind; failure clears it so
    /// the job can be retried at once. A node cleanup, whatever its outcome,
    /// clears the file-cleanup cooldown.
    pub fn record(&self, container: &ContainerName, kind: JobKind, now: DateTime<Utc>, outcome: Outcome) {
        let mut record = self.records.entry(container.clone()).or_default();
        record.last_attempt = Some(now);

        match outcome {
            Outcome::Success => {
                record.consecutive_failures = 0;
                if kind.is_throttled() {
                    record.last_success.insert(kind, now);
                }
            }
            Outcome::Failure => {
                record.consecutive_failures += 1;
                record.last_success.remove(&kind);
            }
        }

        if kind == JobKind::NodeCleanup {
            record.last_success.remove(&JobKind::FileCleanup);
        }
    }

    /// Make `kind` immediately eligible for `container`
    pub fn reset(&self, container: &ContainerName, kind: JobKind) {
        if let Some(mut record) = self.records.get_mut(container) {
            record.last_success.remove(&kind);
        }
    }

    /// Snapshot of a container's record
    pub fn record_of(&self, container: &ContainerName) -> Option<MaintenanceRecord> {
        self.records.get(container).map(|record| record.clone())
    }
}
