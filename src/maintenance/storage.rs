//! Storage maintenance of workload containers on one host.

use crate::config::NodeAdminConfig;
use crate::container::{ContainerName, ContainerRuntimeClient};
use crate::maintenance::cleanup::{CleanupRule, cleanup_command};
use crate::maintenance::coredump::{CoreDumpEntry, CoreDumpHandler, CoreDumpReporter};
use crate::maintenance::disk;
use crate::maintenance::throttle::{JobKind, MaintenanceThrottle, Outcome};
use crate::maintenance::{Clock, Result, SystemClock};
use crate::node::NodeSpec;
use crate::paths::PathResolver;
use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Housekeeping for the storage of all workload containers on a host.
///
/// Operations on one container are serialized; different containers proceed
/// in parallel.
pub struct StorageMaintainer {
    runtime: ContainerRuntimeClient,
    resolver: PathResolver,
    cleanup_rules: Vec<CleanupRule>,
    throttle: MaintenanceThrottle,
    coredumps: CoreDumpHandler,
    clock: Arc<dyn Clock>,
    /// One lock per container name ever maintained; like the throttle
    /// records, entries live as long as the maintainer.
    locks: DashMap<ContainerName, Arc<Mutex<()>>>,
}

impl StorageMaintainer {
    pub fn new(runtime: ContainerRuntimeClient, config: &NodeAdminConfig) -> Self {
        Self::with_clock(runtime, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        runtime: ContainerRuntimeClient,
        config: &NodeAdminConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resolver = runtime.path_resolver().clone();
        let coredumps = CoreDumpHandler::new(resolver.clone(), config.paths.coredump_dir.clone());
        Self {
            runtime,
            resolver,
            cleanup_rules: config.cleanup_rules(),
            throttle: MaintenanceThrottle::new(config.maintenance.cleanup_cooldown),
            coredumps,
            clock,
            locks: DashMap::new(),
        }
    }

    /// Report processed core dumps through `reporter`
    pub fn with_reporter(mut self, reporter: Arc<dyn CoreDumpReporter>) -> Self {
        self.coredumps = self.coredumps.with_reporter(reporter);
        self
    }

    pub fn throttle(&self) -> &MaintenanceThrottle {
        &self.throttle
    }

    /// Bytes allocated under `path` (agent view); zero if it does not exist
    pub async fn get_disk_used_in_bytes(&self, path: &Path) -> Result<u64> {
        let path = path.to_path_buf();
        let used = tokio::task::spawn_blocking(move || disk::disk_used_in_bytes(&path)).await??;
        Ok(used)
    }

    /// Remove stale files inside `container`, at most once per cooldown.
    ///
    /// Returns `false` when throttled. Runs all cleanup rules with a single
    /// command in the container.
    ///
    /// # Errors
    ///
    /// Propagates the in-container command failure. The failure is recorded
    /// so an immediate retry is permitted.
    pub async fn remove_old_files_from_node(&self, container: &ContainerName) -> Result<bool> {
        let lock = self.lock_for(container);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        if !self.throttle.should_run(container, JobKind::FileCleanup, now) {
            debug!("Skipping file cleanup of {}: throttled", container);
            return Ok(false);
        }

        let result = match cleanup_command(&self.cleanup_rules) {
            Some(command) => self
                .runtime
                .execute_in_container(container, command.as_slice())
                .await
                .map(|_| ()),
            None => Ok(()),
        };

        self.throttle
            .record(container, JobKind::FileCleanup, now, Outcome::from(&result));
        match &result {
            Ok(()) => info!("Removed old files from {}", container),
            Err(e) => warn!("File cleanup of {} failed: {}", container, e),
        }
        result?;
        Ok(true)
    }

    /// Process and report core dumps of `container`. Never throttled.
    pub async fn handle_core_dumps_for_container(
        &self,
        container: &ContainerName,
        node: &NodeSpec,
    ) -> Result<Vec<CoreDumpEntry>> {
        let lock = self.lock_for(container);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let result = self.coredumps.process(container, node, now).await;
        self.throttle
            .record(container, JobKind::CoreDumps, now, Outcome::from(&result));
        result
    }

    /// Move the whole storage of `container` to a timestamped cleanup directory.
    ///
    /// Returns the new location, or `None` if the container had no storage.
    /// Never throttled, and makes file cleanup eligible again immediately.
    pub async fn cleanup_node_storage(
        &self,
        container: &ContainerName,
        node: &NodeSpec,
    ) -> Result<Option<PathBuf>> {
        let lock = self.lock_for(container);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let source = self.resolver.container_storage_for_agent(container);
        let target = self.resolver.node_cleanup_dir(container, now);

        let result = match tokio::fs::rename(&source, &target).await {
            Ok(()) => {
                info!(
                    "Moved storage of {} ({}) to {}",
                    container,
                    node.hostname,
                    target.display()
                );
                Ok(Some(target))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No storage to clean up for {}", container);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        };

        self.throttle
            .record(container, JobKind::NodeCleanup, now, Outcome::from(&result));
        result
    }

    fn lock_for(&self, container: &ContainerName) -> Arc<Mutex<()>> {
        self.locks.entry(container.clone()).or_default().clone()
    }
}
