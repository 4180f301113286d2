//! End-to-end maintenance of one workload container's storage, driven by a
//! manual clock and a fake container engine.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use node_admin::container::{
    ContainerEngine, ContainerHandle, ContainerName, ContainerRuntimeClient, ProcessResult,
};
use node_admin::executor::HostExecutor;
use node_admin::maintenance::{
    Clock, CoreDumpMetadata, CoreDumpReporter, CoreDumpState, JobKind, ManualClock, MaintenanceError,
    StorageMaintainer, ThrottleState,
};
use node_admin::{NodeAdminConfig, NodeSpec};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const MINUTE: Duration = Duration::from_secs(60);

#[derive(Default)]
struct ScriptedEngine {
    commands: Mutex<Vec<Vec<String>>>,
    exit_code: AtomicI32,
    delay_millis: AtomicU64,
}

impl ScriptedEngine {
    fn exec_count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

#[async_trait]
impl ContainerEngine for ScriptedEngine {
    async fn execute_in_container_as_root(
        &self,
        _container: &ContainerName,
        command: &[String],
    ) -> node_admin::container::Result<ProcessResult> {
        self.commands.lock().unwrap().push(command.to_vec());
        let delay = self.delay_millis.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let exit_code = self.exit_code.load(Ordering::SeqCst);
        Ok(ProcessResult::new(exit_code, "", if exit_code == 0 { "" } else { "find: failed" }))
    }

    async fn get_container(
        &self,
        container: &ContainerName,
    ) -> node_admin::container::Result<Option<ContainerHandle>> {
        Ok(Some(ContainerHandle::running(container.clone(), 4242)))
    }
}

#[derive(Default)]
struct CollectingReporter {
    reports: Mutex<Vec<CoreDumpMetadata>>,
}

#[async_trait]
impl CoreDumpReporter for CollectingReporter {
    async fn report(&self, metadata: &CoreDumpMetadata) -> node_admin::maintenance::Result<()> {
        self.reports.lock().unwrap().push(metadata.clone());
        Ok(())
    }
}

struct Host {
    temp_dir: TempDir,
    engine: Arc<ScriptedEngine>,
    clock: Arc<ManualClock>,
    maintainer: StorageMaintainer,
    container: ContainerName,
    node: NodeSpec,
}

impl Host {
    fn new() -> Self {
        Self::with_reporter(None)
    }

    fn with_reporter(reporter: Option<Arc<CollectingReporter>>) -> Self {
        Self::build(reporter, |config| config)
    }

    fn with_command_timeout(timeout: Duration) -> Self {
        Self::build(None, |config| config.with_command_timeout(timeout))
    }

    fn build(
        reporter: Option<Arc<CollectingReporter>>,
        configure: impl FnOnce(NodeAdminConfig) -> NodeAdminConfig,
    ) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = configure(NodeAdminConfig::default().with_host_root_in_agent(temp_dir.path()));
        let engine = Arc::new(ScriptedEngine::default());
        let runtime = ContainerRuntimeClient::new(
            engine.clone(),
            Arc::new(HostExecutor::new()),
            Arc::new(config.clone()),
        );
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 14, 9, 0, 0).unwrap(),
        ));
        let mut maintainer = StorageMaintainer::with_clock(runtime, &config, clock.clone());
        if let Some(reporter) = reporter {
            maintainer = maintainer.with_reporter(reporter);
        }

        Self {
            temp_dir,
            engine,
            clock,
            maintainer,
            container: ContainerName::from_hostname("node-7.us-east-1.example.com").unwrap(),
            node: NodeSpec::builder("node-7.us-east-1.example.com")
                .owner("tenant", "application", "default")
                .build(),
        }
    }

    fn storage_root(&self) -> PathBuf {
        self.temp_dir.path().join("home/docker/container-storage")
    }

    fn container_storage(&self) -> PathBuf {
        self.storage_root().join("node-7")
    }

    fn write_dump(&self, name: &str, contents: &[u8]) -> PathBuf {
        let crash_dir = self.container_storage().join("var/crash");
        std::fs::create_dir_all(&crash_dir).unwrap();
        let path = crash_dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    async fn clean_files(&self) -> bool {
        self.maintainer
            .remove_old_files_from_node(&self.container)
            .await
            .unwrap()
    }
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_maintenance_cycle_of_one_container() {
    let host = Host::new();
    std::fs::create_dir_all(host.container_storage().join("opt/workload/logs")).unwrap();

    // t=0: first cleanup runs
    assert!(host.clean_files().await);
    assert_eq!(host.engine.exec_count(), 1);

    // t=10min: within the cooldown
    host.clock.advance(10 * MINUTE);
    assert!(!host.clean_files().await);
    assert_eq!(host.engine.exec_count(), 1);
    assert!(matches!(
        host.maintainer
            .throttle()
            .state(&host.container, JobKind::FileCleanup, host.clock.now()),
        ThrottleState::Cooling { .. }
    ));

    // t=61min: cooldown elapsed
    host.clock.advance(51 * MINUTE);
    assert!(host.clean_files().await);
    assert_eq!(host.engine.exec_count(), 2);

    // Core dumps are never throttled
    host.write_dump("core.100", b"first crash");
    let first = host
        .maintainer
        .handle_core_dumps_for_container(&host.container, &host.node)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    let second = host
        .maintainer
        .handle_core_dumps_for_container(&host.container, &host.node)
        .await
        .unwrap();
    assert!(second.is_empty());

    // Archiving storage clears the cleanup history
    let archived = host
        .maintainer
        .cleanup_node_storage(&host.container, &host.node)
        .await
        .unwrap()
        .expect("storage existed");
    assert!(!host.container_storage().exists());
    assert!(archived.join("opt/workload/logs").is_dir());

    // t=62min: permitted again right after the node cleanup
    host.clock.advance(MINUTE);
    assert!(host.clean_files().await);
    assert_eq!(host.engine.exec_count(), 3);
}

#[tokio::test]
async fn test_cleanup_command_runs_all_rules_at_once() {
    let host = Host::new();
    assert!(host.clean_files().await);

    let commands = host.engine.commands.lock().unwrap();
    assert_eq!(commands.len(), 1);
    let command = &commands[0];
    assert_eq!(command[0], "sh");
    assert_eq!(command[1], "-c");
    assert!(command[2].contains("/opt/workload/logs"));
    assert!(command[2].contains("-delete"));
}

#[tokio::test]
async fn test_failed_cleanup_is_not_throttled() {
    let host = Host::new();
    host.engine.exit_code.store(2, Ordering::SeqCst);

    let err = host
        .maintainer
        .remove_old_files_from_node(&host.container)
        .await
        .unwrap_err();
    assert!(matches!(err, MaintenanceError::Container(_)));
    assert!(err.is_retryable());

    let record = host.maintainer.throttle().record_of(&host.container).unwrap();
    assert_eq!(record.consecutive_failures(), 1);
    assert!(record.last_success(JobKind::FileCleanup).is_none());

    host.clock.advance(MINUTE);
    host.engine.exit_code.store(0, Ordering::SeqCst);
    assert!(host.clean_files().await);

    host.clock.advance(MINUTE);
    assert!(!host.clean_files().await);
    assert_eq!(host.engine.exec_count(), 2);
}

#[tokio::test]
async fn test_concurrent_cleanups_of_one_container_run_once() {
    let host = Host::new();
    host.engine.delay_millis.store(100, Ordering::SeqCst);

    let (first, second) = tokio::join!(
        host.maintainer.remove_old_files_from_node(&host.container),
        host.maintainer.remove_old_files_from_node(&host.container),
    );

    let mut ran = vec![first.unwrap(), second.unwrap()];
    ran.sort();
    assert_eq!(ran, vec![false, true]);
    assert_eq!(host.engine.exec_count(), 1);
}

#[tokio::test]
async fn test_timed_out_cleanup_is_retried_immediately() {
    let host = Host::with_command_timeout(Duration::from_millis(20));
    host.engine.delay_millis.store(500, Ordering::SeqCst);

    let err = host
        .maintainer
        .remove_old_files_from_node(&host.container)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(
        host.maintainer
            .throttle()
            .should_run(&host.container, JobKind::FileCleanup, host.clock.now())
    );

    host.engine.delay_millis.store(0, Ordering::SeqCst);
    assert!(host.clean_files().await);
    assert_eq!(host.engine.exec_count(), 2);
}

#[tokio::test]
async fn test_core_dumps_reported_with_node_metadata() {
    let reporter = Arc::new(CollectingReporter::default());
    let host = Host::with_reporter(Some(reporter.clone()));
    let original = host.write_dump("core.java.4711", b"crash contents that compress well well well");

    let entries = host
        .maintainer
        .handle_core_dumps_for_container(&host.container, &host.node)
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.state(), CoreDumpState::Reported);
    assert_eq!(entry.file_name(), "core.java.4711");
    assert!(!original.exists());

    let reported_dir = host
        .storage_root()
        .join("processed-coredumps")
        .join("node-7")
        .join(entry.id());
    assert_eq!(entry.location(), reported_dir.as_path());
    assert_eq!(
        file_names(&reported_dir),
        vec!["core.java.4711.gz".to_string(), "metadata.json".to_string()]
    );

    let reports = reporter.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].id, entry.id());
    assert_eq!(reports[0].hostname, "node-7.us-east-1.example.com");
    assert_eq!(reports[0].container, host.container);
    assert!(reports[0].owner.is_some());
}

#[tokio::test]
async fn test_disk_usage_of_container_storage() {
    let host = Host::new();
    let storage = host.container_storage();
    std::fs::create_dir_all(storage.join("data")).unwrap();
    // Incompressible content so filesystems with compression still allocate it
    let mut state = 0x2545_f491_u32;
    let blob: Vec<u8> = (0..64 * 1024)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect();
    let mut file = std::fs::File::create(storage.join("data/blob")).unwrap();
    file.write_all(&blob).unwrap();
    file.sync_all().unwrap();

    let used = host.maintainer.get_disk_used_in_bytes(&storage).await.unwrap();
    assert!(used >= 64 * 1024, "expected at least 64 KiB, got {used}");

    let missing = host
        .maintainer
        .get_disk_used_in_bytes(&host.temp_dir.path().join("nowhere"))
        .await
        .unwrap();
    assert_eq!(missing, 0);
}
