//! Core-dump capture and reporting.
//!
//! Each dump moves through three locations, one per state:
//!
//! ```text
//! discovered  <coredump_dir>/core.1234
//! processed   <coredump_dir>/processing/<id>/core.1234.gz + metadata.json
//! reported    <storage>/processed-coredumps/<container>/<id>/
//! ```
//!
//! A dump is compressed into a hidden `processing/.<id>` directory that is
//! renamed into place once its metadata is written. Every later state change
//! is a single rename, so a crash at any point leaves each dump in exactly
//! one location and the next scan picks it up from there. Staging leftovers
//! are removed by the next scan. States only move forward.

use crate::container::ContainerName;
use crate::identity::IdentityTlsConnector;
use crate::maintenance::{MaintenanceError, Result};
use crate::node::{NodeSpec, NodeState, NodeType, Owner};
use crate::paths::PathResolver;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Subdirectory of the core-dump directory holding processed dumps
pub const PROCESSING_DIR_NAME: &str = "processing";

pub const METADATA_FILE_NAME: &str = "metadata.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreDumpState {
    Discovered,
    Processed,
    Reported,
}

/// One core dump and where it currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreDumpEntry {
    id: String,
    file_name: String,
    state: CoreDumpState,
    location: PathBuf,
}

impl CoreDumpEntry {
    fn new(id: String, file_name: String, state: CoreDumpState, location: PathBuf) -> Self {
        Self {
            id,
            file_name,
            state,
            location,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the dump file as written by the kernel
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn state(&self) -> CoreDumpState {
        self.state
    }

    /// Agent-view path of the dump file (discovered) or its directory (later states)
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Move to `state` at `location`. Backward or repeated moves are ignored.
    pub fn advance(&mut self, state: CoreDumpState, location: PathBuf) -> bool {
        if state <= self.state {
            return false;
        }
        self.state = state;
        self.location = location;
        true
    }
}

/// Annotation stored next to a processed dump and sent to the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreDumpMetadata {
    pub id: String,
    pub container: ContainerName,
    pub hostname: String,
    pub file_name: String,
    pub compressed_size: u64,
    pub created_at: DateTime<Utc>,
    pub node_state: NodeState,
    pub node_type: NodeType,
    pub flavor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,
}

/// Destination of core-dump reports.
#[async_trait]
pub trait CoreDumpReporter: Send + Sync {
    /// # Errors
    ///
    /// [`MaintenanceError::Upload`] if the report was not accepted.
    async fn report(&self, metadata: &CoreDumpMetadata) -> Result<()>;
}

/// Reports core dumps by POSTing their metadata as JSON to a feed endpoint.
///
/// With an identity attached, every request uses the credential current at
/// the time of the request.
#[derive(Clone)]
pub struct FeedReporter {
    endpoint: Url,
    identity: Option<Arc<IdentityTlsConnector>>,
    timeout: Duration,
}

impl FeedReporter {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            identity: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_identity(mut self, identity: Arc<IdentityTlsConnector>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn client(&self) -> reqwest::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(identity) = &self.identity {
            let tls = identity.current().client_config();
            builder = builder.use_preconfigured_tls((*tls).clone());
        }
        builder.build()
    }
}

#[async_trait]
impl CoreDumpReporter for FeedReporter {
    async fn report(&self, metadata: &CoreDumpMetadata) -> Result<()> {
        let upload_error = |e: reqwest::Error| MaintenanceError::Upload {
            id: metadata.id.clone(),
            message: e.to_string(),
        };

        let client = self.client().map_err(upload_error)?;
        let response = client
            .post(self.endpoint.clone())
            .json(metadata)
            .send()
            .await
            .map_err(upload_error)?;
        response.error_for_status().map_err(upload_error)?;

        debug!("Reported core dump {} to {}", metadata.id, self.endpoint);
        Ok(())
    }
}

/// Moves core dumps of workload containers through the pipeline.
#[derive(Clone)]
pub struct CoreDumpHandler {
    resolver: PathResolver,
    coredump_dir: PathBuf,
    reporter: Option<Arc<dyn CoreDumpReporter>>,
}

impl CoreDumpHandler {
    /// `coredump_dir` is the core-dump directory as seen inside the workload container
    pub fn new(resolver: PathResolver, coredump_dir: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            coredump_dir: coredump_dir.into(),
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn CoreDumpReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Process new dumps of `container` and report every processed one.
    ///
    /// Without a reporter, dumps are marked reported without any upload. A
    /// failed report leaves its dump processed for the next run; all other
    /// dumps are still attempted and the first failure is returned afterwards.
    pub async fn process(
        &self,
        container: &ContainerName,
        node: &NodeSpec,
        now: DateTime<Utc>,
    ) -> Result<Vec<CoreDumpEntry>> {
        let crash_dir = self
            .resolver
            .path_in_agent_from_path_in_node(container, &self.coredump_dir)?;
        let context = DumpContext {
            container: container.clone(),
            node: node.clone(),
            now,
        };

        let (discovered, pending) = tokio::task::spawn_blocking(move || {
            let discovered = discover(&crash_dir, &context);
            processed(&crash_dir.join(PROCESSING_DIR_NAME)).map(|pending| (discovered, pending))
        })
        .await??;

        let reported_dir = self
            .resolver
            .processed_coredumps_dir()
            .join(container.as_str());
        let mut entries = Vec::with_capacity(pending.len());
        let mut first_error = discovered.err();

        for (mut entry, metadata) in pending {
            let report = match &self.reporter {
                Some(reporter) => reporter.report(&metadata).await,
                None => Ok(()),
            };
            match report {
                Ok(()) => {
                    let target = reported_dir.join(entry.id());
                    match move_reported(entry.location(), &target).await {
                        Ok(()) => {
                            entry.advance(CoreDumpState::Reported, target);
                            info!("Reported core dump {} of {}", entry.id(), container);
                        }
                        Err(e) => {
                            warn!(
                                "Reported core dump {} of {} but could not move it: {}",
                                entry.id(),
                                container,
                                e
                            );
                            first_error.get_or_insert(e.into());
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to report core dump {} of {}: {}", entry.id(), container, e);
                    first_error.get_or_insert(e);
                }
            }
            entries.push(entry);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(entries),
        }
    }
}

struct DumpContext {
    container: ContainerName,
    node: NodeSpec,
    now: DateTime<Utc>,
}

impl DumpContext {
    fn metadata(
        &self,
        id: &str,
        file_name: &str,
        compressed_size: u64,
        created_at: Option<DateTime<Utc>>,
    ) -> CoreDumpMetadata {
        CoreDumpMetadata {
            id: id.to_string(),
            container: self.container.clone(),
            hostname: self.node.hostname.clone(),
            file_name: file_name.to_string(),
            compressed_size,
            created_at: created_at.unwrap_or(self.now),
            node_state: self.node.state,
            node_type: self.node.node_type,
            flavor: self.node.flavor.clone(),
            owner: self.node.owner.clone(),
            docker_image: self.node.wanted_docker_image.clone(),
        }
    }
}

/// Compress every dump file directly in `crash_dir` into the processing area.
///
/// A dump that cannot be processed stays where it is and leaves nothing
/// behind; the remaining dumps are still processed and the first failure is
/// returned.
fn discover(crash_dir: &Path, context: &DumpContext) -> Result<()> {
    let entries = match fs::read_dir(crash_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut first_error = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.starts_with('.') {
            continue;
        }

        let id = Uuid::new_v4().to_string();
        let mut dump = CoreDumpEntry::new(
            id.clone(),
            file_name.clone(),
            CoreDumpState::Discovered,
            entry.path(),
        );
        info!("Discovered core dump {} of {} as {}", file_name, context.container, id);

        let processing_dir = crash_dir.join(PROCESSING_DIR_NAME);
        let staging = processing_dir.join(format!(".{}", id));
        let target = processing_dir.join(&id);
        let staged = stage(&entry.path(), &file_name, &staging, &id, context)
            .and_then(|()| fs::rename(&staging, &target).map_err(Into::into));
        if let Err(e) = staged {
            warn!("Failed to process core dump {} of {}: {}", file_name, context.container, e);
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", staging.display(), cleanup);
                }
            }
            first_error.get_or_insert(e);
            continue;
        }
        fs::remove_file(entry.path())?;

        dump.advance(CoreDumpState::Processed, target);
        debug!("Core dump {} processed at {}", dump.id(), dump.location().display());
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Compressed dump and its metadata, written into the hidden `staging` directory
fn stage(
    source: &Path,
    file_name: &str,
    staging: &Path,
    id: &str,
    context: &DumpContext,
) -> Result<()> {
    fs::create_dir_all(staging)?;
    let compressed_size = compress(source, &staging.join(format!("{}.gz", file_name)))?;
    let created_at = fs::metadata(source)?.modified().ok().map(DateTime::<Utc>::from);
    let metadata = context.metadata(id, file_name, compressed_size, created_at);
    write_metadata(staging, &metadata)
}

/// All processed dumps awaiting a report, oldest first.
///
/// Leftovers of interrupted processing (hidden staging directories, or
/// directories without metadata) are removed.
fn processed(processing_dir: &Path) -> Result<Vec<(CoreDumpEntry, CoreDumpMetadata)>> {
    let entries = match fs::read_dir(processing_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut pending = Vec::new();
    for entry in entries {
        let entry = entry?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        let bytes = match fs::read(dir.join(METADATA_FILE_NAME)) {
            Ok(bytes) if !hidden => bytes,
            Ok(_) => {
                discard(&dir);
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                discard(&dir);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let metadata: CoreDumpMetadata = serde_json::from_slice(&bytes)?;
        let entry = CoreDumpEntry::new(
            metadata.id.clone(),
            metadata.file_name.clone(),
            CoreDumpState::Processed,
            dir,
        );
        pending.push((entry, metadata));
    }

    pending.sort_by(|(_, a), (_, b)| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(pending)
}

fn discard(dir: &Path) {
    warn!("Removing incomplete core dump directory {}", dir.display());
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!("Failed to remove {}: {}", dir.display(), e);
    }
}

async fn move_reported(source: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(source, target).await
}

/// Gzip `source` into `target`, returning the compressed size
fn compress(source: &Path, target: &Path) -> io::Result<u64> {
    let mut input = File::open(source)?;
    let mut encoder = GzEncoder::new(File::create(target)?, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    let output = encoder.finish()?;
    output.sync_all()?;
    Ok(output.metadata()?.len())
}

fn write_metadata(dir: &Path, metadata: &CoreDumpMetadata) -> Result<()> {
    let path = dir.join(METADATA_FILE_NAME);
    let tmp = dir.join(format!("{}.tmp", METADATA_FILE_NAME));
    fs::write(&tmp, serde_json::to_vec_pretty(metadata)?)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}
