//! Per-container file staging.
//!
//! Files are written into the container's storage through the agent's view of
//! it; the runtime applies them when the container is created.

use crate::container::{ContainerName, Result};
use crate::paths::PathResolver;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Staging area for files that should appear inside one workload container.
#[derive(Debug, Clone)]
pub struct ContainerData {
    container: ContainerName,
    resolver: PathResolver,
}

impl ContainerData {
    pub fn new(container: ContainerName, resolver: PathResolver) -> Self {
        Self {
            container,
            resolver,
        }
    }

    pub fn container(&self) -> &ContainerName {
        &self.container
    }

    /// Agent-view location a workload path is staged at
    pub fn staged_path(&self, path_in_node: &Path) -> Result<PathBuf> {
        Ok(self
            .resolver
            .path_in_agent_from_path_in_node(&self.container, path_in_node)?)
    }

    /// Write `content` so it appears at `path_in_node` inside the container,
    /// replacing any previous version. Returns the agent-view path written.
    pub async fn add_file(&self, path_in_node: &Path, content: &str) -> Result<PathBuf> {
        let target = self.staged_path(path_in_node)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so the runtime never picks up a partial file
        let temp = target.with_extension("tmp");
        tokio::fs::write(&temp, content).await?;
        tokio::fs::rename(&temp, &target).await?;

        debug!(
            "Staged {} for container {} at {}",
            path_in_node.display(),
            self.container,
            target.display()
        );
        Ok(target)
    }
}
