//! Path translation between the host, the agent container and workload containers.
//!
//! Every workload container's filesystem is backed by
//! `<application_storage>/<container name>/` on the host. The agent container
//! sees the host root mounted at `host_root_in_agent`, so the same inode has
//! three absolute paths:
//!
//! ```text
//! workload:  /var/crash/core.123
//! host:      /home/docker/container-storage/node-1/var/crash/core.123
//! agent:     /host/home/docker/container-storage/node-1/var/crash/core.123
//! ```

use crate::config::PathsConfig;
use crate::container::ContainerName;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};

/// Prefix of per-container cleanup staging directories
pub const CLEANUP_DIR_PREFIX: &str = "cleanup_";

/// Default directory under the storage root holding reported core dumps
pub const PROCESSED_COREDUMPS_DIR_NAME: &str = "processed-coredumps";

/// UTC timestamp format used in cleanup staging directory names
const CLEANUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// A path that cannot be translated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("The specified path was not absolute: {0}")]
    NotAbsolute(PathBuf),

    #[error("Path {path} is outside the storage of container {container}")]
    OutsideStorage {
        container: ContainerName,
        path: PathBuf,
    },
}

/// The filesystem namespace a path is meaningful in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathNamespace {
    Host,
    Agent,
    Workload,
}

/// An absolute path tagged with the namespace it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathView {
    namespace: PathNamespace,
    path: PathBuf,
}

impl PathView {
    /// # Errors
    ///
    /// Returns [`PathError::NotAbsolute`] for relative paths.
    pub fn new(namespace: PathNamespace, path: impl Into<PathBuf>) -> Result<Self, PathError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(PathError::NotAbsolute(path));
        }
        Ok(Self { namespace, path })
    }

    pub fn namespace(&self) -> PathNamespace {
        self.namespace
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Pure mapping between the three filesystem views. Holds no mutable state.
#[derive(Debug, Clone)]
pub struct PathResolver {
    application_storage: PathBuf,
    host_root_in_agent: PathBuf,
    workload_home: PathBuf,
    processed_coredumps: String,
}

impl PathResolver {
    pub fn new(config: &PathsConfig) -> Self {
        Self {
            application_storage: config.application_storage.clone(),
            host_root_in_agent: config.host_root_in_agent.clone(),
            workload_home: config.workload_home.clone(),
            processed_coredumps: config.processed_coredumps.clone(),
        }
    }

    /// Application storage root as seen from the host
    pub fn application_storage_for_host(&self) -> PathBuf {
        self.application_storage.clone()
    }

    /// Application storage root as seen from the agent container
    pub fn application_storage_for_agent(&self) -> PathBuf {
        self.host_path_in_agent(&self.application_storage)
    }

    /// Translate any absolute host path to the agent container's view of it
    pub fn host_path_in_agent(&self, host_path: &Path) -> PathBuf {
        self.host_root_in_agent.join(relativize(host_path))
    }

    /// Network namespace of a host process, as seen from the agent container
    pub fn network_namespace_of(&self, pid: u32) -> PathBuf {
        self.host_root_in_agent
            .join("proc")
            .join(pid.to_string())
            .join("ns/net")
    }

    /// Storage directory of one container, agent view
    pub fn container_storage_for_agent(&self, container: &ContainerName) -> PathBuf {
        self.application_storage_for_agent().join(container.as_str())
    }

    /// Storage directory of one container, host view
    pub fn container_storage_for_host(&self, container: &ContainerName) -> PathBuf {
        self.application_storage.join(container.as_str())
    }

    /// Translate an absolute path in a workload container to the agent container
    pub fn path_in_agent_from_path_in_node(
        &self,
        container: &ContainerName,
        path_in_node: &Path,
    ) -> Result<PathBuf, PathError> {
        let relative = node_relative(container, path_in_node)?;
        Ok(self.container_storage_for_agent(container).join(relative))
    }

    /// Translate an absolute path in a workload container to the host
    pub fn path_in_host_from_path_in_node(
        &self,
        container: &ContainerName,
        path_in_node: &Path,
    ) -> Result<PathBuf, PathError> {
        let relative = node_relative(container, path_in_node)?;
        Ok(self.container_storage_for_host(container).join(relative))
    }

    /// Inverse of [`path_in_host_from_path_in_node`](Self::path_in_host_from_path_in_node)
    pub fn path_in_node_from_path_in_host(
        &self,
        container: &ContainerName,
        path_in_host: &Path,
    ) -> Result<PathBuf, PathError> {
        strip_storage(
            container,
            &self.container_storage_for_host(container),
            path_in_host,
        )
    }

    /// Inverse of [`path_in_agent_from_path_in_node`](Self::path_in_agent_from_path_in_node)
    pub fn path_in_node_from_path_in_agent(
        &self,
        container: &ContainerName,
        path_in_agent: &Path,
    ) -> Result<PathBuf, PathError> {
        strip_storage(
            container,
            &self.container_storage_for_agent(container),
            path_in_agent,
        )
    }

    /// Translate a workload-container path view into the agent's namespace
    pub fn to_agent_view(
        &self,
        container: &ContainerName,
        view: &PathView,
    ) -> Result<PathView, PathError> {
        let path = match view.namespace() {
            PathNamespace::Agent => view.path().to_path_buf(),
            PathNamespace::Host => self.host_path_in_agent(view.path()),
            PathNamespace::Workload => self.path_in_agent_from_path_in_node(container, view.path())?,
        };
        PathView::new(PathNamespace::Agent, path)
    }

    /// Absolute path inside a workload container under its home directory
    pub fn path_in_node_under_home(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.workload_home.join(relative)
    }

    /// Directory with processed and reported core dumps, agent view
    pub fn processed_coredumps_dir(&self) -> PathBuf {
        self.application_storage_for_agent()
            .join(&self.processed_coredumps)
    }

    /// Cleanup staging directory for a container, agent view
    pub fn node_cleanup_dir(&self, container: &ContainerName, now: DateTime<Utc>) -> PathBuf {
        self.application_storage_for_agent()
            .join(cleanup_dir_name(container, now))
    }
}

/// `cleanup_<container>_<yyyy-MM-ddTHH:mm:ss.SSS>` in UTC
pub fn cleanup_dir_name(container: &ContainerName, now: DateTime<Utc>) -> String {
    format!(
        "{}{}_{}",
        CLEANUP_DIR_PREFIX,
        container,
        now.format(CLEANUP_TIMESTAMP_FORMAT)
    )
}

/// Strip the root of an absolute path, leaving it relative
fn relativize(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

fn node_relative<'a>(container: &ContainerName, path_in_node: &'a Path) -> Result<&'a Path, PathError> {
    if !path_in_node.is_absolute() {
        return Err(PathError::NotAbsolute(path_in_node.to_path_buf()));
    }
    if path_in_node
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(PathError::OutsideStorage {
            container: container.clone(),
            path: path_in_node.to_path_buf(),
        });
    }
    Ok(relativize(path_in_node))
}

fn strip_storage(
    container: &ContainerName,
    storage: &Path,
    path: &Path,
) -> Result<PathBuf, PathError> {
    if !path.is_absolute() {
        return Err(PathError::NotAbsolute(path.to_path_buf()));
    }
    let outside = || PathError::OutsideStorage {
        container: container.clone(),
        path: path.to_path_buf(),
    };
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(outside());
    }
    let relative = path.strip_prefix(storage).map_err(|_| outside())?;
    Ok(Path::new("/").join(relative))
}
