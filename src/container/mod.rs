//! Workload container access.
//!
//! This module executes commands inside workload containers, either through the
//! container engine's exec primitive or by entering a container's network
//! namespace from the host, and stages files (such as `/etc/hosts`) that the
//! runtime applies when a container is created.
//!
//! ## Architecture
//!
//! - [`ContainerEngine`]: the engine collaborator contract (exec as root, inspect)
//! - [`client`]: `bollard`-backed engine implementation (`containers` feature)
//! - [`runtime`]: [`ContainerRuntimeClient`], the operations the agent performs on containers
//! - [`staging`]: [`ContainerData`], per-container file staging area
//!
//! ## Usage
//!
//! ```rust,no_run
//! use node_admin::config::NodeAdminConfig;
//! use node_admin::container::{ContainerName, ContainerRuntimeClient, DockerEngine};
//! use node_admin::executor::HostExecutor;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(NodeAdminConfig::default());
//!     let engine = Arc::new(DockerEngine::new().await?);
//!     let runtime = ContainerRuntimeClient::new(engine, Arc::new(HostExecutor::new()), config);
//!
//!     let name = ContainerName::from_hostname("node-123.region.example.com")?;
//!     let result = runtime.execute_in_network_namespace(&name, &["ip", "addr"]).await?;
//!     println!("{}", result.stdout);
//!     Ok(())
//! }
//! ```

#[cfg(feature = "containers")]
mod client;
#[cfg(feature = "containers")]
mod exec;
mod runtime;
mod staging;

#[cfg(feature = "containers")]
pub use client::{DockerEngine, DockerEngineConfig};
pub use runtime::{ContainerRuntimeClient, ETC_HOSTS_PATH, etc_hosts_content};
pub use staging::ContainerData;

use crate::executor::ExecutorError;
use crate::paths::PathError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

static CONTAINER_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("static pattern is valid"));

/// Name of a workload container, one per host FQDN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerName(String);

impl ContainerName {
    /// Create a container name, validating its characters.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::InvalidName`] unless the name is non-empty and
    /// consists of ASCII letters, digits and dashes.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if CONTAINER_NAME_PATTERN.is_match(&name) {
            Ok(Self(name))
        } else {
            Err(ContainerError::InvalidName(name))
        }
    }

    /// Derive the container name from a fully qualified hostname: its first label.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::InvalidName`] if the first label is not a valid name.
    pub fn from_hostname(hostname: &str) -> Result<Self> {
        let label = hostname.split('.').next().unwrap_or_default();
        Self::new(label)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContainerName {
    type Error = ContainerError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ContainerName> for String {
    fn from(value: ContainerName) -> Self {
        value.0
    }
}

/// Container state as observed from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    /// The engine has no container with this name
    Absent,
}

/// Snapshot of a container taken from the engine.
///
/// Valid only for the operation that fetched it: the container may change
/// state right after the lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: ContainerName,
    pub state: ContainerState,
    /// Process id of the container's init process, present only while running
    pub pid: Option<u32>,
}

impl ContainerHandle {
    pub fn running(name: ContainerName, pid: u32) -> Self {
        Self {
            name,
            state: ContainerState::Running,
            pid: Some(pid),
        }
    }

    pub fn stopped(name: ContainerName) -> Self {
        Self {
            name,
            state: ContainerState::Stopped,
            pid: None,
        }
    }

    pub fn absent(name: ContainerName) -> Self {
        Self {
            name,
            state: ContainerState::Absent,
            pid: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }
}

/// Outcome of a command run in or against a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr).
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Container engine the agent talks to.
///
/// Implementations only need to honour this contract; transport details stay
/// behind it.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Run `command` inside the container as root and collect its output.
    ///
    /// A non-zero exit code is returned as a normal [`ProcessResult`].
    async fn execute_in_container_as_root(
        &self,
        container: &ContainerName,
        command: &[String],
    ) -> Result<ProcessResult>;

    /// Look up the container. `None` when the engine does not know it.
    async fn get_container(&self, container: &ContainerName) -> Result<Option<ContainerHandle>>;
}

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Container name does not satisfy the naming rules
    #[error("Invalid container name: {0:?}")]
    InvalidName(String),

    /// Container has no running process at call time
    #[error("Container {0} is not running")]
    NotRunning(ContainerName),

    /// In-container command exited with a non-zero code
    #[error("Command {command:?} in {container} exited with {exit_code}: {stderr}")]
    CommandFailed {
        container: ContainerName,
        command: Vec<String>,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// Bounded wait exceeded
    #[error("Command in {container} timed out after {timeout:?}")]
    Timeout {
        container: ContainerName,
        timeout: Duration,
    },

    /// Path handed to the container layer could not be translated
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// Host process execution failed
    #[error("Host execution error: {0}")]
    Executor(#[from] ExecutorError),

    /// Docker/Podman API error
    #[cfg(feature = "containers")]
    #[error("Container API error: {0}")]
    ApiError(#[from] bollard::errors::Error),

    /// Container execution error
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// General error
    #[error("Container error: {0}")]
    Other(String),
}

impl ContainerError {
    /// Whether the caller may retry the operation without changing its input.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidName(_) | Self::InvalidPath(_) => false,
            Self::Executor(e) => e.is_retryable(),
            _ => true,
        }
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_from_hostname() {
        let name = ContainerName::from_hostname("node-123.us-north-3.test.example.com").unwrap();
        assert_eq!(name.as_str(), "node-123");
        assert_eq!(name.to_string(), "node-123");

        let bare = ContainerName::from_hostname("c1").unwrap();
        assert_eq!(bare.as_str(), "c1");
    }

    #[test]
    fn test_container_name_is_deterministic() {
        let a = ContainerName::from_hostname("node-9.zone.example.com").unwrap();
        let b = ContainerName::from_hostname("node-9.zone.example.com").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_container_names() {
        assert!(matches!(
            ContainerName::from_hostname(".example.com"),
            Err(ContainerError::InvalidName(_))
        ));
        assert!(ContainerName::new("has/slash").is_err());
        assert!(ContainerName::new("under_score").is_err());
        assert!(ContainerName::new("").is_err());
    }

    #[test]
    fn test_container_name_serde() {
        let name: ContainerName = serde_json::from_str("\"node-1\"").unwrap();
        assert_eq!(name.as_str(), "node-1");
        assert!(serde_json::from_str::<ContainerName>("\"../etc\"").is_err());
    }

    #[test]
    fn test_handles() {
        let name = ContainerName::new("c1").unwrap();
        assert!(ContainerHandle::running(name.clone(), 42).is_running());
        assert_eq!(ContainerHandle::stopped(name.clone()).pid, None);
        assert_eq!(ContainerHandle::absent(name).state, ContainerState::Absent);
    }

    #[test]
    fn test_process_result() {
        let ok = ProcessResult::new(0, "out\n", "");
        assert!(ok.success());
        assert_eq!(ok.combined(), "out\n");

        let failed = ProcessResult::new(3, "output", "errors");
        assert!(!failed.success());
        assert_eq!(failed.combined(), "outputerrors");
    }

    #[test]
    fn test_retryability() {
        let name = ContainerName::new("c1").unwrap();
        assert!(ContainerError::NotRunning(name.clone()).is_retryable());
        assert!(
            ContainerError::Timeout {
                container: name,
                timeout: Duration::from_secs(1)
            }
            .is_retryable()
        );
        assert!(
            !ContainerError::InvalidPath(PathError::NotAbsolute("relative".into())).is_retryable()
        );
    }
}
