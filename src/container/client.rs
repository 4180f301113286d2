//! Docker/Podman engine backed by the bollard API.
//!
//! Connects with automatic fallback from the local Docker defaults to the
//! rootless and system Podman sockets, and implements [`ContainerEngine`].

use crate::container::exec;
use crate::container::{
    ContainerEngine, ContainerError, ContainerHandle, ContainerName, ProcessResult, Result,
};
use async_trait::async_trait;
use bollard::Docker;
use std::sync::Arc;
use tracing::{debug, info};

/// Engine connection configuration.
#[derive(Debug, Clone)]
pub struct DockerEngineConfig {
    /// Connection timeout in seconds
    pub timeout: u64,
}

impl Default for DockerEngineConfig {
    fn default() -> Self {
        Self { timeout: 120 }
    }
}

/// Docker/Podman API client.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Arc<Docker>,
}

impl DockerEngine {
    /// Connect with default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if neither Docker nor Podman are available or connection fails.
    pub async fn new() -> Result<Self> {
        Self::with_config(DockerEngineConfig::default()).await
    }

    /// Connect with custom configuration and verify the connection.
    ///
    /// # Errors
    ///
    /// Returns error if connection to container runtime fails.
    pub async fn with_config(config: DockerEngineConfig) -> Result<Self> {
        let docker = Self::connect(config.timeout)?;
        let engine = Self {
            docker: Arc::new(docker),
        };
        engine.ping().await?;
        Ok(engine)
    }

    /// Tries, in order: local defaults (socket or `DOCKER_HOST`), rootless
    /// Podman socket, system Podman socket.
    fn connect(timeout: u64) -> Result<Docker> {
        debug!("Attempting to connect to container runtime...");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Connected to container runtime via local defaults");
                return Ok(docker);
            }
            Err(e) => {
                debug!("Local defaults failed: {}", e);
            }
        }

        #[cfg(unix)]
        {
            let mut sockets = Vec::new();
            if let Ok(home) = std::env::var("HOME") {
                sockets.push(format!("unix://{}/run/podman/podman.sock", home));
            }
            sockets.push("unix:///run/podman/podman.sock".to_string());

            for socket in sockets {
                debug!("Trying Podman socket: {}", socket);
                match Docker::connect_with_socket(&socket, timeout, bollard::API_DEFAULT_VERSION) {
                    Ok(docker) => {
                        info!("Connected to Podman via {}", socket);
                        return Ok(docker);
                    }
                    Err(e) => {
                        debug!("Podman socket {} failed: {}", socket, e);
                    }
                }
            }
        }

        Err(ContainerError::Other(
            "Failed to connect to Docker or Podman. Please ensure Docker or Podman is installed and running.".to_string()
        ))
    }

    /// Ping the container runtime to verify connectivity.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| {
            ContainerError::Other(format!("Failed to ping container runtime: {}", e))
        })?;
        debug!("Container runtime ping successful");
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn execute_in_container_as_root(
        &self,
        container: &ContainerName,
        command: &[String],
    ) -> Result<ProcessResult> {
        exec::run_as_root(&self.docker, container, command).await
    }

    async fn get_container(&self, container: &ContainerName) -> Result<Option<ContainerHandle>> {
        let inspect = match self
            .docker
            .inspect_container(
                container.as_str(),
                None::<bollard::query_parameters::InspectContainerOptions>,
            )
            .await
        {
            Ok(inspect) => inspect,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(None),
            Err(e) => return Err(ContainerError::ApiError(e)),
        };

        let state = inspect.state.ok_or_else(|| {
            ContainerError::Other(format!("Container {} has no state", container))
        })?;

        let pid = state
            .pid
            .filter(|pid| *pid > 0)
            .and_then(|pid| u32::try_from(pid).ok());

        match (state.running.unwrap_or(false), pid) {
            (true, Some(pid)) => Ok(Some(ContainerHandle::running(container.clone(), pid))),
            _ => Ok(Some(ContainerHandle::stopped(container.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Docker/Podman to be running
    async fn test_engine_connection() {
        let engine = DockerEngine::new().await.unwrap();
        engine.ping().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_unknown_container_is_absent() {
        let engine = DockerEngine::new().await.unwrap();
        let name = ContainerName::new("node-admin-no-such-container").unwrap();
        assert!(engine.get_container(&name).await.unwrap().is_none());
    }
}
