//! Operations the agent performs on workload containers.

use crate::config::NodeAdminConfig;
use crate::container::{
    ContainerData, ContainerEngine, ContainerError, ContainerHandle, ContainerName, ProcessResult,
    Result,
};
use crate::executor::{ExecutionCommand, ExecutorError, ProcessExecutor};
use crate::paths::PathResolver;
use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the generated hosts file lives inside the container
pub const ETC_HOSTS_PATH: &str = "/etc/hosts";

const STANDARD_HOSTS: [(&str, &str); 6] = [
    ("127.0.0.1", "localhost"),
    ("::1", "localhost ip6-localhost ip6-loopback"),
    ("fe00::0", "ip6-localnet"),
    ("ff00::0", "ip6-mcastprefix"),
    ("ff02::1", "ip6-allnodes"),
    ("ff02::2", "ip6-allrouters"),
];

/// Runs commands in workload containers and stages their files.
///
/// All calls block the calling task for the duration of the external process,
/// bounded by the configured command timeout.
#[derive(Clone)]
pub struct ContainerRuntimeClient {
    engine: Arc<dyn ContainerEngine>,
    executor: Arc<dyn ProcessExecutor>,
    resolver: PathResolver,
    command_timeout: Duration,
}

impl ContainerRuntimeClient {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        executor: Arc<dyn ProcessExecutor>,
        config: Arc<NodeAdminConfig>,
    ) -> Self {
        Self {
            engine,
            executor,
            resolver: PathResolver::new(&config.paths),
            command_timeout: config.command_timeout,
        }
    }

    pub fn path_resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Fresh snapshot of the container from the engine
    pub async fn get_container(&self, container: &ContainerName) -> Result<ContainerHandle> {
        Ok(self
            .engine
            .get_container(container)
            .await?
            .unwrap_or_else(|| ContainerHandle::absent(container.clone())))
    }

    /// Execute `command` inside the container as root.
    ///
    /// # Errors
    ///
    /// - [`ContainerError::CommandFailed`] if the command exits non-zero
    /// - [`ContainerError::Timeout`] if it runs past the command timeout
    pub async fn execute_in_container<S: AsRef<str>>(
        &self,
        container: &ContainerName,
        command: &[S],
    ) -> Result<ProcessResult> {
        let command = to_argv(command);
        debug!("Executing in container {}: {:?}", container, command);

        let result = tokio::time::timeout(
            self.command_timeout,
            self.engine.execute_in_container_as_root(container, &command),
        )
        .await
        .map_err(|_| ContainerError::Timeout {
            container: container.clone(),
            timeout: self.command_timeout,
        })??;

        check_exit(container, command, result)
    }

    /// Execute `command` on the host inside the container's network namespace.
    ///
    /// # Errors
    ///
    /// - [`ContainerError::NotRunning`] if the container has no process at lookup time
    /// - [`ContainerError::CommandFailed`] if the command exits non-zero
    /// - [`ContainerError::Timeout`] if it runs past the command timeout
    pub async fn execute_in_network_namespace<S: AsRef<str>>(
        &self,
        container: &ContainerName,
        command: &[S],
    ) -> Result<ProcessResult> {
        let handle = self.get_container(container).await?;
        let pid = match (handle.is_running(), handle.pid) {
            (true, Some(pid)) => pid,
            _ => {
                warn!(
                    "Cannot enter network namespace of {}: state {:?}",
                    container, handle.state
                );
                return Err(ContainerError::NotRunning(container.clone()));
            }
        };

        let mut argv = vec![
            "sudo".to_string(),
            "nsenter".to_string(),
            format!("--net={}", self.resolver.network_namespace_of(pid).display()),
            "--".to_string(),
        ];
        argv.extend(to_argv(command));
        debug!("Executing in network namespace of {} (pid {}): {:?}", container, pid, argv);

        let exec = ExecutionCommand::from_argv(&argv)?.with_timeout(self.command_timeout);
        let output = self
            .executor
            .execute(exec)
            .await
            .map_err(|e| match e {
                ExecutorError::Timeout(timeout) => ContainerError::Timeout {
                    container: container.clone(),
                    timeout,
                },
                e => ContainerError::Executor(e),
            })?;

        let result = ProcessResult::new(output.exit_code, output.stdout, output.stderr);
        check_exit(container, argv, result)
    }

    /// Staging area of a container's files
    pub fn container_data(&self, container: &ContainerName) -> ContainerData {
        ContainerData::new(container.clone(), self.resolver.clone())
    }

    /// Generate the container's hosts file and stage it at [`ETC_HOSTS_PATH`].
    ///
    /// Returns the generated content.
    pub async fn generate_etc_hosts(
        &self,
        container_data: &ContainerData,
        hostname: &str,
        ipv4: Option<Ipv4Addr>,
        ipv6: Ipv6Addr,
    ) -> Result<String> {
        let content = etc_hosts_content(hostname, ipv4, ipv6);
        container_data
            .add_file(Path::new(ETC_HOSTS_PATH), &content)
            .await?;
        info!(
            "Generated {} for {} ({})",
            ETC_HOSTS_PATH,
            container_data.container(),
            hostname
        );
        Ok(content)
    }
}

/// Hosts file content: standard loopback aliases, then the IPv6 address and,
/// if given, the IPv4 address of `hostname`. One entry per line.
pub fn etc_hosts_content(hostname: &str, ipv4: Option<Ipv4Addr>, ipv6: Ipv6Addr) -> String {
    let mut content = String::new();
    for (address, names) in STANDARD_HOSTS {
        let _ = writeln!(content, "{}\t{}", address, names);
    }
    let _ = writeln!(content, "{}\t{}", ipv6, hostname);
    if let Some(ipv4) = ipv4 {
        let _ = writeln!(content, "{}\t{}", ipv4, hostname);
    }
    content
}

fn to_argv<S: AsRef<str>>(command: &[S]) -> Vec<String> {
    command.iter().map(|s| s.as_ref().to_string()).collect()
}

fn check_exit(
    container: &ContainerName,
    command: Vec<String>,
    result: ProcessResult,
) -> Result<ProcessResult> {
    if result.success() {
        return Ok(result);
    }
    Err(ContainerError::CommandFailed {
        container: container.clone(),
        command,
        exit_code: result.exit_code,
        stdout: result.stdout,
        stderr: result.stderr,
    })
}
