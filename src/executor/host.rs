//! Native host command execution.
//!
//! Executes commands directly on the host system using `tokio::process::Command`.

use super::{ExecutionCommand, ExecutionResult, ExecutorError, ProcessExecutor};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Executes commands directly on the host system
#[derive(Debug, Clone, Default)]
pub struct HostExecutor {
    /// Applied to commands that carry no timeout of their own
    default_timeout: Option<Duration>,
}

impl HostExecutor {
    /// Create a new host executor
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host executor that bounds every command by `timeout` unless
    /// the command sets its own
    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl ProcessExecutor for HostExecutor {
    async fn execute(&self, cmd: ExecutionCommand) -> Result<ExecutionResult, ExecutorError> {
        debug!("Executing command on host: {} {:?}", cmd.program, cmd.args);

        let start = Instant::now();

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // Dropping the output future on timeout kills the child
        let output = match cmd.timeout.or(self.default_timeout) {
            Some(timeout) => match tokio::time::timeout(timeout, command.output()).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("Command {} timed out after {:?}", cmd.program, timeout);
                    return Err(ExecutorError::Timeout(timeout));
                }
            },
            None => command.output().await?,
        };

        let duration = start.elapsed();

        Ok(ExecutionResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration,
        })
    }

    fn executor_type(&self) -> &'static str {
        "host"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_executor_simple_command() {
        let executor = HostExecutor::new();

        let cmd = ExecutionCommand::new("echo", vec!["hello".to_string()]);

        let result = executor.execute(cmd).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_host_executor_non_zero_exit_is_not_an_error() {
        let executor = HostExecutor::new();

        let cmd = ExecutionCommand::from_argv(&["sh", "-c", "echo oops >&2; exit 3"]).unwrap();

        let result = executor.execute(cmd).await.unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(result.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_host_executor_timeout() {
        let executor = HostExecutor::new();

        let cmd = ExecutionCommand::new("sleep", vec!["2".to_string()])
            .with_timeout(Duration::from_millis(100));

        let result = executor.execute(cmd).await;
        assert!(matches!(result, Err(ExecutorError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_host_executor_default_timeout() {
        let executor = HostExecutor::with_default_timeout(Duration::from_millis(100));

        let cmd = ExecutionCommand::new("sleep", vec!["2".to_string()]);

        let result = executor.execute(cmd).await;
        assert!(matches!(result, Err(ExecutorError::Timeout(d)) if d == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_host_executor_missing_program() {
        let executor = HostExecutor::new();

        let cmd = ExecutionCommand::new("definitely-not-a-real-program-xyz", vec![]);

        let result = executor.execute(cmd).await;
        assert!(matches!(result, Err(ExecutorError::IoError(_))));
    }

    #[test]
    fn test_host_executor_type() {
        assert_eq!(HostExecutor::new().executor_type(), "host");
    }
}
