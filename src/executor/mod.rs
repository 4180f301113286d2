//! # Host Process Execution
//!
//! Runs commands directly on the host (or in the agent container's view of it)
//! with a bounded wait. The container layer uses this to enter a workload's
//! network namespace; maintenance jobs reach it only through that layer.
//!
//! ## Core Components
//!
//! - **[`ProcessExecutor`]**: the host process executor contract
//! - **[`HostExecutor`]**: `tokio::process` implementation with timeout and kill-on-timeout
//! - **[`ExecutionCommand`]**: argv and timeout
//! - **[`ExecutionResult`]**: exit code, stdout, stderr and duration
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use node_admin::executor::{ExecutionCommand, HostExecutor, ProcessExecutor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = HostExecutor::new();
//!
//!     let command = ExecutionCommand::from_argv(&["sleep", "10"])?
//!         .with_timeout(Duration::from_secs(2));
//!
//!     match executor.execute(command).await {
//!         Ok(result) => println!("Completed: {}", result.stdout),
//!         Err(e) => eprintln!("Timed out: {}", e),
//!     }
//!
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host-based command execution.
///
/// Implements [`HostExecutor`] for direct process execution using
/// `tokio::process::Command`.
pub mod host;

pub use host::HostExecutor;

/// Result of command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Exit code (0 = success, non-zero = failure, -1 = killed by signal)
    pub exit_code: i32,
    /// Duration of command execution
    pub duration: Duration,
}

impl ExecutionResult {
    /// Check if the command executed successfully (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr)
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Command to execute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCommand {
    /// Program name or path to execute
    pub program: String,
    /// Command line arguments
    pub args: Vec<String>,
    /// Maximum execution time (None = no timeout)
    pub timeout: Option<Duration>,
}

impl ExecutionCommand {
    /// Create a new command with just program and args
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    /// Create a command from a full argv, first element being the program
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::EmptyCommand`] if `argv` is empty.
    pub fn from_argv<S: AsRef<str>>(argv: &[S]) -> Result<Self, ExecutorError> {
        let (program, args) = argv.split_first().ok_or(ExecutorError::EmptyCommand)?;
        Ok(Self::new(
            program.as_ref(),
            args.iter().map(|a| a.as_ref().to_string()).collect(),
        ))
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Set execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Errors during command execution
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// No program given
    #[error("Empty command")]
    EmptyCommand,

    /// Command execution timed out
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ExecutorError {
    /// Whether running the same command again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EmptyCommand => false,
            Self::IoError(e) => e.kind() != std::io::ErrorKind::NotFound,
            Self::Timeout(_) => true,
        }
    }
}

/// Host process executor.
///
/// A non-zero exit status is reported through [`ExecutionResult::exit_code`],
/// not as an error; errors are reserved for failing to run or wait for the process.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Execute a command and return the result
    async fn execute(&self, command: ExecutionCommand) -> Result<ExecutionResult, ExecutorError>;

    /// Get executor type name for logging
    fn executor_type(&self) -> &'static str;
}
