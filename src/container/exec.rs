//! Root command execution through the engine's exec API.

use crate::container::{ContainerError, ContainerName, ProcessResult, Result};
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use futures::stream::StreamExt;
use tracing::debug;

/// Exit code reported when the engine cannot tell how the command ended
const UNKNOWN_EXIT_CODE: i32 = -1;

/// Exec options for running `command` as privileged root with output attached
fn root_exec_options(command: &[String]) -> CreateExecOptions<String> {
    CreateExecOptions {
        cmd: Some(command.to_vec()),
        user: Some("root".to_string()),
        privileged: Some(true),
        attach_stdin: Some(false),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        ..Default::default()
    }
}

/// Run `command` in a running container as root and wait for it to finish.
///
/// A non-zero exit code is part of the returned [`ProcessResult`].
///
/// # Errors
///
/// Returns error if the exec cannot be created or its output stream breaks.
pub async fn run_as_root(
    docker: &Docker,
    container: &ContainerName,
    command: &[String],
) -> Result<ProcessResult> {
    debug!("Creating root exec in {}: {:?}", container, command);

    let exec = docker
        .create_exec(container.as_str(), root_exec_options(command))
        .await?;

    let mut stdout = String::new();
    let mut stderr = String::new();

    match docker.start_exec(&exec.id, None).await? {
        StartExecResults::Attached { mut output, .. } => {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(ContainerError::ExecutionError(format!(
                            "Lost output of exec in {}: {}",
                            container, e
                        )));
                    }
                }
            }
        }
        StartExecResults::Detached => {
            return Err(ContainerError::ExecutionError(format!(
                "Exec in {} started detached",
                container
            )));
        }
    }

    let exit_code = docker
        .inspect_exec(&exec.id)
        .await?
        .exit_code
        .and_then(|code| i32::try_from(code).ok())
        .unwrap_or(UNKNOWN_EXIT_CODE);
    debug!("Exec in {} finished with exit code {}", container, exit_code);

    Ok(ProcessResult::new(exit_code, stdout, stderr))
}
