use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::diagnosis::process::{isolate_process_group, terminate};
use crate::error::{AppError, Result};

const SHELL: &str = "/bin/bash";

/// Once the script has exited, how long to wait for its pipes to drain.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Outcome of running one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    /// stdout followed by stderr, each capped at the executor's byte limit.
    pub output: String,
    /// The run was stopped through its cancellation token.
    pub cancelled: bool,
}

impl CommandResult {
    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.exit_code == Some(0)
    }
}

/// Runs a shell command line to completion.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command_line`. When `cancel` fires, the process and its children are
    /// terminated and the result comes back with `cancelled` set.
    async fn execute(&self, command_line: &str, cancel: CancellationToken) -> Result<CommandResult>;
}

/// Executes command lines locally through `/bin/bash -c`.
pub struct ShellExecutor {
    max_output_bytes: usize,
}

impl ShellExecutor {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command_line: &str, cancel: CancellationToken) -> Result<CommandResult> {
        let mut cmd = Command::new(SHELL);
        cmd.arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        isolate_process_group(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::Internal(format!("Failed to spawn {SHELL}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Internal("Missing stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Internal("Missing stderr pipe".to_string()))?;
        let stdout_task = tokio::spawn(read_capped(stdout, self.max_output_bytes));
        let stderr_task = tokio::spawn(read_capped(stderr, self.max_output_bytes));

        let mut cancelled = false;
        let status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = cancel.cancelled() => {
                cancelled = true;
                terminate(&mut child).await
            }
        };

        let mut output = drain(stdout_task).await;
        let err_output = drain(stderr_task).await;
        if !err_output.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&err_output);
        }

        Ok(CommandResult {
            exit_code: status.and_then(|s| s.code()),
            output,
            cancelled,
        })
    }
}

/// Read a stream to EOF, keeping at most `max_bytes`.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, max_bytes: usize) -> std::io::Result<String> {
    let mut buffer = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = max_bytes.saturating_sub(buffer.len());
        buffer.extend_from_slice(&chunk[..room.min(n)]);
        truncated |= room < n;
    }

    let mut text = String::from_utf8_lossy(&buffer).into_owned();
    if truncated {
        text.push_str("\n[output truncated]");
    }
    Ok(text)
}

async fn drain(mut task: JoinHandle<std::io::Result<String>>) -> String {
    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(Ok(text))) => text,
        Ok(Ok(Err(e))) => {
            tracing::debug!(error = %e, "Failed to read script output");
            String::new()
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Output reader task failed");
            String::new()
        }
        Err(_) => {
            // A background process outlived the script and still holds the pipe.
            task.abort();
            String::new()
        }
    }
}
