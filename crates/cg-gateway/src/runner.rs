//! Process execution behind the gateway.
//!
//! The gateway runs requests through the [`CommandRunner`] trait. The
//! production implementation is [`ProcessRunner`], which spawns the
//! executable directly (no shell), drains both output pipes with a byte cap,
//! and kills the child when the timeout elapses.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::error::GatewayError;
use crate::request::{CommandRequest, CommandResult};

/// Size of the read buffer used while draining output pipes.
const READ_CHUNK: usize = 8 * 1024;

/// Per-call execution limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Time after which the process is killed.
    pub timeout: Duration,
    /// Bytes kept per output stream; the rest is read and discarded.
    pub max_output_bytes: usize,
}

/// Executes a request and reports its process-level outcome.
///
/// Implementations must return `Ok` for any process that exits with a code,
/// including non-zero codes, and reserve `Err` for spawn failures, timeouts,
/// and kills.
pub trait CommandRunner: Send + Sync + 'static {
    /// Runs `request` within `limits`.
    fn run<'a>(
        &'a self,
        request: &'a CommandRequest,
        limits: RunLimits,
    ) -> BoxFuture<'a, Result<CommandResult, GatewayError>>;
}

/// Runs requests as OS processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run<'a>(
        &'a self,
        request: &'a CommandRequest,
        limits: RunLimits,
    ) -> BoxFuture<'a, Result<CommandResult, GatewayError>> {
        Box::pin(run_process(request, limits))
    }
}

async fn run_process(
    request: &CommandRequest,
    limits: RunLimits,
) -> Result<CommandResult, GatewayError> {
    let command = &request.command;
    let started = Instant::now();

    let mut child = Command::new(command)
        .args(&request.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| GatewayError::Spawn {
            command: command.clone(),
            source,
        })?;

    tracing::trace!(id = %request.id, pid = ?child.id(), "Process spawned");

    let mut stdout_task = tokio::spawn(drain_capped(child.stdout.take(), limits.max_output_bytes));
    let mut stderr_task = tokio::spawn(drain_capped(child.stderr.take(), limits.max_output_bytes));

    // A background grandchild can hold the pipes open after the direct child
    // exits, so the deadline covers the drains as well as the wait.
    let finished = tokio::time::timeout(limits.timeout, async {
        let status = child.wait().await.map_err(|source| GatewayError::Io {
            command: command.clone(),
            source,
        })?;
        let stdout = collect_output(&mut stdout_task, command).await?;
        let stderr = collect_output(&mut stderr_task, command).await?;
        Ok::<_, GatewayError>((status, stdout, stderr))
    })
    .await;

    let (status, stdout, stderr) = match finished {
        Ok(Ok(done)) => done,
        Ok(Err(error)) => {
            stdout_task.abort();
            stderr_task.abort();
            return Err(error);
        }
        Err(_elapsed) => {
            // The direct child may already be reaped while a grandchild holds the pipes.
            if matches!(child.try_wait(), Ok(None)) {
                if let Err(error) = child.kill().await {
                    tracing::warn!(id = %request.id, error = %error, "Failed to kill timed-out process");
                }
            }
            stdout_task.abort();
            stderr_task.abort();
            return Err(GatewayError::Timeout {
                command: command.clone(),
                after: limits.timeout,
            });
        }
    };

    let Some(exit_code) = status.code() else {
        return Err(GatewayError::Killed {
            command: command.clone(),
            signal: terminating_signal(status),
        });
    };

    Ok(CommandResult {
        exit_code,
        stdout,
        stderr,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        timed_out: false,
    })
}

/// Reads `reader` to EOF, keeping at most `cap` bytes.
///
/// Reading continues past the cap so the child never blocks on a full pipe.
async fn drain_capped<R>(reader: Option<R>, cap: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };

    let mut kept = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(kept);
        }
        let room = cap.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
}

async fn collect_output(
    task: &mut JoinHandle<std::io::Result<Vec<u8>>>,
    command: &str,
) -> Result<String, GatewayError> {
    let bytes = task
        .await
        .map_err(std::io::Error::other)
        .and_then(|read| read)
        .map_err(|source| GatewayError::Io {
            command: command.to_owned(),
            source,
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(unix)]
fn terminating_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: ExitStatus) -> Option<i32> {
    None
}
