//! Low-level process execution and output capture.
//!
//! Every external command this crate runs (tmux, lsof, networksetup) goes
//! through [`exec_command`]. The child is started with `kill_on_drop(true)`
//! so it is reaped if the caller's future is dropped.

use std::fmt::Write;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Max output size per stream for [`exec_command`] (1 MB).
///
/// Output beyond this limit is still drained from the pipe (to prevent
/// deadlocks) but discarded. A truncation notice is appended to the returned
/// string.
const MAX_EXEC_OUTPUT: usize = 1024 * 1024;

/// Execute `program` with `args` and capture its output.
///
/// No shell is involved; arguments are passed verbatim. Stdout and stderr are
/// read concurrently (to avoid pipe deadlock) and each capped at
/// [`MAX_EXEC_OUTPUT`] bytes. The whole operation is wrapped in a
/// `tokio::time::timeout`.
pub async fn exec_command(
    program: &str,
    args: &[&str],
    timeout_ms: u64,
) -> Result<ExecResult, ExecError> {
    let start = std::time::Instant::now();

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExecError::NotFound(program.to_string())
            } else {
                ExecError::SpawnFailed(e.to_string())
            }
        })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::ProcessFailed("Failed to take stdout pipe".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExecError::ProcessFailed("Failed to take stderr pipe".to_string()))?;

    let timeout = tokio::time::Duration::from_millis(timeout_ms);
    match Box::pin(tokio::time::timeout(timeout, async {
        // Read stdout and stderr concurrently to avoid pipe deadlock
        let (stdout_data, stderr_data) = tokio::join!(
            read_capped(&mut stdout, MAX_EXEC_OUTPUT),
            read_capped(&mut stderr, MAX_EXEC_OUTPUT),
        );
        drop(stdout);
        drop(stderr);

        let status = child
            .wait()
            .await
            .map_err(|e| ExecError::ProcessFailed(e.to_string()))?;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok::<_, ExecError>(ExecResult {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout_data,
            stderr: stderr_data,
            duration_ms,
        })
    }))
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ExecError::Timeout(timeout_ms)),
    }
}

/// Read from an async reader, keeping the first `max_bytes` and discarding the
/// rest.
///
/// Keeps reading past the cap instead of closing the pipe early: closing a
/// pipe while the child is still writing causes SIGPIPE in the child.
async fn read_capped(reader: &mut (impl tokio::io::AsyncRead + Unpin), max_bytes: usize) -> String {
    let mut buf = Vec::with_capacity(max_bytes.min(65536));
    let mut tmp = [0u8; 8192];
    let mut total_read = 0usize;
    loop {
        match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                total_read += n;
                if buf.len() < max_bytes {
                    let take = n.min(max_bytes - buf.len());
                    buf.extend_from_slice(&tmp[..take]);
                }
            }
        }
    }
    let mut s = String::from_utf8_lossy(&buf).into_owned();
    if total_read > max_bytes {
        let _ = write!(
            s,
            "\n[truncated: {total_read} bytes total, showing first {max_bytes}]"
        );
    }
    s
}

/// Result of a command that ran to completion (any exit code).
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Process exit code, or `-1` if the code was unavailable (e.g. killed by signal).
    pub exit_code: i32,
    /// Captured stdout (capped, lossy UTF-8 conversion).
    pub stdout: String,
    /// Captured stderr (capped, lossy UTF-8 conversion).
    pub stderr: String,
    /// Wall-clock duration of the command in milliseconds.
    pub duration_ms: u64,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stderr, falling back to stdout when stderr is empty.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            let stdout = self.stdout.trim();
            if stdout.is_empty() {
                format!("exit code {}", self.exit_code)
            } else {
                stdout.to_string()
            }
        } else {
            stderr.to_string()
        }
    }
}

/// Errors that can occur during [`exec_command`].
#[derive(Debug, Error)]
pub enum ExecError {
    /// The program does not exist.
    #[error("program not found: {0}")]
    NotFound(String),
    /// The program could not be started (e.g. permission denied).
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),
    /// The child process started but `wait()` failed.
    #[error("process error: {0}")]
    ProcessFailed(String),
    /// The command exceeded its timeout and was killed.
    #[error("command timed out after {0} ms")]
    Timeout(u64),
}
