//! Session multiplexer gateway.
//!
//! [`SessionGateway`] is the narrow interface the rest of the crate uses to
//! affect real sessions: list, start detached, kill, and capture pane text.
//! [`TmuxGateway`] implements it by running the `tmux` binary.
//!
//! The gateway never retries; retry policy belongs to callers. Every failure
//! is appended to the diagnostic log before it is returned, so a user can see
//! after the fact why a start or kill did not happen.

pub mod naming;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::diagnostics::{DiagnosticLog, DiagnosticStream};
use crate::error::{Result, TunnelError};
use crate::shell::locate_binary;
use crate::shell::process::{exec_command, ExecError, ExecResult};

/// Lines of scrollback included by [`SessionGateway::capture_output`].
const CAPTURE_SCROLLBACK_LINES: &str = "-200";

/// Operations on named, detached multiplexer sessions.
#[async_trait]
pub trait SessionGateway: Send + Sync {
    /// Names of all live sessions. No server running means no sessions.
    async fn list_sessions(&self) -> Result<Vec<String>>;
    /// Start a detached session named `name` running the shell `command`.
    async fn start_session(&self, name: &str, command: &str) -> Result<()>;
    /// Kill the session named exactly `name`.
    async fn kill_session(&self, name: &str) -> Result<()>;
    /// Visible pane text (plus some scrollback) of session `name`.
    async fn capture_output(&self, name: &str) -> Result<String>;
}

/// [`SessionGateway`] backed by the tmux CLI.
pub struct TmuxGateway {
    binary: String,
    timeout_ms: u64,
    diagnostics: DiagnosticLog,
}

impl TmuxGateway {
    pub fn new(binary: impl Into<String>, timeout_ms: u64, diagnostics: DiagnosticLog) -> Self {
        Self {
            binary: binary.into(),
            timeout_ms,
            diagnostics,
        }
    }

    /// Run a tmux subcommand. Only spawn-level problems are errors here;
    /// a non-zero exit comes back as an [`ExecResult`].
    async fn run(&self, args: &[&str], stream: DiagnosticStream) -> Result<ExecResult> {
        let Some(path) = locate_binary(&self.binary) else {
            let err = TunnelError::DependencyMissing(self.binary.clone());
            self.diagnostics
                .record(stream, &format!("tmux {}", args.join(" ")), &err.to_string())
                .await;
            return Err(err);
        };
        let program = path.to_string_lossy();
        debug!("tmux {}", args.join(" "));

        match exec_command(&program, args, self.timeout_ms).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.diagnostics
                    .record(stream, &format!("tmux {}", args.join(" ")), &e.to_string())
                    .await;
                Err(match e {
                    ExecError::NotFound(_) => TunnelError::DependencyMissing(self.binary.clone()),
                    other => TunnelError::Mux(other.to_string()),
                })
            }
        }
    }

    async fn record_failure(&self, stream: DiagnosticStream, summary: &str, result: &ExecResult) {
        let detail = format!(
            "exit code {}\nstdout:\n{}\nstderr:\n{}",
            result.exit_code, result.stdout, result.stderr
        );
        self.diagnostics.record(stream, summary, &detail).await;
    }
}

#[async_trait]
impl SessionGateway for TmuxGateway {
    async fn list_sessions(&self) -> Result<Vec<String>> {
        let result = self
            .run(
                &["list-sessions", "-F", "#{session_name}"],
                DiagnosticStream::Mux,
            )
            .await?;
        if result.success() {
            return Ok(parse_session_list(&result.stdout));
        }
        if is_no_server(&result.stderr) {
            return Ok(Vec::new());
        }
        self.record_failure(DiagnosticStream::Mux, "tmux list-sessions failed", &result)
            .await;
        Err(TunnelError::Mux(result.failure_detail()))
    }

    async fn start_session(&self, name: &str, command: &str) -> Result<()> {
        let result = match self
            .run(
                &["new-session", "-d", "-s", name, command],
                DiagnosticStream::SessionStart,
            )
            .await
        {
            Ok(r) => r,
            Err(TunnelError::Mux(detail)) => {
                return Err(TunnelError::SessionStartFailed {
                    name: name.to_string(),
                    detail,
                })
            }
            Err(e) => return Err(e),
        };
        if result.success() {
            debug!("Started tmux session {name}");
            return Ok(());
        }
        self.record_failure(
            DiagnosticStream::SessionStart,
            &format!("tmux new-session -s {name} failed: {command}"),
            &result,
        )
        .await;
        Err(TunnelError::SessionStartFailed {
            name: name.to_string(),
            detail: result.failure_detail(),
        })
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        let target = format!("={name}");
        let result = match self
            .run(&["kill-session", "-t", &target], DiagnosticStream::Mux)
            .await
        {
            Ok(r) => r,
            Err(TunnelError::Mux(detail)) => {
                return Err(TunnelError::KillFailed {
                    name: name.to_string(),
                    detail,
                })
            }
            Err(e) => return Err(e),
        };
        if result.success() {
            debug!("Killed tmux session {name}");
            return Ok(());
        }
        warn!("tmux kill-session {name} failed: {}", result.failure_detail());
        self.record_failure(
            DiagnosticStream::Mux,
            &format!("tmux kill-session -t {name} failed"),
            &result,
        )
        .await;
        Err(TunnelError::KillFailed {
            name: name.to_string(),
            detail: result.failure_detail(),
        })
    }

    async fn capture_output(&self, name: &str) -> Result<String> {
        let target = format!("={name}:");
        let result = self
            .run(
                &[
                    "capture-pane",
                    "-p",
                    "-S",
                    CAPTURE_SCROLLBACK_LINES,
                    "-t",
                    &target,
                ],
                DiagnosticStream::Mux,
            )
            .await?;
        if result.success() {
            return Ok(result.stdout);
        }
        self.record_failure(
            DiagnosticStream::Mux,
            &format!("tmux capture-pane -t {name} failed"),
            &result,
        )
        .await;
        Err(TunnelError::Mux(result.failure_detail()))
    }
}

/// Parse `list-sessions -F '#{session_name}'` output.
fn parse_session_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// tmux exits non-zero with one of these when no server is running.
fn is_no_server(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("no server running")
        || s.contains("no sessions")
        || s.contains("error connecting to")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use std::sync::Arc;

    #[test]
    fn test_parse_session_list() {
        let out = "bastion_22\n\nxray-config%2Ejson\n  db_5432  \n";
        assert_eq!(
            parse_session_list(out),
            vec!["bastion_22", "xray-config%2Ejson", "db_5432"]
        );
        assert!(parse_session_list("").is_empty());
    }

    #[test]
    fn test_no_server_detection() {
        assert!(is_no_server("no server running on /tmp/tmux-501/default\n"));
        assert!(is_no_server(
            "error connecting to /tmp/tmux-0/default (No such file or directory)"
        ));
        assert!(is_no_server("no sessions"));
        assert!(!is_no_server("can't find session: foo"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_dependency_missing() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = DiagnosticLog::new(dir.path(), Arc::new(ManualClock::new(1)));
        let gateway = TmuxGateway::new("definitely-not-tmux-xyz", 1000, diagnostics);

        let err = gateway.list_sessions().await.unwrap_err();
        assert!(matches!(err, TunnelError::DependencyMissing(_)));

        let err = gateway.start_session("a_1", "true").await.unwrap_err();
        assert!(matches!(err, TunnelError::DependencyMissing(_)));

        let log = std::fs::read_to_string(dir.path().join("session-start.log")).unwrap();
        assert!(log.contains("new-session"));
    }
}
