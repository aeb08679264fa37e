//! Append-only diagnostic logs for postmortem inspection.
//!
//! Each failure category gets its own text file under `<data_dir>/logs/`.
//! A record is a header line (`[<epoch ms>] <summary>`) followed by the
//! free-form detail (captured stderr, pane output) and a blank line.
//!
//! Writing is best effort: errors are reported through `tracing` and never
//! propagated, so a read-only or full disk cannot turn a tunnel failure into
//! a different failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::util::Clock;

/// One log file per failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticStream {
    /// tmux could not start a session.
    SessionStart,
    /// A started proxy never opened its port; holds captured pane output.
    Probe,
    /// Other tmux command failures (list, kill, capture).
    Mux,
}

impl DiagnosticStream {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::SessionStart => "session-start.log",
            Self::Probe => "probe.log",
            Self::Mux => "mux.log",
        }
    }
}

/// Handle to the diagnostic log directory. Cheap to clone.
#[derive(Clone)]
pub struct DiagnosticLog {
    /// `None` disables writing (used by tests that don't care).
    dir: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl DiagnosticLog {
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: Some(dir.into()),
            clock,
        }
    }

    /// A log that drops every record.
    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self { dir: None, clock }
    }

    /// Full path of a stream's file, if logging is enabled.
    pub fn path(&self, stream: DiagnosticStream) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(stream.file_name()))
    }

    /// Append one record. Never fails.
    pub async fn record(&self, stream: DiagnosticStream, summary: &str, detail: &str) {
        let Some(path) = self.path(stream) else {
            return;
        };
        let mut text = format!("[{}] {}\n", self.clock.now_ms(), summary.trim());
        let detail = detail.trim_end();
        if !detail.is_empty() {
            text.push_str(detail);
            text.push('\n');
        }
        text.push('\n');

        if let Err(e) = append(&path, text.as_bytes()).await {
            warn!("Failed to write diagnostic log {}: {e}", path.display());
        } else {
            debug!("Diagnostic record appended to {}", path.display());
        }
    }
}

async fn append(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;

    #[tokio::test]
    async fn test_records_are_appended_per_stream() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(42));
        let log = DiagnosticLog::new(dir.path().join("logs"), clock);

        log.record(DiagnosticStream::Probe, "xray did not listen", "pane line 1\n")
            .await;
        log.record(DiagnosticStream::Probe, "second", "").await;
        log.record(DiagnosticStream::SessionStart, "start failed", "duplicate session")
            .await;

        let probe = std::fs::read_to_string(dir.path().join("logs/probe.log")).unwrap();
        assert_eq!(probe, "[42] xray did not listen\npane line 1\n\n[42] second\n\n");
        let start = std::fs::read_to_string(dir.path().join("logs/session-start.log")).unwrap();
        assert!(start.contains("duplicate session"));
        assert!(!dir.path().join("logs/mux.log").exists());
    }

    #[tokio::test]
    async fn test_disabled_log_writes_nothing() {
        let log = DiagnosticLog::disabled(Arc::new(ManualClock::new(0)));
        assert!(log.path(DiagnosticStream::Mux).is_none());
        log.record(DiagnosticStream::Mux, "ignored", "").await;
    }
}
