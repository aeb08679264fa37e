//! Error taxonomy shared by every component.
//!
//! Each [`TunnelError`] variant maps to one [`ErrorCategory`]. Components
//! recover at their boundary and hand the caller a `Result` carrying the
//! category, so the CLI can print a short, category-specific message while
//! the longer detail goes to the diagnostic log.

use serde::Serialize;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TunnelError>;

#[derive(Debug, Clone, Error)]
pub enum TunnelError {
    /// A requested session name is already used by a live session.
    #[error("session '{0}' is already running")]
    DuplicateSession(String),

    /// The multiplexer or the wrapped process could not be started.
    #[error("failed to start session '{name}': {detail}")]
    SessionStartFailed { name: String, detail: String },

    /// The selected proxy configuration file does not exist.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(String),

    /// The port never opened within the bounded wait.
    #[error("port {port} did not start listening after {attempts} attempts")]
    ProbeTimeout { port: u16, attempts: u32 },

    /// A required external binary (tmux, xray) is not installed.
    #[error("required binary '{0}' was not found in PATH")]
    DependencyMissing(String),

    /// Killing a session failed. Non-fatal for registry bookkeeping.
    #[error("failed to kill session '{name}': {detail}")]
    KillFailed { name: String, detail: String },

    /// Caller supplied an unusable host or port.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The system-level SOCKS proxy setting could not be changed.
    #[error("system proxy command failed: {0}")]
    SystemProxy(String),

    /// Any other multiplexer command failure (listing, capture).
    #[error("tmux command failed: {0}")]
    Mux(String),

    /// The key-value store could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Coarse failure category, stable for display and scripting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    DuplicateSession,
    SessionStartFailed,
    ConfigNotFound,
    ProbeTimeout,
    DependencyMissing,
    KillFailed,
    InvalidRequest,
    SystemProxy,
    Mux,
    Storage,
}

impl TunnelError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DuplicateSession(_) => ErrorCategory::DuplicateSession,
            Self::SessionStartFailed { .. } => ErrorCategory::SessionStartFailed,
            Self::ConfigNotFound(_) => ErrorCategory::ConfigNotFound,
            Self::ProbeTimeout { .. } => ErrorCategory::ProbeTimeout,
            Self::DependencyMissing(_) => ErrorCategory::DependencyMissing,
            Self::KillFailed { .. } => ErrorCategory::KillFailed,
            Self::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            Self::SystemProxy(_) => ErrorCategory::SystemProxy,
            Self::Mux(_) => ErrorCategory::Mux,
            Self::Storage(_) => ErrorCategory::Storage,
        }
    }

    /// Short message suitable for a toast or a single CLI line.
    pub fn user_message(&self) -> String {
        match self {
            Self::DuplicateSession(name) => format!("Session \"{name}\" is already active"),
            Self::SessionStartFailed { name, .. } => {
                format!("Could not start \"{name}\" (see session-start.log)")
            }
            Self::ConfigNotFound(path) => format!("Config not found: {path}"),
            Self::ProbeTimeout { port, .. } => {
                format!("Proxy did not start listening on port {port} (see probe.log)")
            }
            Self::DependencyMissing(bin) => format!("{bin} is not installed"),
            Self::KillFailed { name, .. } => format!("Could not stop \"{name}\""),
            Self::InvalidRequest(msg) => msg.clone(),
            Self::SystemProxy(_) => "Could not change the system SOCKS proxy".to_string(),
            Self::Mux(_) => "tmux command failed".to_string(),
            Self::Storage(_) => "Could not access saved state".to_string(),
        }
    }
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateSession => "duplicate_session",
            Self::SessionStartFailed => "session_start_failed",
            Self::ConfigNotFound => "config_not_found",
            Self::ProbeTimeout => "probe_timeout",
            Self::DependencyMissing => "dependency_missing",
            Self::KillFailed => "kill_failed",
            Self::InvalidRequest => "invalid_request",
            Self::SystemProxy => "system_proxy",
            Self::Mux => "mux",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCategory::ProbeTimeout).unwrap();
        assert_eq!(json, "\"probe_timeout\"");
        assert_eq!(ErrorCategory::ProbeTimeout.to_string(), "probe_timeout");
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let not_found = TunnelError::ConfigNotFound("/tmp/a.json".into());
        let missing = TunnelError::DependencyMissing("xray".into());
        let probe = TunnelError::ProbeTimeout {
            port: 1080,
            attempts: 10,
        };
        assert_ne!(not_found.user_message(), missing.user_message());
        assert_ne!(missing.user_message(), probe.user_message());
        assert!(probe.user_message().contains("1080"));
    }

    #[test]
    fn test_category_mapping() {
        let err = TunnelError::KillFailed {
            name: "x".into(),
            detail: "gone".into(),
        };
        assert_eq!(err.category(), ErrorCategory::KillFailed);
        assert_eq!(
            TunnelError::DuplicateSession("a".into()).category(),
            ErrorCategory::DuplicateSession
        );
    }
}
