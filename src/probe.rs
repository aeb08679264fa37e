//! Local port probing.
//!
//! [`PortProbe::is_listening`] answers "does anything listen on this local TCP
//! port right now" and fails closed: a probe that cannot run reports `false`.
//! [`wait_until_listening`] is the only bounded long wait in the crate.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::shell::process::exec_command;

/// Timeout for a single `lsof` run.
const LSOF_TIMEOUT_MS: u64 = 3000;

/// Timeout for a single connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(300);

/// One-shot listening check.
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_listening(&self, port: u16) -> bool;
}

/// Queries listening sockets with `lsof -nP -iTCP:<port> -sTCP:LISTEN -t`.
pub struct LsofProbe {
    binary: String,
}

impl LsofProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for LsofProbe {
    fn default() -> Self {
        Self::new("lsof")
    }
}

#[async_trait]
impl PortProbe for LsofProbe {
    async fn is_listening(&self, port: u16) -> bool {
        let filter = format!("-iTCP:{port}");
        match exec_command(
            &self.binary,
            &["-nP", &filter, "-sTCP:LISTEN", "-t"],
            LSOF_TIMEOUT_MS,
        )
        .await
        {
            // lsof exits 1 with no output when nothing matches
            Ok(r) => r.success() && !r.stdout.trim().is_empty(),
            Err(e) => {
                debug!("lsof probe for port {port} failed: {e}");
                false
            }
        }
    }
}

/// Treats a successful TCP connect to `127.0.0.1:<port>` as listening.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectProbe;

#[async_trait]
impl PortProbe for ConnectProbe {
    async fn is_listening(&self, port: u16) -> bool {
        matches!(
            tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
            Ok(Ok(_))
        )
    }
}

/// Poll `probe` up to `max_attempts` times, sleeping `delay` between
/// attempts. Returns `true` on the first success.
pub async fn wait_until_listening(
    probe: &dyn PortProbe,
    port: u16,
    max_attempts: u32,
    delay: Duration,
) -> bool {
    for attempt in 1..=max_attempts {
        if probe.is_listening(port).await {
            debug!("Port {port} listening after {attempt} attempt(s)");
            return true;
        }
        if attempt < max_attempts {
            tokio::time::sleep(delay).await;
        }
    }
    debug!("Port {port} not listening after {max_attempts} attempt(s)");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProbe;

    #[tokio::test(start_paused = true)]
    async fn test_wait_gives_up_after_max_attempts() {
        let probe = ScriptedProbe::never();
        let start = tokio::time::Instant::now();

        let ok = wait_until_listening(&probe, 1080, 5, Duration::from_millis(10)).await;

        assert!(!ok);
        assert_eq!(probe.attempts(), 5);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(40), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(50), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_on_first_success() {
        let probe = ScriptedProbe::after(3);
        let ok = wait_until_listening(&probe, 1080, 10, Duration::from_millis(100)).await;
        assert!(ok);
        assert_eq!(probe.attempts(), 3);
    }

    #[tokio::test]
    async fn test_wait_zero_attempts_never_probes() {
        let probe = ScriptedProbe::after(1);
        assert!(!wait_until_listening(&probe, 1080, 0, Duration::from_millis(1)).await);
        assert_eq!(probe.attempts(), 0);
    }

    #[tokio::test]
    async fn test_connect_probe_sees_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(ConnectProbe.is_listening(port).await);
        drop(listener);
        assert!(!ConnectProbe.is_listening(port).await);
    }

    #[tokio::test]
    async fn test_lsof_probe_fails_closed() {
        let probe = LsofProbe::new("definitely-not-lsof-xyz");
        assert!(!probe.is_listening(1080).await);
    }
}
