//! Test doubles shared by the unit tests.
//!
//! The gateway and system-proxy fakes write every call into one shared
//! [`Trace`], so tests can assert on cross-component ordering.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Result, TunnelError};
use crate::mux::SessionGateway;
use crate::probe::PortProbe;
use crate::proxy::system::{SocksProxyStatus, SystemProxy};
use crate::util::Clock;

/// Clock that only moves when told to.
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(AtomicU64::new(start_ms))
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Ordered log of calls made against fakes.
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == entry)
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

/// In-memory session namespace behaving like tmux.
pub struct FakeGateway {
    sessions: Mutex<Vec<String>>,
    trace: Trace,
    pub fail_start: AtomicBool,
    pub fail_list: AtomicBool,
}

impl FakeGateway {
    pub fn new(trace: Trace) -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            trace,
            fail_start: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
        }
    }

    pub fn with_sessions(trace: Trace, sessions: &[&str]) -> Self {
        let gw = Self::new(trace);
        gw.sessions
            .lock()
            .unwrap()
            .extend(sessions.iter().map(ToString::to_string));
        gw
    }

    pub fn sessions(&self) -> Vec<String> {
        self.sessions.lock().unwrap().clone()
    }

    /// Simulate a session dying outside the tool.
    pub fn drop_session(&self, name: &str) {
        self.sessions.lock().unwrap().retain(|s| s != name);
    }
}

#[async_trait]
impl SessionGateway for FakeGateway {
    async fn list_sessions(&self) -> Result<Vec<String>> {
        self.trace.push("list");
        if self.fail_list.load(Ordering::Relaxed) {
            return Err(TunnelError::DependencyMissing("tmux".into()));
        }
        Ok(self.sessions())
    }

    async fn start_session(&self, name: &str, command: &str) -> Result<()> {
        self.trace.push(format!("start:{name}"));
        let mut sessions = self.sessions.lock().unwrap();
        if self.fail_start.load(Ordering::Relaxed) || sessions.iter().any(|s| s == name) {
            return Err(TunnelError::SessionStartFailed {
                name: name.to_string(),
                detail: format!("refused: {command}"),
            });
        }
        sessions.push(name.to_string());
        Ok(())
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        self.trace.push(format!("kill:{name}"));
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|s| s != name);
        if sessions.len() == before {
            return Err(TunnelError::KillFailed {
                name: name.to_string(),
                detail: format!("can't find session: {name}"),
            });
        }
        Ok(())
    }

    async fn capture_output(&self, name: &str) -> Result<String> {
        self.trace.push(format!("capture:{name}"));
        Ok(format!("pane output of {name}\nFailed to start: bad config\n"))
    }
}

/// System SOCKS proxy setting held in memory.
pub struct FakeSystemProxy {
    status: Mutex<SocksProxyStatus>,
    trace: Trace,
    pub fail_query: AtomicBool,
    pub fail_set: AtomicBool,
}

impl FakeSystemProxy {
    pub fn new(trace: Trace) -> Self {
        Self {
            status: Mutex::new(SocksProxyStatus::default()),
            trace,
            fail_query: AtomicBool::new(false),
            fail_set: AtomicBool::new(false),
        }
    }

    pub fn current(&self) -> SocksProxyStatus {
        self.status.lock().unwrap().clone()
    }
}

#[async_trait]
impl SystemProxy for FakeSystemProxy {
    async fn status(&self) -> Result<SocksProxyStatus> {
        self.trace.push("proxy:status");
        if self.fail_query.load(Ordering::Relaxed) {
            return Err(TunnelError::SystemProxy("query failed".into()));
        }
        Ok(self.current())
    }

    async fn enable(&self, host: &str, port: u16) -> Result<()> {
        self.trace.push(format!("proxy:on:{host}:{port}"));
        if self.fail_set.load(Ordering::Relaxed) {
            return Err(TunnelError::SystemProxy("set failed".into()));
        }
        *self.status.lock().unwrap() = SocksProxyStatus {
            enabled: true,
            host: Some(host.to_string()),
            port: Some(port),
        };
        Ok(())
    }

    async fn disable(&self) -> Result<()> {
        self.trace.push("proxy:off");
        if self.fail_set.load(Ordering::Relaxed) {
            return Err(TunnelError::SystemProxy("set failed".into()));
        }
        self.status.lock().unwrap().enabled = false;
        Ok(())
    }
}

/// Probe that starts succeeding on a given attempt (or never).
pub struct ScriptedProbe {
    succeed_on: Option<u32>,
    attempts: AtomicU32,
}

impl ScriptedProbe {
    pub fn never() -> Self {
        Self {
            succeed_on: None,
            attempts: AtomicU32::new(0),
        }
    }

    /// Succeeds on attempt `n` (1-based) and every attempt after.
    pub fn after(n: u32) -> Self {
        Self {
            succeed_on: Some(n),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PortProbe for ScriptedProbe {
    async fn is_listening(&self, _port: u16) -> bool {
        let n = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        self.succeed_on.is_some_and(|s| n >= s)
    }
}
