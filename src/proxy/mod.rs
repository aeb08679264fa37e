//! Managed SOCKS proxy slot.
//!
//! There is at most one managed proxy session. Its tmux session name is the
//! reserved prefix plus the escaped config name, so the active config is
//! always recovered from live session names and never persisted separately.
//!
//! Ordering rules:
//! - switching configs kills every managed session before starting the new one;
//! - disabling turns the system proxy off before any session is killed, so
//!   traffic never points at a dead port;
//! - a switch that fails after the old session was swept also turns the
//!   system proxy off.

pub mod catalog;
pub mod system;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::diagnostics::{DiagnosticLog, DiagnosticStream};
use crate::error::{Result, TunnelError};
use crate::mux::{naming, SessionGateway};
use crate::probe::{wait_until_listening, PortProbe};
use crate::registry::{ManagedSweep, TunnelRegistry};
use crate::shell::locate_binary;

use catalog::{ConfigCatalog, ConfigDetail, ConfigItem};
use system::SystemProxy;

/// Derived proxy state. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "config", rename_all = "snake_case")]
pub enum ProxyState {
    /// No system-level query has completed yet.
    Unknown,
    Off,
    On(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnableOutcome {
    /// Already on with the requested config; nothing was touched.
    AlreadyActive(String),
    Started(String),
}

/// Static knobs of the controller.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub session_prefix: String,
    pub xray_binary: String,
    pub socks_host: String,
    pub socks_port: u16,
    pub probe_attempts: u32,
    pub probe_delay: Duration,
}

pub struct ManagedProxyController {
    gateway: Arc<dyn SessionGateway>,
    registry: Arc<TunnelRegistry>,
    system: Arc<dyn SystemProxy>,
    probe: Arc<dyn PortProbe>,
    catalog: ConfigCatalog,
    diagnostics: DiagnosticLog,
    settings: ProxySettings,
    state: Mutex<ProxyState>,
    /// Serializes enable/disable.
    op: tokio::sync::Mutex<()>,
}

impl ManagedProxyController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn SessionGateway>,
        registry: Arc<TunnelRegistry>,
        system: Arc<dyn SystemProxy>,
        probe: Arc<dyn PortProbe>,
        catalog: ConfigCatalog,
        diagnostics: DiagnosticLog,
        settings: ProxySettings,
    ) -> Self {
        Self {
            gateway,
            registry,
            system,
            probe,
            catalog,
            diagnostics,
            settings,
            state: Mutex::new(ProxyState::Unknown),
            op: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> ProxyState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or(ProxyState::Unknown)
    }

    fn set_state(&self, state: ProxyState) {
        if let Ok(mut s) = self.state.lock() {
            *s = state;
        }
    }

    /// Whether the system SOCKS proxy is on. Query failure reads as off.
    pub async fn query_enabled(&self) -> bool {
        match self.system.status().await {
            Ok(status) => status.enabled,
            Err(e) => {
                warn!("System proxy query failed: {e}");
                false
            }
        }
    }

    /// Recompute state from the system setting and live session names.
    pub async fn refresh(&self) -> ProxyState {
        let enabled = self.query_enabled().await;
        let active = match self.gateway.list_sessions().await {
            Ok(sessions) => naming::active_config(&self.settings.session_prefix, sessions.iter()),
            Err(e) => {
                warn!("Could not list sessions: {e}");
                None
            }
        };
        let state = match active {
            Some(config) if enabled => ProxyState::On(config),
            _ => ProxyState::Off,
        };
        self.set_state(state.clone());
        state
    }

    /// Turn the proxy on with `requested` (or the default config), switching
    /// away from whatever config is running.
    pub async fn enable(&self, requested: Option<&str>) -> Result<EnableOutcome> {
        let _op = self.op.lock().await;
        let config = self.catalog.resolve_name(requested);

        if self.refresh().await == ProxyState::On(config.clone()) {
            info!("Proxy already active with {config}");
            return Ok(EnableOutcome::AlreadyActive(config));
        }

        let binary = locate_binary(&self.settings.xray_binary)
            .ok_or_else(|| TunnelError::DependencyMissing(self.settings.xray_binary.clone()))?;

        let sweep = self.sweep().await?;
        let was_serving = !sweep.killed.is_empty() || self.query_enabled().await;
        self.set_state(ProxyState::Off);

        if let Err(e) = self.start(&config, &binary).await {
            if was_serving {
                self.release_system_proxy().await;
            }
            return Err(e);
        }

        self.set_state(ProxyState::On(config.clone()));
        info!(
            "Proxy on: {config} at {}:{}",
            self.settings.socks_host, self.settings.socks_port
        );
        Ok(EnableOutcome::Started(config))
    }

    /// Start `config` in the empty slot, wait for its port, then point the
    /// system proxy at it. On failure the new session is gone.
    async fn start(&self, config: &str, binary: &Path) -> Result<()> {
        let path = self.catalog.resolve_path(config)?;
        if !self.catalog.exists(config).await? {
            return Err(TunnelError::ConfigNotFound(config.to_string()));
        }

        let session = naming::managed_session_name(&self.settings.session_prefix, config);
        let command = format!(
            "{} run -c {}",
            shell_words::quote(&binary.to_string_lossy()),
            shell_words::quote(&path.to_string_lossy())
        );
        self.gateway
            .start_session(&session, &command)
            .await
            .map_err(|e| match e {
                TunnelError::Mux(detail) => TunnelError::SessionStartFailed {
                    name: session.clone(),
                    detail,
                },
                other => other,
            })?;

        let port = self.settings.socks_port;
        let attempts = self.settings.probe_attempts;
        if !wait_until_listening(self.probe.as_ref(), port, attempts, self.settings.probe_delay).await {
            self.record_probe_failure(&session, port, attempts).await;
            self.kill_quietly(&session).await;
            return Err(TunnelError::ProbeTimeout { port, attempts });
        }

        if let Err(e) = self.system.enable(&self.settings.socks_host, port).await {
            warn!("Proxy {config} listening but system proxy not set: {e}");
            self.kill_quietly(&session).await;
            return Err(e);
        }
        Ok(())
    }

    /// Turn the system proxy off, then kill managed sessions.
    ///
    /// If the system proxy cannot be turned off nothing is killed.
    pub async fn disable(&self) -> Result<ManagedSweep> {
        let _op = self.op.lock().await;

        self.system.disable().await?;
        let sweep = self.sweep().await?;
        self.set_state(ProxyState::Off);
        info!("Proxy off");
        Ok(sweep)
    }

    pub async fn configs(&self) -> Vec<ConfigItem> {
        self.catalog.items().await
    }

    /// Details and contents of config `name`.
    pub async fn show(&self, name: &str) -> Result<ConfigDetail> {
        self.catalog.read(name).await
    }

    /// Delete config `name`. The running config cannot be removed.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let _op = self.op.lock().await;

        let sessions = self.gateway.list_sessions().await?;
        let running = sessions
            .iter()
            .filter_map(|s| naming::config_from_session_name(&self.settings.session_prefix, s))
            .any(|c| c == name);
        if running {
            return Err(TunnelError::InvalidRequest(format!(
                "{name} is in use by the running proxy; disable it first"
            )));
        }
        self.catalog.remove(name).await?;
        info!("Config {name} removed");
        Ok(())
    }

    async fn sweep(&self) -> Result<ManagedSweep> {
        let sweep = self
            .registry
            .kill_all_managed(&self.settings.session_prefix)
            .await?;
        for failure in &sweep.failures {
            warn!("Managed session not killed: {failure}");
        }
        Ok(sweep)
    }

    async fn record_probe_failure(&self, session: &str, port: u16, attempts: u32) {
        let pane = match self.gateway.capture_output(session).await {
            Ok(out) => out,
            Err(e) => format!("(pane capture failed: {e})"),
        };
        self.diagnostics
            .record(
                DiagnosticStream::Probe,
                &format!("{session}: port {port} not listening after {attempts} attempt(s)"),
                &pane,
            )
            .await;
    }

    async fn release_system_proxy(&self) {
        match self.system.disable().await {
            Ok(()) => info!("System proxy turned off after failed switch"),
            Err(e) => warn!("System proxy still points at a closed port: {e}"),
        }
    }

    async fn kill_quietly(&self, session: &str) {
        if let Err(e) = self.gateway.kill_session(session).await {
            warn!("Could not kill failed proxy session {session}: {e}");
        }
    }
}
