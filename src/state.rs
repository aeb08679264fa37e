//! Application state wired from [`Config`].
//!
//! Builds the concrete collaborators (tmux gateway, JSON file store, probe,
//! `networksetup`) once and hands out the registry and the proxy controller.

use std::sync::Arc;

use crate::config::{Config, ProbeMethod};
use crate::diagnostics::DiagnosticLog;
use crate::hosts::{load_hosts, SshHost};
use crate::mux::{SessionGateway, TmuxGateway};
use crate::probe::{ConnectProbe, LsofProbe, PortProbe};
use crate::proxy::catalog::ConfigCatalog;
use crate::proxy::system::NetworkSetup;
use crate::proxy::{ManagedProxyController, ProxySettings};
use crate::recent::RecencyCache;
use crate::registry::TunnelRegistry;
use crate::store::{JsonFileStore, KvStore};
use crate::util::{Clock, SystemClock};

/// Shared application state for one tunnelctl process.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    pub registry: Arc<TunnelRegistry>,
    pub proxy: Arc<ManagedProxyController>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let diagnostics = if config.storage.diagnostics {
            DiagnosticLog::new(config.log_dir(), clock.clone())
        } else {
            DiagnosticLog::disabled(clock.clone())
        };

        let gateway: Arc<dyn SessionGateway> = Arc::new(TmuxGateway::new(
            config.tmux.binary.clone(),
            config.tmux.command_timeout_ms,
            diagnostics.clone(),
        ));
        let store: Arc<dyn KvStore> = Arc::new(JsonFileStore::new(config.data_dir()));
        let recent = Arc::new(RecencyCache::new(store.clone(), clock.clone()));
        let registry = Arc::new(TunnelRegistry::new(
            gateway.clone(),
            store,
            recent,
            clock.clone(),
            config.ssh.binary.clone(),
            config.proxy.session_prefix.clone(),
        ));

        let probe: Arc<dyn PortProbe> = match config.probe.method {
            ProbeMethod::Lsof => Arc::new(LsofProbe::new(config.probe.lsof_binary.clone())),
            ProbeMethod::Connect => Arc::new(ConnectProbe),
        };
        let system = Arc::new(NetworkSetup::new(
            config.proxy.networksetup_binary.clone(),
            config.proxy.network_service.clone(),
            config.tmux.command_timeout_ms,
        ));
        let catalog = ConfigCatalog::new(
            config.config_dir(),
            config.proxy.default_config.clone(),
            clock,
        );
        let settings = ProxySettings {
            session_prefix: config.proxy.session_prefix.clone(),
            xray_binary: config.proxy.xray_binary.clone(),
            socks_host: config.proxy.socks_host.clone(),
            socks_port: config.proxy.socks_port,
            probe_attempts: config.probe.attempts,
            probe_delay: config.probe_delay(),
        };
        let proxy = Arc::new(ManagedProxyController::new(
            gateway,
            registry.clone(),
            system,
            probe,
            catalog,
            diagnostics,
            settings,
        ));

        Self {
            config: Arc::new(config),
            registry,
            proxy,
        }
    }

    /// Host aliases from the configured SSH client config.
    pub fn ssh_hosts(&self) -> Vec<SshHost> {
        load_hosts(&self.config.ssh_config_path())
    }
}
