//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `TUNNELCTL_DATA_DIR`, `TUNNELCTL_XRAY_DIR`,
//!    `TUNNELCTL_DEFAULT_CONFIG`, `TUNNELCTL_SOCKS_PORT`,
//!    `TUNNELCTL_NETWORK_SERVICE`
//! 2. **Config file**: path via `--config <path>`, or
//!    `~/.config/tunnelctl/tunnelctl.toml`
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [storage]
//! data_dir = "~/.local/share/tunnelctl"
//! diagnostics = true
//!
//! [tmux]
//! binary = "tmux"
//! command_timeout_ms = 5000
//!
//! [proxy]
//! xray_binary = "~/xray/xray"
//! config_dir = "~/xray"
//! default_config = "home.json"      # optional, falls back to config.json
//! session_prefix = "xray-"
//! socks_host = "127.0.0.1"
//! socks_port = 1080
//! network_service = "Wi-Fi"
//! networksetup_binary = "networksetup"
//!
//! [probe]
//! method = "lsof"                   # or "connect"
//! lsof_binary = "lsof"
//! attempts = 10
//! delay_ms = 500
//!
//! [ssh]
//! binary = "ssh"
//! config_path = "~/.ssh/config"
//!
//! [logging]
//! level = "warn"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::util::expand_tilde;

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/tunnelctl/tunnelctl.toml";

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tmux: TmuxConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Persisted state and diagnostic logs.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory for `sshTunnels.json`, `recentTunnels.json` and `logs/`.
    /// Override with `TUNNELCTL_DATA_DIR`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Write diagnostic logs under `<data_dir>/logs` (default true).
    #[serde(default = "default_diagnostics")]
    pub diagnostics: bool,
}

/// Terminal multiplexer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TmuxConfig {
    /// tmux binary, bare name or path (default `tmux`).
    #[serde(default = "default_tmux_binary")]
    pub binary: String,
    /// Timeout for each tmux invocation in milliseconds (default 5000).
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

/// Managed SOCKS proxy settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Proxy binary (default `~/xray/xray`).
    #[serde(default = "default_xray_binary")]
    pub xray_binary: String,
    /// Directory scanned for `*.json` configs. Override with `TUNNELCTL_XRAY_DIR`.
    #[serde(default = "default_config_dir")]
    pub config_dir: String,
    /// Config used when none is requested. Override with `TUNNELCTL_DEFAULT_CONFIG`.
    #[serde(default)]
    pub default_config: Option<String>,
    /// Reserved session name prefix for the managed proxy (default `xray-`).
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
    /// Host the system proxy is pointed at (default `127.0.0.1`).
    #[serde(default = "default_socks_host")]
    pub socks_host: String,
    /// Local SOCKS port the proxy listens on. Override with `TUNNELCTL_SOCKS_PORT`.
    #[serde(default = "default_socks_port")]
    pub socks_port: u16,
    /// macOS network service. Override with `TUNNELCTL_NETWORK_SERVICE`.
    #[serde(default = "default_network_service")]
    pub network_service: String,
    #[serde(default = "default_networksetup_binary")]
    pub networksetup_binary: String,
}

/// How a local port is checked for a listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    #[default]
    Lsof,
    Connect,
}

/// Port probe settings used after starting the proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub method: ProbeMethod,
    #[serde(default = "default_lsof_binary")]
    pub lsof_binary: String,
    /// Maximum probe attempts (default 10).
    #[serde(default = "default_probe_attempts")]
    pub attempts: u32,
    /// Delay between attempts in milliseconds (default 500).
    #[serde(default = "default_probe_delay_ms")]
    pub delay_ms: u64,
}

/// SSH client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_binary")]
    pub binary: String,
    /// Client config read for host aliases (default `~/.ssh/config`).
    #[serde(default = "default_ssh_config_path")]
    pub config_path: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `warn`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_data_dir() -> String {
    "~/.local/share/tunnelctl".to_string()
}
fn default_diagnostics() -> bool {
    true
}
fn default_tmux_binary() -> String {
    "tmux".to_string()
}
fn default_command_timeout_ms() -> u64 {
    5000
}
fn default_xray_binary() -> String {
    "~/xray/xray".to_string()
}
fn default_config_dir() -> String {
    "~/xray".to_string()
}
fn default_session_prefix() -> String {
    "xray-".to_string()
}
fn default_socks_host() -> String {
    "127.0.0.1".to_string()
}
fn default_socks_port() -> u16 {
    1080
}
fn default_network_service() -> String {
    "Wi-Fi".to_string()
}
fn default_networksetup_binary() -> String {
    "networksetup".to_string()
}
fn default_lsof_binary() -> String {
    "lsof".to_string()
}
fn default_probe_attempts() -> u32 {
    10
}
fn default_probe_delay_ms() -> u64 {
    500
}
fn default_ssh_binary() -> String {
    "ssh".to_string()
}
fn default_ssh_config_path() -> String {
    "~/.ssh/config".to_string()
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            diagnostics: default_diagnostics(),
        }
    }
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            binary: default_tmux_binary(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            xray_binary: default_xray_binary(),
            config_dir: default_config_dir(),
            default_config: None,
            session_prefix: default_session_prefix(),
            socks_host: default_socks_host(),
            socks_port: default_socks_port(),
            network_service: default_network_service(),
            networksetup_binary: default_networksetup_binary(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            method: ProbeMethod::default(),
            lsof_binary: default_lsof_binary(),
            attempts: default_probe_attempts(),
            delay_ms: default_probe_delay_ms(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: default_ssh_binary(),
            config_path: default_ssh_config_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist and parse. Otherwise
    /// [`DEFAULT_CONFIG_PATH`] is used when present, else compiled defaults.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let mut config = match path {
            Some(p) => Self::from_file(Path::new(expand_tilde(p).as_ref()))?,
            None => {
                let default_path = PathBuf::from(expand_tilde(DEFAULT_CONFIG_PATH).as_ref());
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {e}", path.display()))
    }

    /// Apply env var overrides, reading variables through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), String> {
        if let Some(dir) = lookup("TUNNELCTL_DATA_DIR") {
            self.storage.data_dir = dir;
        }
        if let Some(dir) = lookup("TUNNELCTL_XRAY_DIR") {
            self.proxy.config_dir = dir;
        }
        if let Some(name) = lookup("TUNNELCTL_DEFAULT_CONFIG") {
            self.proxy.default_config = Some(name).filter(|n| !n.is_empty());
        }
        if let Some(port) = lookup("TUNNELCTL_SOCKS_PORT") {
            self.proxy.socks_port = port
                .parse()
                .map_err(|e| format!("Invalid TUNNELCTL_SOCKS_PORT \"{port}\": {e}"))?;
        }
        if let Some(service) = lookup("TUNNELCTL_NETWORK_SERVICE") {
            self.proxy.network_service = service;
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(expand_tilde(&self.storage.data_dir).as_ref())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(expand_tilde(&self.proxy.config_dir).as_ref())
    }

    pub fn ssh_config_path(&self) -> PathBuf {
        PathBuf::from(expand_tilde(&self.ssh.config_path).as_ref())
    }

    pub fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.probe.delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tmux.binary, "tmux");
        assert_eq!(config.tmux.command_timeout_ms, 5000);
        assert_eq!(config.proxy.socks_port, 1080);
        assert_eq!(config.proxy.session_prefix, "xray-");
        assert_eq!(config.proxy.default_config, None);
        assert_eq!(config.probe.method, ProbeMethod::Lsof);
        assert_eq!(config.logging.level, "warn");
        assert!(config.log_dir().ends_with("tunnelctl/logs"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunnelctl.toml");
        std::fs::write(
            &path,
            "[proxy]\nsocks_port = 10808\ndefault_config = \"home.json\"\n\n[probe]\nmethod = \"connect\"\nattempts = 3\n",
        )
        .unwrap();

        let config = Config::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.proxy.socks_port, 10808);
        assert_eq!(config.proxy.default_config.as_deref(), Some("home.json"));
        assert_eq!(config.proxy.socks_host, "127.0.0.1");
        assert_eq!(config.probe.method, ProbeMethod::Connect);
        assert_eq!(config.probe.attempts, 3);
        assert_eq!(config.probe.delay_ms, 500);
        assert_eq!(config.ssh.binary, "ssh");
    }

    #[test]
    fn test_explicit_path_errors() {
        assert!(Config::load(Some("/nonexistent/tunnelctl.toml")).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[probe]\nmethod = \"ping\"\n").unwrap();
        let err = Config::load(Some(path.to_str().unwrap())).unwrap_err();
        assert!(err.contains("Failed to parse"), "{err}");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TUNNELCTL_DATA_DIR", "/tmp/tc"),
            ("TUNNELCTL_XRAY_DIR", "/opt/xray"),
            ("TUNNELCTL_DEFAULT_CONFIG", "work.json"),
            ("TUNNELCTL_SOCKS_PORT", "1081"),
            ("TUNNELCTL_NETWORK_SERVICE", "Ethernet"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|k| env.get(k).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.data_dir(), PathBuf::from("/tmp/tc"));
        assert_eq!(config.config_dir(), PathBuf::from("/opt/xray"));
        assert_eq!(config.proxy.default_config.as_deref(), Some("work.json"));
        assert_eq!(config.proxy.socks_port, 1081);
        assert_eq!(config.proxy.network_service, "Ethernet");
    }

    #[test]
    fn test_bad_port_env_is_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(|k| (k == "TUNNELCTL_SOCKS_PORT").then(|| "socks".to_string()))
            .unwrap_err();
        assert!(err.contains("TUNNELCTL_SOCKS_PORT"));
    }
}
