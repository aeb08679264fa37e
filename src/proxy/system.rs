//! System-level SOCKS proxy setting.
//!
//! The default implementation drives macOS `networksetup` for one network
//! service (e.g. `Wi-Fi`).

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, TunnelError};
use crate::shell::locate_binary;
use crate::shell::process::{exec_command, ExecError};

/// Current SOCKS proxy setting of the machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocksProxyStatus {
    pub enabled: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[async_trait]
pub trait SystemProxy: Send + Sync {
    async fn status(&self) -> Result<SocksProxyStatus>;
    /// Point the system SOCKS proxy at `host:port` and switch it on.
    async fn enable(&self, host: &str, port: u16) -> Result<()>;
    async fn disable(&self) -> Result<()>;
}

/// [`SystemProxy`] backed by `networksetup`.
pub struct NetworkSetup {
    binary: String,
    service: String,
    timeout_ms: u64,
}

impl NetworkSetup {
    pub fn new(binary: impl Into<String>, service: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            binary: binary.into(),
            service: service.into(),
            timeout_ms,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let path =
            locate_binary(&self.binary).ok_or_else(|| TunnelError::DependencyMissing(self.binary.clone()))?;
        debug!("networksetup {}", args.join(" "));

        let result = exec_command(&path.to_string_lossy(), args, self.timeout_ms)
            .await
            .map_err(|e| match e {
                ExecError::NotFound(_) => TunnelError::DependencyMissing(self.binary.clone()),
                other => TunnelError::SystemProxy(other.to_string()),
            })?;
        if !result.success() {
            return Err(TunnelError::SystemProxy(format!(
                "networksetup {}: {}",
                args.first().copied().unwrap_or_default(),
                result.failure_detail()
            )));
        }
        Ok(result.stdout)
    }
}

#[async_trait]
impl SystemProxy for NetworkSetup {
    async fn status(&self) -> Result<SocksProxyStatus> {
        let out = self
            .run(&["-getsocksfirewallproxy", &self.service])
            .await?;
        Ok(parse_socks_status(&out))
    }

    async fn enable(&self, host: &str, port: u16) -> Result<()> {
        let port = port.to_string();
        self.run(&["-setsocksfirewallproxy", &self.service, host, &port])
            .await?;
        self.run(&["-setsocksfirewallproxystate", &self.service, "on"])
            .await?;
        Ok(())
    }

    async fn disable(&self) -> Result<()> {
        self.run(&["-setsocksfirewallproxystate", &self.service, "off"])
            .await?;
        Ok(())
    }
}

/// Parse `networksetup -getsocksfirewallproxy` output:
///
/// ```text
/// Enabled: Yes
/// Server: 127.0.0.1
/// Port: 1080
/// Authenticated Proxy Enabled: 0
/// ```
pub fn parse_socks_status(output: &str) -> SocksProxyStatus {
    let mut status = SocksProxyStatus::default();
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Enabled" => status.enabled = value.eq_ignore_ascii_case("yes"),
            "Server" if !value.is_empty() => status.host = Some(value.to_string()),
            "Port" => status.port = value.parse().ok().filter(|p| *p != 0),
            _ => {}
        }
    }
    status
}
