//! Active tunnel registry.
//!
//! [`TunnelRegistry`] is the single owner of the persisted active-tunnel list.
//! Sessions can disappear behind its back (killed by hand, ssh exited, machine
//! rebooted), so the persisted list is never trusted directly:
//! [`TunnelRegistry::reconcile`] prunes every record whose session is no
//! longer live and is what callers use as "the active tunnels".
//!
//! ## Naming
//!
//! A tunnel's session name is derived from host and local port (see
//! [`naming::tunnel_session_name`]). Two requests for the same pair resolve to
//! the same name and the second is rejected with
//! [`TunnelError::DuplicateSession`], even when the remote ports differ.
//! Names that would start with the managed proxy prefix are refused, since
//! that namespace belongs to the proxy slot.
//!
//! ## Concurrency
//!
//! Each read-modify-write of the persisted list (reconcile, create, kill) holds
//! `txn` for its whole duration, including the session-listing and
//! session-start calls, so no other caller can interleave a write.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Result, TunnelError};
use crate::mux::{naming, SessionGateway};
use crate::recent::{RecencyCache, RecentTunnelEntry};
use crate::store::{load_list, save_list, KvStore, StoredRecord, ACTIVE_TUNNELS_KEY};
use crate::util::Clock;

/// A forward running inside a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tunnel {
    pub session_name: String,
    pub host: String,
    pub local_port: u16,
    pub remote_port: u16,
    /// Epoch milliseconds.
    pub created_at: u64,
}

impl StoredRecord for Tunnel {
    fn is_valid(&self) -> bool {
        !self.session_name.is_empty()
            && !self.host.is_empty()
            && self.local_port != 0
            && self.remote_port != 0
    }
}

/// Outcome of [`TunnelRegistry::kill`].
#[derive(Debug)]
pub struct KillReport {
    /// Persisted list after removal.
    pub tunnels: Vec<Tunnel>,
    /// Set when the session kill itself failed. The record is removed anyway.
    pub warning: Option<TunnelError>,
}

/// Outcome of [`TunnelRegistry::kill_all_managed`].
#[derive(Debug, Default)]
pub struct ManagedSweep {
    pub killed: Vec<String>,
    pub failures: Vec<TunnelError>,
}

pub struct TunnelRegistry {
    gateway: Arc<dyn SessionGateway>,
    store: Arc<dyn KvStore>,
    recent: Arc<RecencyCache>,
    clock: Arc<dyn Clock>,
    /// ssh client used for forwards.
    ssh_binary: String,
    /// Managed proxy session prefix, off limits to tunnels.
    reserved_prefix: String,
    txn: Mutex<()>,
}

impl TunnelRegistry {
    pub fn new(
        gateway: Arc<dyn SessionGateway>,
        store: Arc<dyn KvStore>,
        recent: Arc<RecencyCache>,
        clock: Arc<dyn Clock>,
        ssh_binary: impl Into<String>,
        reserved_prefix: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            store,
            recent,
            clock,
            ssh_binary: ssh_binary.into(),
            reserved_prefix: reserved_prefix.into(),
            txn: Mutex::new(()),
        }
    }

    /// Prune records whose session is gone and return the rest.
    ///
    /// Persists only when something was pruned. If sessions cannot be listed
    /// the error is returned and nothing is pruned.
    pub async fn reconcile(&self) -> Result<Vec<Tunnel>> {
        let _txn = self.txn.lock().await;

        let stored: Vec<Tunnel> = load_list(self.store.as_ref(), ACTIVE_TUNNELS_KEY).await?;
        let live: HashSet<String> = self.gateway.list_sessions().await?.into_iter().collect();

        let active: Vec<Tunnel> = stored
            .iter()
            .filter(|t| live.contains(&t.session_name))
            .cloned()
            .collect();

        if active.len() != stored.len() {
            info!(
                "Pruned {} stale tunnel record(s)",
                stored.len() - active.len()
            );
            save_list(self.store.as_ref(), ACTIVE_TUNNELS_KEY, &active).await?;
        }
        Ok(active)
    }

    /// Start a forward `localhost:local_port -> host:remote_port` in a new
    /// session and record it.
    pub async fn create(&self, host: &str, local_port: u16, remote_port: u16) -> Result<Tunnel> {
        validate_request(host, local_port, remote_port)?;
        let session_name = naming::tunnel_session_name(host, local_port);
        if !self.reserved_prefix.is_empty() && session_name.starts_with(&self.reserved_prefix) {
            return Err(TunnelError::InvalidRequest(format!(
                "Tunnel name \"{session_name}\" uses the reserved prefix \"{}\"",
                self.reserved_prefix
            )));
        }

        let _txn = self.txn.lock().await;

        let live = self.gateway.list_sessions().await?;
        if live.iter().any(|s| s == &session_name) {
            return Err(TunnelError::DuplicateSession(session_name));
        }

        let command = self.forward_command(host, local_port, remote_port);
        self.gateway
            .start_session(&session_name, &command)
            .await
            .map_err(|e| match e {
                TunnelError::DependencyMissing(_) | TunnelError::SessionStartFailed { .. } => e,
                other => TunnelError::SessionStartFailed {
                    name: session_name.clone(),
                    detail: other.to_string(),
                },
            })?;

        let tunnel = Tunnel {
            session_name: session_name.clone(),
            host: host.to_string(),
            local_port,
            remote_port,
            created_at: self.clock.now_ms(),
        };

        let mut stored: Vec<Tunnel> = load_list(self.store.as_ref(), ACTIVE_TUNNELS_KEY).await?;
        stored.retain(|t| t.session_name != session_name);
        stored.push(tunnel.clone());
        save_list(self.store.as_ref(), ACTIVE_TUNNELS_KEY, &stored).await?;

        if let Err(e) = self.recent.promote(host, local_port, remote_port).await {
            warn!("Tunnel {session_name} started but recent list not updated: {e}");
        }

        info!("Tunnel {session_name} started: localhost:{local_port} -> {host}:{remote_port}");
        Ok(tunnel)
    }

    /// Quick relaunch from a recent entry.
    pub async fn relaunch(&self, entry: &RecentTunnelEntry) -> Result<Tunnel> {
        self.create(&entry.host, entry.local_port, entry.remote_port)
            .await
    }

    /// Kill the session and drop its record whether or not the kill worked.
    pub async fn kill(&self, session_name: &str) -> Result<KillReport> {
        let _txn = self.txn.lock().await;

        let warning = match self.gateway.kill_session(session_name).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Kill of {session_name} failed, removing record anyway: {e}");
                Some(e)
            }
        };

        let stored: Vec<Tunnel> = load_list(self.store.as_ref(), ACTIVE_TUNNELS_KEY).await?;
        let tunnels: Vec<Tunnel> = stored
            .iter()
            .filter(|t| t.session_name != session_name)
            .cloned()
            .collect();
        if tunnels.len() != stored.len() {
            save_list(self.store.as_ref(), ACTIVE_TUNNELS_KEY, &tunnels).await?;
        }

        if warning.is_none() {
            info!("Tunnel {session_name} stopped");
        }
        Ok(KillReport { tunnels, warning })
    }

    /// Kill every live session whose name starts with `prefix`.
    ///
    /// Individual failures are collected, not fatal.
    pub async fn kill_all_managed(&self, prefix: &str) -> Result<ManagedSweep> {
        if prefix.is_empty() {
            return Err(TunnelError::InvalidRequest(
                "refusing to kill sessions with an empty prefix".to_string(),
            ));
        }

        let mut sweep = ManagedSweep::default();
        for name in self.gateway.list_sessions().await? {
            if !name.starts_with(prefix) {
                continue;
            }
            match self.gateway.kill_session(&name).await {
                Ok(()) => sweep.killed.push(name),
                Err(e) => {
                    warn!("Failed to kill managed session {name}: {e}");
                    sweep.failures.push(e);
                }
            }
        }
        if !sweep.killed.is_empty() {
            info!("Killed managed session(s): {}", sweep.killed.join(", "));
        }
        Ok(sweep)
    }

    pub async fn recent(&self) -> Result<Vec<RecentTunnelEntry>> {
        self.recent.list().await
    }

    fn forward_command(&self, host: &str, local_port: u16, remote_port: u16) -> String {
        format!(
            "{} -N -o ExitOnForwardFailure=yes -L {local_port}:127.0.0.1:{remote_port} {}",
            shell_words::quote(&self.ssh_binary),
            shell_words::quote(host)
        )
    }
}

fn validate_request(host: &str, local_port: u16, remote_port: u16) -> Result<()> {
    if host.is_empty() {
        return Err(TunnelError::InvalidRequest("Choose a host".to_string()));
    }
    if host.starts_with('-') || host.chars().any(char::is_whitespace) {
        return Err(TunnelError::InvalidRequest(format!(
            "Invalid host \"{host}\""
        )));
    }
    if local_port == 0 || remote_port == 0 {
        return Err(TunnelError::InvalidRequest(
            "Specify both local and remote ports".to_string(),
        ));
    }
    Ok(())
}
