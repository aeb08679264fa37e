//! Most-recently-used list of tunnel parameters for quick relaunch.
//!
//! Entries are a memory of `(host, local port, remote port)` only. They never
//! expire by age and are never checked against running sessions; they leave
//! the list only by being pushed past [`RECENT_CAPACITY`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::store::{load_list, save_list, KvStore, StoredRecord, RECENT_TUNNELS_KEY};
use crate::util::Clock;

/// Maximum number of remembered entries.
pub const RECENT_CAPACITY: usize = 10;

/// Parameters of a previously launched tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTunnelEntry {
    pub host: String,
    pub local_port: u16,
    pub remote_port: u16,
    /// Epoch milliseconds; ordering only.
    pub last_used_at: u64,
}

impl RecentTunnelEntry {
    fn same_triple(&self, host: &str, local_port: u16, remote_port: u16) -> bool {
        self.host == host && self.local_port == local_port && self.remote_port == remote_port
    }
}

impl StoredRecord for RecentTunnelEntry {
    fn is_valid(&self) -> bool {
        !self.host.is_empty() && self.local_port != 0 && self.remote_port != 0
    }
}

/// Owner of the persisted recent-entries list.
pub struct RecencyCache {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    /// Serializes promote's read-modify-write.
    write_lock: Mutex<()>,
}

impl RecencyCache {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Move (or insert) the triple to the front, cap the list, persist it.
    pub async fn promote(
        &self,
        host: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Vec<RecentTunnelEntry>> {
        let _guard = self.write_lock.lock().await;

        let mut list: Vec<RecentTunnelEntry> =
            load_list(self.store.as_ref(), RECENT_TUNNELS_KEY).await?;
        list.retain(|e| !e.same_triple(host, local_port, remote_port));
        list.insert(
            0,
            RecentTunnelEntry {
                host: host.to_string(),
                local_port,
                remote_port,
                last_used_at: self.clock.now_ms(),
            },
        );
        list.truncate(RECENT_CAPACITY);

        save_list(self.store.as_ref(), RECENT_TUNNELS_KEY, &list).await?;
        Ok(list)
    }

    /// The persisted list, most recent first.
    pub async fn list(&self) -> Result<Vec<RecentTunnelEntry>> {
        load_list(self.store.as_ref(), RECENT_TUNNELS_KEY).await
    }
}
