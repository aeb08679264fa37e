//! Persistent key-value storage for tunnel state.
//!
//! The core only needs string values under a handful of keys, read and
//! written whole. [`KvStore`] is that interface; [`JsonFileStore`] keeps one
//! `<key>.json` file per key, and [`MemoryStore`] backs tests.
//!
//! Typed lists are loaded with [`load_list`], which is fail-soft: a value that
//! is not a JSON array is treated as empty, and individual records that fail
//! to deserialize or validate are dropped. A corrupt file therefore resets
//! that key instead of wedging every command.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Result, TunnelError};

/// Key holding the JSON array of active tunnels.
pub const ACTIVE_TUNNELS_KEY: &str = "sshTunnels";
/// Key holding the JSON array of recent tunnel entries.
pub const RECENT_TUNNELS_KEY: &str = "recentTunnels";

/// Monotonic counter for unique temp-file names.
static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Whole-value string storage.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// A record that can be checked after deserialization.
pub trait StoredRecord {
    /// `false` drops the record on load.
    fn is_valid(&self) -> bool;
}

/// Load a typed list, dropping anything that does not parse or validate.
pub async fn load_list<T>(store: &dyn KvStore, key: &str) -> Result<Vec<T>>
where
    T: DeserializeOwned + StoredRecord,
{
    let Some(raw) = store.get(key).await? else {
        return Ok(Vec::new());
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let values: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("Stored value for '{key}' is not a JSON array, treating as empty: {e}");
            return Ok(Vec::new());
        }
    };

    let total = values.len();
    let records: Vec<T> = values
        .into_iter()
        .filter_map(|v| serde_json::from_value::<T>(v).ok())
        .filter(StoredRecord::is_valid)
        .collect();
    if records.len() != total {
        warn!(
            "Dropped {} invalid record(s) from '{key}'",
            total - records.len()
        );
    }
    Ok(records)
}

/// Serialize and store a typed list.
pub async fn save_list<T: Serialize>(store: &dyn KvStore, key: &str, items: &[T]) -> Result<()> {
    let json = serde_json::to_string(items)
        .map_err(|e| TunnelError::Storage(format!("serialize {key}: {e}")))?;
    store.set(key, &json).await
}

/// One JSON file per key inside a directory.
///
/// Writes go to a temp file in the same directory and are renamed over the
/// target, so readers never observe a partially-written value.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key);
        match fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TunnelError::Storage(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| TunnelError::Storage(format!("create {}: {e}", self.dir.display())))?;

        let path = self.key_path(key);
        let seq = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_path = self
            .dir
            .join(format!(".{key}.tmp_{}_{seq}", std::process::id()));

        fs::write(&temp_path, value)
            .await
            .map_err(|e| TunnelError::Storage(format!("write {}: {e}", temp_path.display())))?;

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(TunnelError::Storage(format!(
                "rename to {}: {e}",
                path.display()
            )));
        }
        debug!("Stored {key} ({} bytes)", value.len());
        Ok(())
    }
}

/// In-memory store that counts writes.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Current raw value of `key`.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Item {
        name: String,
        port: u16,
    }

    impl StoredRecord for Item {
        fn is_valid(&self) -> bool {
            !self.name.is_empty() && self.port != 0
        }
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_and_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state"));
        assert_eq!(store.get("sshTunnels").await.unwrap(), None);

        store.set("sshTunnels", "[]").await.unwrap();
        store.set("sshTunnels", "[1]").await.unwrap();
        assert_eq!(store.get("sshTunnels").await.unwrap().as_deref(), Some("[1]"));

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_load_list_garbage_is_empty() {
        let store = MemoryStore::new();
        store.set("k", "{not json").await.unwrap();
        let items: Vec<Item> = load_list(&store, "k").await.unwrap();
        assert!(items.is_empty());

        store.set("k", "{\"name\":\"x\"}").await.unwrap();
        let items: Vec<Item> = load_list(&store, "k").await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_load_list_drops_invalid_records() {
        let store = MemoryStore::new();
        store
            .set(
                "k",
                r#"[{"name":"ok","port":22},{"name":"","port":22},{"port":"x"},{"name":"z","port":0}]"#,
            )
            .await
            .unwrap();
        let items: Vec<Item> = load_list(&store, "k").await.unwrap();
        assert_eq!(
            items,
            vec![Item {
                name: "ok".into(),
                port: 22
            }]
        );
    }

    #[tokio::test]
    async fn test_save_list_counts_writes() {
        let store = MemoryStore::new();
        save_list(&store, "k", &[Item { name: "a".into(), port: 1 }])
            .await
            .unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.raw("k").as_deref(), Some(r#"[{"name":"a","port":1}]"#));
    }
}
