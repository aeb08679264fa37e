//! Proxy configuration files on disk.
//!
//! The catalog scans one directory for `*.json` files. Directory listings are
//! cached per resolved path for [`LISTING_TTL_MS`]; a missing directory or an
//! empty one yields a single fallback name so there is always something to
//! choose.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, TunnelError};
use crate::util::{epoch_ms, Clock};

/// Config used when neither a request nor a configured default names one.
pub const FALLBACK_CONFIG: &str = "config.json";

/// Freshness window of a cached directory listing.
pub const LISTING_TTL_MS: u64 = 30_000;

const CONFIG_EXTENSION: &str = "json";

/// Detail view of one configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigItem {
    pub name: String,
    pub path: PathBuf,
    pub is_default: bool,
    pub exists: bool,
    pub size: Option<u64>,
    /// Last modification, epoch milliseconds.
    pub modified: Option<u64>,
}

/// A config's details plus its file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDetail {
    #[serde(flatten)]
    pub item: ConfigItem,
    pub contents: String,
}

struct ListingEntry {
    names: Vec<String>,
    captured_at: u64,
}

pub struct ConfigCatalog {
    dir: PathBuf,
    default_config: Option<String>,
    clock: Arc<dyn Clock>,
    listings: Mutex<HashMap<PathBuf, ListingEntry>>,
}

impl ConfigCatalog {
    pub fn new(dir: impl Into<PathBuf>, default_config: Option<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            default_config: default_config.filter(|c| !c.is_empty()),
            clock,
            listings: Mutex::new(HashMap::new()),
        }
    }

    /// Configured default, else [`FALLBACK_CONFIG`].
    pub fn default_name(&self) -> &str {
        self.default_config.as_deref().unwrap_or(FALLBACK_CONFIG)
    }

    /// Resolve the effective config for an enable request.
    pub fn resolve_name(&self, requested: Option<&str>) -> String {
        requested
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.default_name())
            .to_string()
    }

    /// Path of config `name` inside the catalog directory.
    pub fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
            return Err(TunnelError::InvalidRequest(format!(
                "Invalid config name \"{name}\""
            )));
        }
        Ok(self.dir.join(name))
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.resolve_path(name)?;
        Ok(tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    /// Selectable config names, default first. Never empty.
    pub async fn names(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let key = self.listing_key().await;
        if let Some(names) = self.cached(&key, now) {
            return names;
        }

        let mut names = scan_dir(&self.dir).await;
        if names.is_empty() {
            names.push(self.default_name().to_string());
        } else if let Some(pos) = names.iter().position(|n| n == self.default_name()) {
            let default = names.remove(pos);
            names.insert(0, default);
        }

        if let Ok(mut listings) = self.listings.lock() {
            listings.insert(
                key,
                ListingEntry {
                    names: names.clone(),
                    captured_at: now,
                },
            );
        }
        names
    }

    /// Every known config with file details: the default first (even when
    /// missing on disk), then the rest of the listing.
    pub async fn items(&self) -> Vec<ConfigItem> {
        let default = self.default_name().to_string();
        let mut items = Vec::new();
        if let Ok(item) = self.inspect(&default).await {
            items.push(item);
        }
        for name in self.names().await {
            if name == default {
                continue;
            }
            match self.inspect(&name).await {
                Ok(item) if item.exists => items.push(item),
                Ok(_) => {}
                Err(e) => debug!("Skipping config {name}: {e}"),
            }
        }
        items
    }

    pub async fn inspect(&self, name: &str) -> Result<ConfigItem> {
        let path = self.resolve_path(name)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .ok()
            .filter(std::fs::Metadata::is_file);
        Ok(ConfigItem {
            name: name.to_string(),
            is_default: self.default_config.as_deref() == Some(name),
            exists: meta.is_some(),
            size: meta.as_ref().map(std::fs::Metadata::len),
            modified: meta.and_then(|m| m.modified().ok()).map(epoch_ms),
            path,
        })
    }

    /// Details and contents of an existing config.
    pub async fn read(&self, name: &str) -> Result<ConfigDetail> {
        let item = self.inspect(name).await?;
        if !item.exists {
            return Err(TunnelError::ConfigNotFound(name.to_string()));
        }
        let contents = tokio::fs::read_to_string(&item.path)
            .await
            .map_err(|e| TunnelError::Storage(format!("read {}: {e}", item.path.display())))?;
        Ok(ConfigDetail { item, contents })
    }

    /// Delete config `name` and drop cached listings.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let path = self.resolve_path(name)?;
        if !self.exists(name).await? {
            return Err(TunnelError::ConfigNotFound(name.to_string()));
        }
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| TunnelError::Storage(format!("remove {}: {e}", path.display())))?;
        if let Ok(mut listings) = self.listings.lock() {
            listings.clear();
        }
        debug!("Removed config {}", path.display());
        Ok(())
    }

    /// Cache key: the resolved directory, or the configured path when it
    /// cannot be resolved.
    async fn listing_key(&self) -> PathBuf {
        tokio::fs::canonicalize(&self.dir)
            .await
            .unwrap_or_else(|_| self.dir.clone())
    }

    fn cached(&self, key: &Path, now: u64) -> Option<Vec<String>> {
        let listings = self.listings.lock().ok()?;
        let entry = listings.get(key)?;
        (now.saturating_sub(entry.captured_at) < LISTING_TTL_MS).then(|| entry.names.clone())
    }
}

/// Sorted `*.json` file names in `dir`; empty when unreadable.
async fn scan_dir(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) => {
            debug!("Config directory {} not readable: {e}", dir.display());
            return names;
        }
    };
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(CONFIG_EXTENSION) {
                    continue;
                }
                if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                    continue;
                }
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading {}: {e}", dir.display());
                break;
            }
        }
    }
    names.sort();
    names
}
