//! Allowlist persistence.
//!
//! The allowlist lives in one of two places:
//! - a host-provided bridge (authoritative on read whenever present)
//! - local persistent storage (always written, read only without a bridge)
//!
//! Every failure here is logged and swallowed: a broken store reads as an
//! empty allowlist and a failed write leaves the previous value in place.

use crate::pattern;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Key holding the JSON array of patterns
pub const STORAGE_KEY: &str = "KPK_ALLOWED_SITES";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage read failed: {0}")]
    Read(String),
    #[error("Storage write failed: {0}")]
    Write(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Local persistent string storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Allowlist storage offered by the embedding host
pub trait HostBridge: Send + Sync {
    /// `Ok(None)` means the host has no list to offer and local storage applies
    fn get_allowed_sites(&self) -> Result<Option<Vec<String>>, StorageError>;
    fn set_allowed_sites(&self, sites: &[String]) -> Result<(), StorageError>;
}

/// JSON object file on disk, one string value per key
pub struct FileKeyValueStore {
    path: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/kpk-overlay/storage.json`
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kpk-overlay")
            .join("storage.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<Map<String, Value>, StorageError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => Ok(map),
            _ => Err(StorageError::Read(format!(
                "{} does not hold a JSON object",
                self.path.display()
            ))),
        }
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let map = self.read_map()?;
        match map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(StorageError::Read(format!(
                "key '{}' holds a non-string value: {}",
                key, other
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut map = match self.read_map() {
            Ok(map) => map,
            Err(e) => {
                warn!("Discarding unreadable storage file {:?}: {}", self.path, e);
                Map::new()
            }
        };
        map.insert(key.to_string(), Value::String(value.to_string()));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&Value::Object(map))?)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!("Wrote key '{}' to {:?}", key, self.path);
        Ok(())
    }
}

/// In-process storage, for tests and embedders without a disk
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Read(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Write(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Host bridge kept in its own key/value store.
///
/// Always offers a list: a missing or undecodable value reads as empty, so a
/// configured bridge stays authoritative.
pub struct KeyValueBridge {
    store: Arc<dyn KeyValueStore>,
}

impl KeyValueBridge {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

impl HostBridge for KeyValueBridge {
    fn get_allowed_sites(&self) -> Result<Option<Vec<String>>, StorageError> {
        let raw = self.store.get(STORAGE_KEY)?;
        let sites = match raw.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                warn!("Host bridge holds an unreadable allowlist: {}", e);
                Vec::new()
            }),
        };
        Ok(Some(sites))
    }

    fn set_allowed_sites(&self, sites: &[String]) -> Result<(), StorageError> {
        self.store.set(STORAGE_KEY, &serde_json::to_string(sites)?)
    }
}

/// The ordered list of allowlist patterns
pub struct AllowlistStore {
    bridge: Option<Arc<dyn HostBridge>>,
    local: Arc<dyn KeyValueStore>,
    /// Used when local storage has never been written
    initial_sites: Option<Vec<String>>,
}

impl AllowlistStore {
    pub fn new(local: Arc<dyn KeyValueStore>) -> Self {
        Self {
            bridge: None,
            local,
            initial_sites: None,
        }
    }

    /// Store backed only by process memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::new()))
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn HostBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_initial_sites(mut self, sites: Option<Vec<String>>) -> Self {
        self.initial_sites = sites;
        self
    }

    pub fn has_bridge(&self) -> bool {
        self.bridge.is_some()
    }

    /// Current allowlist; never fails
    pub fn load(&self) -> Vec<String> {
        if let Some(bridge) = &self.bridge {
            match bridge.get_allowed_sites() {
                Ok(Some(sites)) => return sites,
                Ok(None) => {}
                Err(e) => warn!("Host bridge read failed, using local storage: {}", e),
            }
        }

        match self.read_local() {
            Ok(sites) => sites,
            Err(e) => {
                warn!("Failed to read allowlist, treating as empty: {}", e);
                Vec::new()
            }
        }
    }

    fn read_local(&self) -> Result<Vec<String>, StorageError> {
        match self.local.get(STORAGE_KEY)? {
            Some(raw) if !raw.is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(self.initial_sites.clone().unwrap_or_default()),
        }
    }

    /// Persist the full list to every backend, best-effort
    pub fn save(&self, sites: &[String]) {
        if let Some(bridge) = &self.bridge {
            if let Err(e) = bridge.set_allowed_sites(sites) {
                warn!("Host bridge write failed: {}", e);
            }
        }

        let result = serde_json::to_string(sites)
            .map_err(StorageError::from)
            .and_then(|json| self.local.set(STORAGE_KEY, &json));
        if let Err(e) = result {
            warn!("Failed to write allowlist to local storage: {}", e);
        }
    }

    /// Whether any stored pattern matches the page
    pub fn is_allowed(&self, hostname: &str, current_url: &str) -> bool {
        pattern::matches_any(hostname, current_url, &self.load())
    }

    /// Append a pattern unless it is blank or already present.
    ///
    /// Returns whether the list changed.
    pub fn add(&self, raw: &str) -> bool {
        let value = pattern::normalize(raw);
        if value.is_empty() {
            return false;
        }

        let mut sites = self.load();
        if sites.iter().any(|s| s == value) {
            debug!("Pattern '{}' already allowed", value);
            return false;
        }

        sites.push(value.to_string());
        self.save(&sites);
        info!("Allowed '{}'", value);
        true
    }

    /// Remove the entry at `index`
    pub fn remove_at(&self, index: usize) -> Option<String> {
        let mut sites = self.load();
        if index >= sites.len() {
            return None;
        }

        let removed = sites.remove(index);
        self.save(&sites);
        info!("Removed '{}'", removed);
        Some(removed)
    }

    /// Remove the first literal occurrence of `value`
    pub fn remove(&self, value: &str) -> bool {
        let sites = self.load();
        match sites.iter().position(|s| s == value) {
            Some(index) => self.remove_at(index).is_some(),
            None => false,
        }
    }

    /// Add the suggested pattern for `hostname`; returns it if newly added
    pub fn enable_site(&self, hostname: &str) -> Option<String> {
        let candidate = pattern::quick_enable_candidate(hostname);
        self.add(&candidate).then_some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingBridge;

    impl HostBridge for FailingBridge {
        fn get_allowed_sites(&self) -> Result<Option<Vec<String>>, StorageError> {
            Err(StorageError::Read("bridge offline".to_string()))
        }

        fn set_allowed_sites(&self, _sites: &[String]) -> Result<(), StorageError> {
            Err(StorageError::Write("bridge offline".to_string()))
        }
    }

    struct AbsentBridge;

    impl HostBridge for AbsentBridge {
        fn get_allowed_sites(&self) -> Result<Option<Vec<String>>, StorageError> {
            Ok(None)
        }

        fn set_allowed_sites(&self, _sites: &[String]) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn sites(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_round_trip() {
        let store = AllowlistStore::in_memory();
        let list = sites(&["example.com", "*.news.org", "http://x.com/path"]);

        store.save(&list);
        assert_eq!(store.load(), list);

        store.save(&store.load());
        assert_eq!(store.load(), list);
    }

    #[test]
    fn test_empty_by_default() {
        let store = AllowlistStore::in_memory();
        assert!(store.load().is_empty());
        assert!(!store.is_allowed("example.com", "https://example.com/"));
    }

    #[test]
    fn test_initial_sites_until_first_write() {
        let store = AllowlistStore::in_memory().with_initial_sites(Some(sites(&["seed.com"])));
        assert_eq!(store.load(), sites(&["seed.com"]));

        store.save(&[]);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_corrupt_local_reads_empty() {
        let local = Arc::new(MemoryKeyValueStore::new());
        local.set(STORAGE_KEY, "{not json").unwrap();

        let store = AllowlistStore::new(local).with_initial_sites(Some(sites(&["seed.com"])));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_bridge_is_authoritative() {
        let local = Arc::new(MemoryKeyValueStore::new());
        local
            .set(STORAGE_KEY, r#"["local-only.com"]"#)
            .unwrap();

        let bridge_store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let bridge = Arc::new(KeyValueBridge::new(bridge_store.clone()));
        let store = AllowlistStore::new(local.clone()).with_bridge(bridge);

        // Bridge with nothing stored still wins over local storage
        assert!(store.load().is_empty());

        assert!(store.add("example.com"));
        assert_eq!(store.load(), sites(&["example.com"]));

        // Both backends were written
        assert_eq!(
            bridge_store.get(STORAGE_KEY).unwrap().as_deref(),
            Some(r#"["example.com"]"#)
        );
        assert_eq!(
            local.get(STORAGE_KEY).unwrap().as_deref(),
            Some(r#"["example.com"]"#)
        );
    }

    #[test]
    fn test_failing_bridge_falls_back_to_local() {
        let store = AllowlistStore::in_memory().with_bridge(Arc::new(FailingBridge));

        assert!(store.add("example.com"));
        assert_eq!(store.load(), sites(&["example.com"]));
        assert!(store.is_allowed("www.example.com", "https://www.example.com/"));
    }

    #[test]
    fn test_absent_bridge_defers_to_local() {
        let store = AllowlistStore::in_memory()
            .with_bridge(Arc::new(AbsentBridge))
            .with_initial_sites(Some(sites(&["seed.com"])));
        assert!(store.has_bridge());
        assert_eq!(store.load(), sites(&["seed.com"]));
    }

    #[test]
    fn test_add_normalizes_and_dedups() {
        let store = AllowlistStore::in_memory();

        assert!(store.add("  example.com "));
        assert!(!store.add("example.com"));
        assert!(!store.add("   "));
        assert!(store.add("*.example.com"));

        assert_eq!(store.load(), sites(&["example.com", "*.example.com"]));
    }

    #[test]
    fn test_remove() {
        let store = AllowlistStore::in_memory();
        store.save(&sites(&["a.com", "b.com", "c.com"]));

        assert_eq!(store.remove_at(1), Some("b.com".to_string()));
        assert_eq!(store.remove_at(5), None);
        assert!(store.remove("c.com"));
        assert!(!store.remove("c.com"));
        assert_eq!(store.load(), sites(&["a.com"]));
    }

    #[test]
    fn test_enable_site() {
        let store = AllowlistStore::in_memory();

        assert_eq!(
            store.enable_site("news.example.com"),
            Some("*.example.com".to_string())
        );
        assert_eq!(store.enable_site("news.example.com"), None);
        assert!(store.is_allowed("news.example.com", "https://news.example.com/"));
        assert!(!store.is_allowed("example.com", "https://example.com/"));
    }

    #[test]
    fn test_spec_scenarios() {
        let store = AllowlistStore::in_memory();

        store.save(&sites(&["example.com"]));
        assert!(store.is_allowed("www.example.com", "https://www.example.com/"));

        store.save(&sites(&["*.example.com"]));
        assert!(!store.is_allowed("example.com", "https://example.com/"));

        store.save(&sites(&["http://x.com/path"]));
        assert!(store.is_allowed("x.com", "http://x.com/path?q=1"));
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");
        let local = Arc::new(FileKeyValueStore::new(&path));

        let store = AllowlistStore::new(local.clone());
        assert!(store.load().is_empty());

        store.save(&sites(&["example.com", "*.b.org"]));
        assert!(path.exists());

        // A fresh store over the same file sees the same list
        let reopened = AllowlistStore::new(Arc::new(FileKeyValueStore::new(&path)));
        assert_eq!(reopened.load(), sites(&["example.com", "*.b.org"]));

        // Other keys in the file survive
        local.set("other", "value").unwrap();
        assert_eq!(reopened.load(), sites(&["example.com", "*.b.org"]));
        assert_eq!(local.get("other").unwrap().as_deref(), Some("value"));
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "garbage").unwrap();

        let local = Arc::new(FileKeyValueStore::new(&path));
        assert!(local.get(STORAGE_KEY).is_err());

        let store = AllowlistStore::new(local);
        assert!(store.load().is_empty());

        // Writing replaces the unreadable file
        assert!(store.add("example.com"));
        assert_eq!(store.load(), sites(&["example.com"]));
    }
}
