//! Persisted guard preference.
//!
//! The toggle lives behind the `PreferenceStore` trait so the monitor and
//! the control surface share one injected store instead of a global.  The
//! guard pipeline only reads it; writes come from the toggle endpoint.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

/// Key under which the enable flag is stored.
pub const ENABLED_KEY: &str = "extensionEnabled";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("preference store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("preference store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Boolean key-value capability backing the guard toggle.
#[async_trait::async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<bool>, StoreError>;
    async fn set(&self, key: &str, value: bool) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardPreference {
    pub enabled: bool,
}

impl Default for GuardPreference {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl GuardPreference {
    /// Read the preference; an absent value means enabled.
    pub async fn load(store: &dyn PreferenceStore) -> Result<Self, StoreError> {
        let enabled = store.get(ENABLED_KEY).await?.unwrap_or(true);
        Ok(Self { enabled })
    }

    pub async fn save(&self, store: &dyn PreferenceStore) -> Result<(), StoreError> {
        store.set(ENABLED_KEY, self.enabled).await
    }
}

#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: RwLock<HashMap<String, bool>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<bool>, StoreError> {
        Ok(self.values.read().await.get(key).copied())
    }

    async fn set(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// JSON object on disk, re-read on every `get` so edits made by another
/// process are picked up.  Writes are serialized and go through a
/// temporary file followed by a rename.
pub struct FilePreferenceStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, bool>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait::async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<bool>, StoreError> {
        Ok(self.read_all().await?.get(key).copied())
    }

    async fn set(&self, key: &str, value: bool) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut values = self.read_all().await?;
        values.insert(key.to_string(), value);
        let body = serde_json::to_vec_pretty(&values)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
