//! Per-plugin configuration storage
//!
//! Each plugin may persist one JSON blob keyed by its identifier. The blob is
//! handed to the plugin in its `PluginContext` when it is loaded.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Directory under the data dir holding plugin configuration files
const STORE_DIR: &str = "plugin-config";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error for plugin '{plugin_id}': {source}")]
    Io {
        plugin_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored configuration for plugin '{plugin_id}' is not valid JSON: {source}")]
    Corrupt {
        plugin_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted per-plugin configuration blobs
pub trait PluginConfigStore: Send + Sync {
    /// Fetch the blob for `plugin_id`, `None` when nothing is stored
    fn get(&self, plugin_id: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the blob for `plugin_id`
    fn put(&self, plugin_id: &str, value: &Value) -> Result<(), StoreError>;

    /// Delete the blob for `plugin_id`; deleting a missing blob succeeds
    fn remove(&self, plugin_id: &str) -> Result<(), StoreError>;
}

/// Stores each blob as `<data_dir>/plugin-config/<id>.json`
pub struct FileConfigStore {
    root: PathBuf,
}

impl FileConfigStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join(STORE_DIR),
        }
    }

    fn path_for(&self, plugin_id: &str) -> PathBuf {
        // Descriptor ids are restricted to [A-Za-z0-9._-], so no separators
        self.root.join(format!("{}.json", plugin_id))
    }
}

impl PluginConfigStore for FileConfigStore {
    fn get(&self, plugin_id: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(plugin_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    plugin_id: plugin_id.to_string(),
                    source,
                })
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                plugin_id: plugin_id.to_string(),
                source,
            })
    }

    fn put(&self, plugin_id: &str, value: &Value) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            plugin_id: plugin_id.to_string(),
            source,
        };

        std::fs::create_dir_all(&self.root).map_err(io_err)?;

        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Corrupt {
            plugin_id: plugin_id.to_string(),
            source,
        })?;

        // Write to a sibling then rename so readers never see a partial blob
        let path = self.path_for(plugin_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)?;

        tracing::debug!(plugin_id, "Stored plugin configuration");
        Ok(())
    }

    fn remove(&self, plugin_id: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(plugin_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                plugin_id: plugin_id.to_string(),
                source,
            }),
        }
    }
}

/// In-memory store for embedding hosts and tests
#[derive(Default)]
pub struct MemoryConfigStore {
    blobs: RwLock<HashMap<String, Value>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PluginConfigStore for MemoryConfigStore {
    fn get(&self, plugin_id: &str) -> Result<Option<Value>, StoreError> {
        let blobs = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.get(plugin_id).cloned())
    }

    fn put(&self, plugin_id: &str, value: &Value) -> Result<(), StoreError> {
        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        blobs.insert(plugin_id.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, plugin_id: &str) -> Result<(), StoreError> {
        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        blobs.remove(plugin_id);
        Ok(())
    }
}
