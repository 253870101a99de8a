//! Control-plane client contract
//!
//! The pipeline and plugins only talk to the control plane through this trait.
//! Implementations must return normalized errors: `NotFound` for a missing
//! catalog entry, `PluginNotMounted` for a free mount path, `MountPathInUse`
//! when a mount is refused, and so on. Callers branch on those kinds.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::Result;
use crate::types::{CatalogEntry, ServerConfig};

/// Key/value payload read from or written to a control-plane path
pub type PathData = Map<String, Value>;

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Read server settings (plugin directory, memory locking)
    async fn read_config(&self) -> Result<ServerConfig>;

    /// Whether the server runs with memory locking disabled
    async fn is_memory_lock_disabled(&self) -> Result<bool> {
        Ok(self.read_config().await?.mlock_disabled)
    }

    /// Fetch the catalog entry registered under `name`
    ///
    /// Returns `InstallerError::NotFound` when nothing is registered.
    async fn get_catalog_entry(&self, name: &str) -> Result<CatalogEntry>;

    /// Register or overwrite a catalog entry
    async fn register_plugin(&self, entry: &CatalogEntry) -> Result<()>;

    /// Reload every running instance of the named plugin
    async fn reload_plugin(&self, name: &str) -> Result<()>;

    /// Backend type currently mounted at `path`
    ///
    /// Returns `InstallerError::PluginNotMounted` when the path is free.
    async fn mount_backend_type(&self, path: &str) -> Result<String>;

    /// Mount `backend_type` at `path`
    async fn mount(&self, path: &str, backend_type: &str) -> Result<()>;

    /// Write `data` to a logical path, returning the response payload if any
    async fn write_path(&self, path: &str, data: &PathData) -> Result<Option<PathData>>;

    /// Read a logical path
    async fn read_path(&self, path: &str) -> Result<PathData>;
}
