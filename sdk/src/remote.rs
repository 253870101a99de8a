//! Remote host contract used by the deploy step

use async_trait::async_trait;

use crate::errors::Result;
use crate::types::SshEndpoint;

/// Opens sessions to remote hosts
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn connect(&self, endpoint: &SshEndpoint) -> Result<Box<dyn RemoteSession>>;
}

/// An open, exclusively owned session to one host
///
/// Write failures are normalized: `FileBusy` when the target is in use,
/// `PermissionDenied` and `NotFound` for the matching file system signals.
#[async_trait]
pub trait RemoteSession: Send {
    /// Human readable identity of the remote end
    fn describe(&self) -> String;

    /// Write `contents` to `path`, replacing any existing file
    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<()>;

    async fn file_exists(&mut self, path: &str) -> Result<bool>;

    /// Grant the memory-lock capability to the binary at `path`
    async fn grant_memory_lock(&mut self, path: &str) -> Result<()>;

    /// Whether the binary at `path` already holds the memory-lock capability
    async fn has_memory_lock(&mut self, path: &str) -> Result<bool>;

    async fn close(self: Box<Self>) -> Result<()>;
}
