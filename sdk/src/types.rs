//! Shared data model types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::secret::SecretString;

/// Plugin catalog entry as seen by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub command: String,
    #[serde(rename = "sha256")]
    pub digest: String,
}

impl CatalogEntry {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            digest: digest.into(),
        }
    }

    /// Whether `other` describes the same binary under the same command
    pub fn matches(&self, other: &CatalogEntry) -> bool {
        self.command == other.command && self.digest == other.digest
    }
}

/// Server-side settings the pipeline depends on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    /// Directory the control plane loads plugin binaries from
    pub plugin_directory: Option<String>,
    /// True when the control plane runs with memory locking disabled
    pub mlock_disabled: bool,
}

/// A verified plugin binary
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub binary: Vec<u8>,
    /// Lowercase SHA-256 hex digest of `binary`
    pub digest: String,
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("len", &self.binary.len())
            .field("digest", &self.digest)
            .finish()
    }
}

/// Download location chosen from a release index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelease {
    pub url: String,
    pub version: String,
}

/// SSH endpoint of a host running the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshEndpoint {
    pub host: String,
    pub user: String,
    /// Private key file used to authenticate
    pub secret: SecretString,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

impl fmt::Display for SshEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

fn default_ssh_port() -> u16 {
    22
}

/// Catalog name of a plugin type. Also the backend type it is mounted with.
pub fn canonical_name(type_name: &str) -> String {
    type_name.to_string()
}

/// File name a plugin binary is deployed under, unique per type and mount path
///
/// ```
/// assert_eq!(sdk::types::canonical_file_name("pki-backend", "/certs/int/"), "pki-backend_certs_int");
/// ```
pub fn canonical_file_name(type_name: &str, mount_path: &str) -> String {
    let mount = mount_path.trim_matches('/').replace('/', "_");
    format!("{}_{}", type_name, mount)
}
