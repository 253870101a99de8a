//! vplug SDK
//!
//! Shared library providing the error taxonomy, data model and collaborator
//! traits for vplug components. This crate is used by the engine, the artifact
//! crate and every plugin implementation.

/// Error types and handling
pub mod errors;

/// Redacting string wrapper for tokens and keys
pub mod secret;

/// Shared data model types
pub mod types;

/// Control-plane client trait
pub mod control_plane;

/// Remote host traits
pub mod remote;

/// Release index and artifact fetcher traits
pub mod release;

/// Reporting sink traits
pub mod report;

/// Configuration expression evaluation
pub mod expr;

/// Plugin implementation trait
pub mod plugin;

// Re-export commonly used types
pub use control_plane::{ControlPlane, PathData};
pub use errors::{ErrorCategory, InstallerError, InstallerErrorExt, Result};
pub use expr::ExprContext;
pub use plugin::{PluginContext, PluginImplementation};
pub use release::{ArtifactFetcher, ReleaseIndex};
pub use remote::{HostConnector, RemoteSession};
pub use report::{Check, Reporter, Section};
pub use secret::SecretString;
pub use types::{Artifact, CatalogEntry, ResolvedRelease, ServerConfig, SshEndpoint};
