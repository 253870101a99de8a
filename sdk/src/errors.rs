//! Error types and handling
//!
//! This module provides the single error type shared by every vplug crate.
//! All errors implement the `InstallerErrorExt` trait which provides user-friendly
//! hints, the taxonomy category, and whether the error may be downgraded to a
//! warning by the pipeline.
//!
//! # Security
//!
//! Error messages never embed tokens or SSH secrets. Collaborator messages
//! (control plane, remote hosts) are carried verbatim so operators see exactly
//! what the remote side said.

use thiserror::Error;

/// Result alias used across the workspace
pub type Result<T> = std::result::Result<T, InstallerError>;

/// Trait for vplug error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information.
pub trait InstallerErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors are downgraded to a warning by the deploy step.
    /// Memory-lock failures are downgraded there regardless of kind.
    fn is_recoverable(&self) -> bool;

    /// Returns the taxonomy bucket of the error
    fn category(&self) -> ErrorCategory;
}

/// Error taxonomy buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid or incomplete declarative configuration
    Configuration,
    /// Control-plane or transport reachability and authorization
    Connectivity,
    /// Release lookup, download, archive and checksum problems
    Artifact,
    /// Desired state conflicts with state the tool does not own
    Reconciliation,
    /// Signals raised by remote hosts during deployment
    Remote,
    /// Plugin-specific configure/check failures
    Plugin,
}

/// Main installer error type
///
/// # Error Categories
///
/// - **Configuration**: blank fields, exclusive blocks, unknown plugin types, expressions
/// - **Connectivity**: normalized control-plane and transport errors
/// - **Artifact**: release resolution, download and integrity failures
/// - **Reconciliation**: mount path conflicts
/// - **Remote**: remote host file signals
/// - **Plugin**: plugin configure/check mismatches
///
/// # Examples
///
/// ```
/// use sdk::errors::{ErrorCategory, InstallerError, InstallerErrorExt};
///
/// let error = InstallerError::FileBusy("/etc/vault/plugins/pki-backend_pki".into());
/// assert!(error.is_recoverable());
///
/// let fatal = InstallerError::MountPathInUse {
///     path: "pki".into(),
///     existing: "kv".into(),
/// };
/// assert!(!fatal.is_recoverable());
/// assert_eq!(fatal.category(), ErrorCategory::Reconciliation);
/// ```
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstallerError {
    // Configuration errors
    #[error("Malformed configuration: {0}")]
    MalformedConfig(String),

    #[error("Required field is blank: {0}")]
    BlankField(String),

    #[error("Exactly one of '{first}' or '{second}' must be set")]
    MutuallyExclusive { first: String, second: String },

    #[error("Unknown plugin type '{type_name}'. Supported: {supported}")]
    PluginTypeUnknown { type_name: String, supported: String },

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Environment variable missing or empty: {0}")]
    EnvVarMissing(String),

    #[error("Expression function '{0}()' is not bound yet")]
    ExpressionUnbound(String),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Secret field '{field}' not found at '{path}'")]
    SecretFieldMissing { path: String, field: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Connectivity errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("TLS mismatch: {0}")]
    TlsMismatch(String),

    #[error("Control plane error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    ControlPlane { status: Option<u16>, message: String },

    // Artifact errors
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Version not found: {0}")]
    VersionNotFound(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    // Reconciliation errors
    #[error("Mount path '{path}' is already in use by '{existing}'")]
    MountPathInUse { path: String, existing: String },

    #[error("Nothing mounted at '{0}'")]
    PluginNotMounted(String),

    #[error("Plugin directory is not configured on the control plane")]
    DirectoryNotConfigured,

    // Remote host errors
    #[error("File busy: {0}")]
    FileBusy(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Remote host error: {0}")]
    Remote(String),

    // Plugin errors
    #[error("Check failed: {0}")]
    CheckFailed(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for InstallerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl InstallerErrorExt for InstallerError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::MalformedConfig(_) => "The config must contain a [target] table with address and token",
            Self::BlankField(_) => "Fill in the named field in your config",
            Self::MutuallyExclusive { .. } => "Keep exactly one of the two blocks",
            Self::PluginTypeUnknown { .. } | Self::PluginNotFound(_) => {
                "Run 'vplug plugins' to list supported plugin types"
            }
            Self::EnvVarMissing(_) => "Export the variable before running vplug",
            Self::ExpressionUnbound(_) => "secret() can only be used after the control plane is reachable",
            Self::InvalidExpression(_) => "Expressions look like ${env(\"NAME\")} or ${secret(\"path\", \"field\")}",
            Self::SecretFieldMissing { .. } => "Check the secret path and field name",
            Self::InvalidConfig(_) => "Check your config.toml file for errors",

            // Connectivity errors
            Self::Unauthorized(_) => "Check that the token is valid and has the required policies",
            Self::NotFound(_) => "The requested control-plane resource does not exist",
            Self::ServiceUnavailable(_) => "The control plane is sealed or unavailable",
            Self::InvalidAddress(_) => "Check the control-plane address and network reachability",
            Self::TlsMismatch(_) => "The address scheme does not match the server (http vs https)",
            Self::ControlPlane { .. } => "The control plane rejected the request",

            // Artifact errors
            Self::DownloadFailed(_) => "Download failed. Check your network and the release URL",
            Self::MalformedArchive(_) => "The release archive must hold one binary and one SHA256SUM file",
            Self::ChecksumMismatch { .. } => "Security verification failed. File may be corrupted or tampered",
            Self::VersionNotFound(_) => "Check the plugin version against the published releases",
            Self::AssetNotFound(_) => "No release asset matches this platform or build_arch",

            // Reconciliation errors
            Self::MountPathInUse { .. } => "Pick another mount_path or unmount the existing backend manually",
            Self::PluginNotMounted(_) => "The mount path is free",
            Self::DirectoryNotConfigured => "Set plugin_directory in the control-plane server config",

            // Remote host errors
            Self::FileBusy(_) => "The plugin binary is in use; the running copy was left in place",
            Self::PermissionDenied(_) => "The SSH user cannot write to the plugin directory",
            Self::Remote(_) => "Remote host operation failed",

            // Plugin errors
            Self::CheckFailed(_) => "Declared plugin configuration differs from the control plane",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::FileBusy(_))
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedConfig(_)
            | Self::BlankField(_)
            | Self::MutuallyExclusive { .. }
            | Self::PluginTypeUnknown { .. }
            | Self::PluginNotFound(_)
            | Self::EnvVarMissing(_)
            | Self::ExpressionUnbound(_)
            | Self::InvalidExpression(_)
            | Self::SecretFieldMissing { .. }
            | Self::InvalidConfig(_)
            | Self::Io(_) => ErrorCategory::Configuration,

            Self::Unauthorized(_)
            | Self::NotFound(_)
            | Self::ServiceUnavailable(_)
            | Self::InvalidAddress(_)
            | Self::TlsMismatch(_)
            | Self::ControlPlane { .. } => ErrorCategory::Connectivity,

            Self::DownloadFailed(_)
            | Self::MalformedArchive(_)
            | Self::ChecksumMismatch { .. }
            | Self::VersionNotFound(_)
            | Self::AssetNotFound(_) => ErrorCategory::Artifact,

            Self::MountPathInUse { .. } | Self::PluginNotMounted(_) | Self::DirectoryNotConfigured => {
                ErrorCategory::Reconciliation
            }

            Self::FileBusy(_) | Self::PermissionDenied(_) | Self::Remote(_) => ErrorCategory::Remote,

            Self::CheckFailed(_) => ErrorCategory::Plugin,
        }
    }
}
