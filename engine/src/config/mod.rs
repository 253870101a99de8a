//! Configuration resolution
//!
//! The installer is driven by one TOML document:
//!
//! ```toml
//! [target]
//! address = "https://vault.internal:8200"
//! token = '${env("VAULT_TOKEN")}'
//!
//! [[target.ssh]]
//! host = "10.0.0.5"
//! user = "vault"
//! secret = "~/.ssh/vault_deploy"
//!
//! [[plugin]]
//! type = "pki-backend"
//! mount_path = "pki"
//! version = "v0.9.0"
//!
//! [plugin.config]
//! # plugin specific body
//! ```
//!
//! # Two stages
//!
//! Values may contain `${env("NAME")}` and `${secret("path", "field")}`.
//! `secret()` reads from the very control plane being configured, so the
//! document is decoded twice:
//!
//! 1. [`ConfigResolver::bootstrap`] decodes only `target.address` and
//!    `target.token`, with `env()` available.
//! 2. The caller builds a client from those values and hands it to
//!    [`ConfigResolver::bind_control_plane`].
//! 3. [`ConfigResolver::get_config`] decodes everything, dispatching each
//!    `[plugin.config]` body to the implementation the registry builds for
//!    its type.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use vplug_engine::config::{self, ConfigResolver};
//! use vplug_engine::control_plane::HttpControlPlane;
//! use vplug_engine::registry::PluginRegistry;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = PluginRegistry::builtin();
//! let text = config::read_document(&config::default_config_path()?)?;
//! let mut resolver = ConfigResolver::from_str(&text, &registry)?;
//!
//! let target = resolver.bootstrap().await?;
//! let client = HttpControlPlane::new(&target.address, target.token, target.tls_skip_verify)?;
//! resolver.bind_control_plane(Arc::new(client));
//!
//! let config = resolver.get_config().await?;
//! println!("{} plugin(s)", config.plugins.len());
//! # Ok(())
//! # }
//! ```

use sdk::control_plane::ControlPlane;
use sdk::errors::{InstallerError, Result};
use sdk::expr::ExprContext;
use sdk::plugin::PluginImplementation;
use sdk::secret::SecretString;
use sdk::types::SshEndpoint;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::registry::PluginRegistry;

/// Values decoded by the first stage
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapTarget {
    pub address: String,
    pub token: SecretString,
    #[serde(default)]
    pub tls_skip_verify: bool,
}

#[derive(Deserialize)]
struct BootstrapDocument {
    target: BootstrapTarget,
}

/// Control plane being configured, with the hosts it runs on
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlPlaneTarget {
    pub address: String,
    pub token: SecretString,
    #[serde(default)]
    pub tls_skip_verify: bool,
    #[serde(default)]
    pub ssh: Vec<SshEndpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PluginHeader {
    #[serde(rename = "type", default)]
    type_name: String,
    #[serde(default)]
    mount_path: String,
    #[serde(default)]
    version: String,
    build_arch: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    target: ControlPlaneTarget,
    #[serde(default)]
    plugin: Vec<PluginHeader>,
}

/// One declared plugin with its parsed and validated implementation
pub struct PluginSpec {
    pub type_name: String,
    pub mount_path: String,
    /// Release tag; empty selects the latest release
    pub version: String,
    pub build_arch: Option<String>,
    pub implementation: Box<dyn PluginImplementation>,
}

impl fmt::Debug for PluginSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSpec")
            .field("type_name", &self.type_name)
            .field("mount_path", &self.mount_path)
            .field("version", &self.version)
            .field("build_arch", &self.build_arch)
            .finish()
    }
}

impl PluginSpec {
    /// Version for display, `latest` when unpinned
    pub fn version_label(&self) -> &str {
        if self.version.is_empty() {
            "latest"
        } else {
            &self.version
        }
    }
}

/// Fully validated configuration
#[derive(Debug)]
pub struct Configuration {
    pub target: ControlPlaneTarget,
    pub plugins: Vec<PluginSpec>,
}

/// Two-stage decoder of the configuration document
pub struct ConfigResolver<'r> {
    document: toml::Table,
    registry: &'r PluginRegistry,
    ctx: ExprContext,
}

impl<'r> ConfigResolver<'r> {
    /// Parse the document text; nothing is evaluated yet
    pub fn from_str(text: &str, registry: &'r PluginRegistry) -> Result<Self> {
        let document: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| InstallerError::MalformedConfig(e.message().to_string()))?;

        Ok(Self {
            document,
            registry,
            ctx: ExprContext::new(),
        })
    }

    /// Stage one: decode the control-plane address and token
    ///
    /// Only `env()` is available here.
    pub async fn bootstrap(&self) -> Result<BootstrapTarget> {
        let target = self
            .document
            .get("target")
            .and_then(toml::Value::as_table)
            .ok_or_else(|| InstallerError::MalformedConfig("missing [target] table".to_string()))?;

        let mut subset = toml::Table::new();
        for key in ["address", "token", "tls_skip_verify"] {
            if let Some(value) = target.get(key) {
                subset.insert(key.to_string(), value.clone());
            }
        }
        let mut wrapper = toml::Table::new();
        wrapper.insert("target".to_string(), toml::Value::Table(subset));

        let evaluated = ExprContext::new()
            .evaluate_value(toml::Value::Table(wrapper))
            .await?;
        let decoded: BootstrapDocument = evaluated
            .try_into()
            .map_err(|e: toml::de::Error| InstallerError::MalformedConfig(e.message().to_string()))?;

        let target = decoded.target;
        require("target.address", &target.address)?;
        if target.token.is_blank() {
            return Err(InstallerError::BlankField("target.token".to_string()));
        }
        debug!("Bootstrap target: {}", target.address);
        Ok(target)
    }

    /// Make `secret()` available for the second stage
    pub fn bind_control_plane(&mut self, control_plane: Arc<dyn ControlPlane>) {
        self.ctx.bind_control_plane(control_plane);
    }

    /// Stage two: decode and validate the whole document
    ///
    /// Returns a complete configuration or the first error; never a partial one.
    pub async fn get_config(&self) -> Result<Configuration> {
        let mut document = self.document.clone();
        let bodies = take_plugin_bodies(&mut document)?;

        let evaluated = self.ctx.evaluate_value(toml::Value::Table(document)).await?;
        let decoded: Document = evaluated
            .try_into()
            .map_err(|e: toml::de::Error| InstallerError::MalformedConfig(e.message().to_string()))?;

        let target = validate_target(decoded.target)?;

        if decoded.plugin.is_empty() {
            return Err(InstallerError::InvalidConfig(
                "at least one [[plugin]] must be declared".to_string(),
            ));
        }

        let mut mounts = HashSet::new();
        let mut plugins = Vec::with_capacity(decoded.plugin.len());
        for (header, body) in decoded.plugin.into_iter().zip(bodies) {
            let spec = self.resolve_plugin(header, body).await?;
            if !mounts.insert(spec.mount_path.clone()) {
                return Err(InstallerError::InvalidConfig(format!(
                    "mount path '{}' is declared twice",
                    spec.mount_path
                )));
            }
            plugins.push(spec);
        }

        info!(
            "Resolved configuration: {} plugin(s), {} SSH endpoint(s)",
            plugins.len(),
            target.ssh.len()
        );
        Ok(Configuration { target, plugins })
    }

    async fn resolve_plugin(&self, header: PluginHeader, body: toml::Value) -> Result<PluginSpec> {
        require("plugin.type", &header.type_name)?;
        let mount_path = header.mount_path.trim().trim_matches('/').to_string();
        require("plugin.mount_path", &mount_path)?;
        validate_version(&header.version)?;

        let mut implementation = self.registry.lookup(&header.type_name).map_err(|_| {
            InstallerError::PluginTypeUnknown {
                type_name: header.type_name.clone(),
                supported: self.registry.supported_types().join(", "),
            }
        })?;

        implementation.parse(body, &self.ctx).await?;
        implementation.validate()?;
        debug!("Parsed {} at {}", header.type_name, mount_path);

        Ok(PluginSpec {
            type_name: header.type_name,
            mount_path,
            version: header.version.trim().to_string(),
            build_arch: header
                .build_arch
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
            implementation,
        })
    }
}

/// Remove each `[plugin.config]` body so the resolver never evaluates it
fn take_plugin_bodies(document: &mut toml::Table) -> Result<Vec<toml::Value>> {
    let Some(plugins) = document.get_mut("plugin") else {
        return Ok(Vec::new());
    };
    let plugins = plugins.as_array_mut().ok_or_else(|| {
        InstallerError::MalformedConfig("'plugin' must be an array of tables".to_string())
    })?;

    plugins
        .iter_mut()
        .map(|plugin| {
            let table = plugin.as_table_mut().ok_or_else(|| {
                InstallerError::MalformedConfig("'plugin' entries must be tables".to_string())
            })?;
            Ok(table
                .remove("config")
                .unwrap_or_else(|| toml::Value::Table(toml::Table::new())))
        })
        .collect()
}

fn validate_target(mut target: ControlPlaneTarget) -> Result<ControlPlaneTarget> {
    require("target.address", &target.address)?;
    if target.token.is_blank() {
        return Err(InstallerError::BlankField("target.token".to_string()));
    }

    for (index, endpoint) in target.ssh.iter_mut().enumerate() {
        require(&format!("target.ssh[{}].host", index), &endpoint.host)?;
        require(&format!("target.ssh[{}].user", index), &endpoint.user)?;
        if endpoint.secret.is_blank() {
            return Err(InstallerError::BlankField(format!(
                "target.ssh[{}].secret",
                index
            )));
        }
        if endpoint.port == 0 {
            return Err(InstallerError::InvalidConfig(format!(
                "target.ssh[{}].port must be non-zero",
                index
            )));
        }
        let key = expand_path(Path::new(endpoint.secret.unsecure()))?;
        endpoint.secret = SecretString::new(key.to_string_lossy());
    }

    Ok(target)
}

/// Accept `vX.Y.Z`, `X.Y.Z` or empty
fn validate_version(version: &str) -> Result<()> {
    let version = version.trim();
    if version.is_empty() {
        return Ok(());
    }
    let bare = version.strip_prefix('v').unwrap_or(version);
    semver::Version::parse(bare).map_err(|e| {
        InstallerError::InvalidConfig(format!("invalid plugin version '{}': {}", version, e))
    })?;
    Ok(())
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(InstallerError::BlankField(field.to_string()));
    }
    Ok(())
}

/// Default location of the configuration document (`~/.vplug/config.toml`)
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| {
        InstallerError::InvalidConfig("Could not determine home directory".to_string())
    })?;
    Ok(home.join(".vplug").join("config.toml"))
}

/// Read the document at `path`
pub fn read_document(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        InstallerError::MalformedConfig(format!("Failed to read {}: {}", path.display(), e))
    })
}

/// Expand a leading `~` to the user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| InstallerError::InvalidConfig("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            InstallerError::InvalidConfig("Could not determine home directory".to_string())
        })?;
        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir().ok_or_else(|| {
            InstallerError::InvalidConfig("Could not determine home directory".to_string())
        })
    } else {
        Ok(path.to_path_buf())
    }
}
