//! Plugin implementation trait
//!
//! Every plugin type the installer knows about implements this trait. The
//! registry hands out a fresh, empty instance per declared plugin; the config
//! resolver then calls `parse` and `validate` on it, and the pipeline later
//! drives `resolve_download_url`, `configure` and `check`.

use async_trait::async_trait;

use crate::control_plane::ControlPlane;
use crate::errors::Result;
use crate::expr::ExprContext;
use crate::release::ReleaseIndex;
use crate::report::Section;
use crate::types::ResolvedRelease;

/// What a plugin needs to talk to the control plane while configuring
pub struct PluginContext<'a> {
    pub control_plane: &'a dyn ControlPlane,
    pub mount_path: &'a str,
    /// Report section of the plugin being processed
    pub section: &'a dyn Section,
}

impl<'a> PluginContext<'a> {
    pub fn new(
        control_plane: &'a dyn ControlPlane,
        mount_path: &'a str,
        section: &'a dyn Section,
    ) -> Self {
        Self {
            control_plane,
            mount_path,
            section,
        }
    }

    /// Join `suffix` onto the mount path
    pub fn path(&self, suffix: &str) -> String {
        format!(
            "{}/{}",
            self.mount_path.trim_end_matches('/'),
            suffix.trim_start_matches('/')
        )
    }
}

/// Trait that all plugin types must implement
#[async_trait]
pub trait PluginImplementation: Send + Sync + std::fmt::Debug {
    /// Registry name of the plugin type
    fn type_name(&self) -> &'static str;

    /// Consume the plugin-specific configuration body
    ///
    /// Expressions inside the body are evaluated with `ctx`.
    async fn parse(&mut self, body: toml::Value, ctx: &ExprContext) -> Result<()>;

    /// Check the parsed configuration for consistency
    fn validate(&self) -> Result<()>;

    /// Find where to download the plugin binary
    async fn resolve_download_url(
        &self,
        releases: &dyn ReleaseIndex,
        version: &str,
        build_arch: Option<&str>,
    ) -> Result<ResolvedRelease>;

    /// Push the declared configuration to the control plane
    async fn configure(&self, ctx: &PluginContext<'_>) -> Result<()>;

    /// Verify the control plane matches the declared configuration
    ///
    /// Must not mutate remote state.
    async fn check(&self, ctx: &PluginContext<'_>) -> Result<()>;
}

/// Release asset for the running platform, or `{build_arch}.zip` when overridden
pub fn asset_substring(build_arch: Option<&str>) -> String {
    match build_arch {
        Some(arch) if !arch.trim().is_empty() => format!("{}.zip", arch.trim()),
        _ => {
            if cfg!(target_os = "linux") {
                "linux.zip".to_string()
            } else if cfg!(target_os = "macos") {
                "darwin.zip".to_string()
            } else {
                "windows.zip".to_string()
            }
        }
    }
}
