//! Run results

use sdk::errors::InstallerError;
use serde::Serialize;
use std::fmt;

/// Pipeline steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Preflight,
    Download,
    Deploy,
    Enable,
    Mount,
    Configure,
    Check,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Preflight => "preflight",
            Step::Download => "download",
            Step::Deploy => "deploy",
            Step::Enable => "enable",
            Step::Mount => "mount",
            Step::Configure => "configure",
            Step::Check => "check",
        };
        f.write_str(name)
    }
}

/// What the enable step did to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationAction {
    /// No entry existed; registered without reload
    Registered,
    /// Entry already matched
    Unchanged,
    /// Entry differed; registered and reloaded once
    Updated,
}

/// What the mount step did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountAction {
    Mounted,
    Unchanged,
}

/// Result of one plugin spec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginOutcome {
    pub type_name: String,
    pub mount_path: String,
    pub version: Option<String>,
    pub digest: Option<String>,
    pub registration: Option<RegistrationAction>,
    pub mount: Option<MountAction>,
    pub hosts_deployed: usize,
    pub warnings: Vec<String>,
    pub checked: bool,
}

impl PluginOutcome {
    pub fn new(type_name: &str, mount_path: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            mount_path: mount_path.to_string(),
            ..Default::default()
        }
    }
}

/// The fatal error that stopped a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub type_name: String,
    pub mount_path: String,
    pub step: Step,
    pub error: InstallerError,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at '{}' failed during {}: {}",
            self.type_name, self.mount_path, self.step, self.error
        )
    }
}

/// Everything a run did, up to the first fatal error
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// One entry per plugin that was started, in declaration order
    pub plugins: Vec<PluginOutcome>,
    pub failure: Option<Failure>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn warning_count(&self) -> usize {
        self.plugins.iter().map(|p| p.warnings.len()).sum()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": self.is_success(),
            "plugins": self.plugins,
            "failure": self.failure.as_ref().map(|f| serde_json::json!({
                "type": f.type_name,
                "mount_path": f.mount_path,
                "step": f.step,
                "error": f.error.to_string(),
            })),
        })
    }
}
