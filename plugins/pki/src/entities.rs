//! Configuration entities shared by the PKI plugins
//!
//! A plugin body declares one credentials secret, one or more roles and, for
//! the monitor, an enforcement policy. Each entity knows how to validate
//! itself, which control-plane path it lives at, and which of its fields can
//! be read back for verification.

use sdk::control_plane::PathData;
use sdk::errors::{InstallerError, Result};
use sdk::plugin::PluginContext;
use sdk::secret::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info};

const STORE_BY_VALUES: [&str; 2] = ["serial", "hash"];

/// Credentials the plugin uses to reach the certificate authority
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SecretSpec {
    #[serde(default)]
    pub name: String,
    pub cloud: Option<CloudConnection>,
    pub platform: Option<PlatformConnection>,
}

/// Hosted certificate service
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CloudConnection {
    #[serde(default)]
    pub api_key: SecretString,
    #[serde(default)]
    pub zone: String,
    pub url: Option<String>,
}

/// Self-hosted certificate platform
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PlatformConnection {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub access_token: SecretString,
    #[serde(default)]
    pub zone: String,
}

impl SecretSpec {
    pub fn validate(&self) -> Result<()> {
        require("secret.name", &self.name)?;

        match (&self.cloud, &self.platform) {
            (Some(cloud), None) => {
                require_secret("secret.cloud.api_key", &cloud.api_key)?;
                require("secret.cloud.zone", &cloud.zone)
            }
            (None, Some(platform)) => {
                require("secret.platform.url", &platform.url)?;
                require_secret("secret.platform.access_token", &platform.access_token)?;
                require("secret.platform.zone", &platform.zone)
            }
            _ => Err(InstallerError::MutuallyExclusive {
                first: "secret.cloud".to_string(),
                second: "secret.platform".to_string(),
            }),
        }
    }

    pub fn path(&self) -> String {
        format!("credentials/{}", self.name)
    }

    /// Everything written to the control plane, credentials included
    pub fn payload(&self) -> PathData {
        let mut data = self.visible_fields();
        if let Some(cloud) = &self.cloud {
            data.insert("apikey".into(), json!(cloud.api_key.unsecure()));
        }
        if let Some(platform) = &self.platform {
            data.insert("access_token".into(), json!(platform.access_token.unsecure()));
        }
        data
    }

    /// Fields the control plane returns on read
    pub fn visible_fields(&self) -> PathData {
        let mut data = PathData::new();
        if let Some(cloud) = &self.cloud {
            data.insert("zone".into(), json!(cloud.zone));
            if let Some(url) = &cloud.url {
                data.insert("url".into(), json!(url));
            }
        }
        if let Some(platform) = &self.platform {
            data.insert("url".into(), json!(platform.url));
            data.insert("zone".into(), json!(platform.zone));
        }
        data
    }
}

/// A certificate-issuing role
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RoleSpec {
    #[serde(default)]
    pub name: String,
    pub ttl: Option<String>,
    pub max_ttl: Option<String>,
    #[serde(default = "default_store_by")]
    pub store_by: String,
    pub test_certificate: Option<TestCertificate>,
}

/// Certificate requested by the backend check
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TestCertificate {
    #[serde(default)]
    pub common_name: String,
}

fn default_store_by() -> String {
    "serial".to_string()
}

impl RoleSpec {
    pub fn validate(&self) -> Result<()> {
        require("role.name", &self.name)?;
        if !STORE_BY_VALUES.contains(&self.store_by.as_str()) {
            return Err(InstallerError::InvalidConfig(format!(
                "role '{}': store_by must be one of: {}",
                self.name,
                STORE_BY_VALUES.join(", ")
            )));
        }
        if let Some(cert) = &self.test_certificate {
            require("role.test_certificate.common_name", &cert.common_name)?;
        }
        Ok(())
    }

    pub fn path(&self) -> String {
        format!("roles/{}", self.name)
    }

    /// Role payload bound to `secret_name` and, for the monitor, a policy
    pub fn payload(&self, secret_name: &str, policy: Option<&str>) -> PathData {
        let mut data = PathData::new();
        data.insert("credentials".into(), json!(secret_name));
        data.insert("store_by".into(), json!(self.store_by));
        if let Some(ttl) = &self.ttl {
            data.insert("ttl".into(), json!(ttl));
        }
        if let Some(max_ttl) = &self.max_ttl {
            data.insert("max_ttl".into(), json!(max_ttl));
        }
        if let Some(policy) = policy {
            data.insert("enforcement_policy".into(), json!(policy));
        }
        data
    }
}

/// Certificate policy enforced by the monitor
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PolicySpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub enforcement_roles: Vec<String>,
    #[serde(default)]
    pub defaults_roles: Vec<String>,
}

impl PolicySpec {
    pub fn validate(&self) -> Result<()> {
        require("policy.name", &self.name)?;
        require("policy.zone", &self.zone)
    }

    pub fn path(&self) -> String {
        format!("policies/{}", self.name)
    }

    pub fn payload(&self, secret_name: &str) -> PathData {
        let mut data = PathData::new();
        data.insert("credentials".into(), json!(secret_name));
        data.insert("zone".into(), json!(self.zone));
        data.insert("enforcement_roles".into(), json!(self.enforcement_roles));
        data.insert("defaults_roles".into(), json!(self.defaults_roles));
        data
    }
}

/// Validate every role and reject duplicate names
pub fn validate_roles(roles: &[RoleSpec]) -> Result<()> {
    if roles.is_empty() {
        return Err(InstallerError::InvalidConfig(
            "at least one role must be declared".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for role in roles {
        role.validate()?;
        if !seen.insert(role.name.as_str()) {
            return Err(InstallerError::InvalidConfig(format!(
                "role '{}' is declared twice",
                role.name
            )));
        }
    }
    Ok(())
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(InstallerError::BlankField(field.to_string()));
    }
    Ok(())
}

fn require_secret(field: &str, value: &SecretString) -> Result<()> {
    if value.is_blank() {
        return Err(InstallerError::BlankField(field.to_string()));
    }
    Ok(())
}

/// Write one entity under the plugin mount, reporting on its own check
pub async fn write_entity(
    ctx: &PluginContext<'_>,
    label: &str,
    path: &str,
    payload: &PathData,
) -> Result<()> {
    let check = ctx.section.add_check(label);
    let full_path = ctx.path(path);
    check.update_status(&format!("Writing {}", full_path));

    match ctx.control_plane.write_path(&full_path, payload).await {
        Ok(_) => {
            info!("Configured {}", full_path);
            check.success(&format!("{} written", full_path));
            Ok(())
        }
        Err(e) => {
            check.error(&e.to_string());
            Err(e)
        }
    }
}

/// Read one entity back and require every expected field to match
pub async fn verify_entity(
    ctx: &PluginContext<'_>,
    label: &str,
    path: &str,
    expected: &PathData,
) -> Result<()> {
    let check = ctx.section.add_check(label);
    let full_path = ctx.path(path);

    let result = match ctx.control_plane.read_path(&full_path).await {
        Ok(observed) => compare_fields(&full_path, &observed, expected),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            debug!("{} matches declared configuration", full_path);
            check.success(&format!("{} matches", full_path));
            Ok(())
        }
        Err(e) => {
            check.error(&e.to_string());
            Err(e)
        }
    }
}

/// Compare declared fields with what the control plane returned
pub fn compare_fields(path: &str, observed: &PathData, expected: &PathData) -> Result<()> {
    for (key, want) in expected {
        match observed.get(key) {
            Some(have) if values_match(have, want) => {}
            Some(have) => {
                return Err(InstallerError::CheckFailed(format!(
                    "{}: '{}' is {} but {} is declared",
                    path, key, have, want
                )))
            }
            None => {
                return Err(InstallerError::CheckFailed(format!(
                    "{}: '{}' is missing, {} is declared",
                    path, key, want
                )))
            }
        }
    }
    Ok(())
}

// Some servers return list fields as comma separated strings.
fn values_match(have: &Value, want: &Value) -> bool {
    match (have, want) {
        (Value::String(s), Value::Array(items)) => {
            let joined: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            *s == joined.join(",")
        }
        _ => have == want,
    }
}
