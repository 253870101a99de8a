//! `pki-monitor`: certificate policy enforcement

use async_trait::async_trait;
use sdk::control_plane::PathData;
use sdk::errors::{InstallerError, Result};
use sdk::expr::ExprContext;
use sdk::plugin::{asset_substring, PluginContext, PluginImplementation};
use sdk::release::ReleaseIndex;
use sdk::types::ResolvedRelease;
use serde::Deserialize;
use serde_json::json;

use crate::entities::{self, PolicySpec, RoleSpec, SecretSpec};

pub const TYPE_NAME: &str = "pki-monitor";
pub const REPOSITORY: &str = "vplug-io/vault-pki-monitor";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MonitorBody {
    #[serde(default)]
    secret: SecretSpec,
    #[serde(default)]
    policy: PolicySpec,
    #[serde(default, rename = "role")]
    roles: Vec<RoleSpec>,
}

/// Monitor plugin: a secret, one policy and the roles it governs
#[derive(Debug, Clone, Default)]
pub struct PkiMonitor {
    pub secret: SecretSpec,
    pub policy: PolicySpec,
    pub roles: Vec<RoleSpec>,
}

impl PkiMonitor {
    fn secret_zone(&self) -> PathData {
        let mut data = PathData::new();
        if let Some(zone) = self.secret.visible_fields().remove("zone") {
            data.insert("zone".into(), zone);
        }
        data
    }

    fn role_binding(&self) -> PathData {
        let mut data = PathData::new();
        data.insert("enforcement_policy".into(), json!(self.policy.name));
        data
    }
}

#[async_trait]
impl PluginImplementation for PkiMonitor {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    async fn parse(&mut self, body: toml::Value, ctx: &ExprContext) -> Result<()> {
        let body: MonitorBody = ctx.decode(body).await?;
        self.secret = body.secret;
        self.policy = body.policy;
        self.roles = body.roles;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.secret.validate()?;
        self.policy.validate()?;
        entities::validate_roles(&self.roles)?;

        let referenced = self
            .policy
            .enforcement_roles
            .iter()
            .chain(self.policy.defaults_roles.iter());
        for name in referenced {
            if !self.roles.iter().any(|r| &r.name == name) {
                return Err(InstallerError::InvalidConfig(format!(
                    "policy '{}' references undeclared role '{}'",
                    self.policy.name, name
                )));
            }
        }
        Ok(())
    }

    async fn resolve_download_url(
        &self,
        releases: &dyn ReleaseIndex,
        version: &str,
        build_arch: Option<&str>,
    ) -> Result<ResolvedRelease> {
        releases
            .resolve_download_url(REPOSITORY, version, &asset_substring(build_arch))
            .await
    }

    async fn configure(&self, ctx: &PluginContext<'_>) -> Result<()> {
        entities::write_entity(
            ctx,
            &format!("Secret {}", self.secret.name),
            &self.secret.path(),
            &self.secret.payload(),
        )
        .await?;
        entities::write_entity(
            ctx,
            &format!("Policy {}", self.policy.name),
            &self.policy.path(),
            &self.policy.payload(&self.secret.name),
        )
        .await?;
        for role in &self.roles {
            entities::write_entity(
                ctx,
                &format!("Role {}", role.name),
                &role.path(),
                &role.payload(&self.secret.name, Some(&self.policy.name)),
            )
            .await?;
        }
        Ok(())
    }

    async fn check(&self, ctx: &PluginContext<'_>) -> Result<()> {
        entities::verify_entity(
            ctx,
            &format!("Verify secret {}", self.secret.name),
            &self.secret.path(),
            &self.secret_zone(),
        )
        .await?;

        let mut policy_fields = self.policy.payload(&self.secret.name);
        policy_fields.remove("credentials");
        entities::verify_entity(
            ctx,
            &format!("Verify policy {}", self.policy.name),
            &self.policy.path(),
            &policy_fields,
        )
        .await?;

        let binding = self.role_binding();
        for role in &self.roles {
            entities::verify_entity(
                ctx,
                &format!("Verify role {}", role.name),
                &role.path(),
                &binding,
            )
            .await?;
        }
        Ok(())
    }
}
