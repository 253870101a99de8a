//! `pki-backend`: certificate issuing secrets engine

use async_trait::async_trait;
use sdk::errors::{InstallerError, Result};
use sdk::expr::ExprContext;
use sdk::plugin::{asset_substring, PluginContext, PluginImplementation};
use sdk::release::ReleaseIndex;
use sdk::types::ResolvedRelease;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::certificate::{CertificateProvider, ControlPlaneIssuer};
use crate::entities::{self, RoleSpec, SecretSpec};

pub const TYPE_NAME: &str = "pki-backend";
pub const REPOSITORY: &str = "vplug-io/vault-pki-backend";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BackendBody {
    #[serde(default)]
    secret: SecretSpec,
    #[serde(default, rename = "role")]
    roles: Vec<RoleSpec>,
}

/// Backend plugin: one credentials secret and the roles that use it
#[derive(Clone)]
pub struct PkiBackend {
    pub secret: SecretSpec,
    pub roles: Vec<RoleSpec>,
    issuer: Arc<dyn CertificateProvider>,
}

impl std::fmt::Debug for PkiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkiBackend")
            .field("secret", &self.secret)
            .field("roles", &self.roles)
            .finish()
    }
}

impl Default for PkiBackend {
    fn default() -> Self {
        Self::with_issuer(Arc::new(ControlPlaneIssuer))
    }
}

impl PkiBackend {
    pub fn with_issuer(issuer: Arc<dyn CertificateProvider>) -> Self {
        Self {
            secret: SecretSpec::default(),
            roles: Vec::new(),
            issuer,
        }
    }

    async fn check_test_certificate(&self, ctx: &PluginContext<'_>, role: &RoleSpec) -> Result<()> {
        let Some(request) = &role.test_certificate else {
            return Ok(());
        };

        let check = ctx
            .section
            .add_check(&format!("Issue test certificate ({})", role.name));
        check.update_status(&format!("Requesting {}", request.common_name));

        let result = self
            .issuer
            .issue(ctx.control_plane, ctx.mount_path, &role.name, &request.common_name)
            .await
            .and_then(|issued| {
                if issued.common_name == request.common_name {
                    Ok(issued)
                } else {
                    Err(InstallerError::CheckFailed(format!(
                        "issued certificate has common name '{}', requested '{}'",
                        issued.common_name, request.common_name
                    )))
                }
            });

        match result {
            Ok(issued) => {
                check.success(&format!(
                    "Issued {}{}",
                    issued.common_name,
                    issued
                        .serial_number
                        .map(|s| format!(" (serial {})", s))
                        .unwrap_or_default()
                ));
                Ok(())
            }
            Err(e) => {
                check.error(&e.to_string());
                Err(e)
            }
        }
    }
}

#[async_trait]
impl PluginImplementation for PkiBackend {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    async fn parse(&mut self, body: toml::Value, ctx: &ExprContext) -> Result<()> {
        let body: BackendBody = ctx.decode(body).await?;
        self.secret = body.secret;
        self.roles = body.roles;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.secret.validate()?;
        entities::validate_roles(&self.roles)
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

        for role in &self.roles {
            entities::write_entity(
                ctx,
                &format!("Role {}", role.name),
                &role.path(),
                &role.payload(&self.secret.name, None),
            )
            .await?;
        }

        info!(
            "Configured {} with {} role(s) at {}",
            TYPE_NAME,
            self.roles.len(),
            ctx.mount_path
        );
        Ok(())
    }

    async fn check(&self, ctx: &PluginContext<'_>) -> Result<()> {
        entities::verify_entity(
            ctx,
            &format!("Verify secret {}", self.secret.name),
            &self.secret.path(),
            &self.secret.visible_fields(),
        )
        .await?;

        for role in &self.roles {
            entities::verify_entity(
                ctx,
                &format!("Verify role {}", role.name),
                &role.path(),
                &role.payload(&self.secret.name, None),
            )
            .await?;
            self.check_test_certificate(ctx, role).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(text: &str) -> toml::Value {
        toml::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn test_parse_and_validate() {
        let mut plugin = PkiBackend::default();
        plugin
            .parse(
                body(
                    r#"
                    [secret]
                    name = "cloud"
                    [secret.cloud]
                    api_key = "abc"
                    zone = "Default"

                    [[role]]
                    name = "web"
                    ttl = "24h"
                    [role.test_certificate]
                    common_name = "test.example.com"
                    "#,
                ),
                &ExprContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(plugin.secret.name, "cloud");
        assert_eq!(plugin.roles.len(), 1);
        assert_eq!(plugin.roles[0].ttl.as_deref(), Some("24h"));
        assert!(plugin.validate().is_ok());
    }

    #[tokio::test]
    async fn test_validate_requires_role() {
        let mut plugin = PkiBackend::default();
        plugin
            .parse(
                body("[secret]\nname = \"s\"\n[secret.cloud]\napi_key = \"k\"\nzone = \"z\""),
                &ExprContext::new(),
            )
            .await
            .unwrap();
        assert!(matches!(plugin.validate(), Err(InstallerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_parse_rejects_unknown_fields() {
        let mut plugin = PkiBackend::default();
        let result = plugin.parse(body("colour = \"blue\""), &ExprContext::new()).await;
        assert!(matches!(result, Err(InstallerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_parse_blank_secret_name() {
        let mut plugin = PkiBackend::default();
        plugin
            .parse(body("[[role]]\nname = \"web\""), &ExprContext::new())
            .await
            .unwrap();
        assert_eq!(
            plugin.validate(),
            Err(InstallerError::BlankField("secret.name".into()))
        );
    }
}
