//! Test certificate issuance used by the backend check

use async_trait::async_trait;
use sdk::control_plane::{ControlPlane, PathData};
use sdk::errors::{InstallerError, Result};
use serde_json::{json, Value};

/// Certificate returned by an issuer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub common_name: String,
    pub serial_number: Option<String>,
}

/// Issues certificates through a mounted PKI backend
#[async_trait]
pub trait CertificateProvider: Send + Sync {
    async fn issue(
        &self,
        control_plane: &dyn ControlPlane,
        mount_path: &str,
        role: &str,
        common_name: &str,
    ) -> Result<IssuedCertificate>;
}

/// Writes `{mount}/issue/{role}` and reads the subject from the response
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlPlaneIssuer;

#[async_trait]
impl CertificateProvider for ControlPlaneIssuer {
    async fn issue(
        &self,
        control_plane: &dyn ControlPlane,
        mount_path: &str,
        role: &str,
        common_name: &str,
    ) -> Result<IssuedCertificate> {
        let path = format!("{}/issue/{}", mount_path.trim_end_matches('/'), role);
        let mut request = PathData::new();
        request.insert("common_name".into(), json!(common_name));

        let response = control_plane
            .write_path(&path, &request)
            .await?
            .ok_or_else(|| {
                InstallerError::CheckFailed(format!("{} returned no certificate", path))
            })?;

        let issued_name = response
            .get("common_name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                InstallerError::CheckFailed(format!("{} response has no common_name", path))
            })?;

        Ok(IssuedCertificate {
            common_name: issued_name.to_string(),
            serial_number: response
                .get("serial_number")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}
