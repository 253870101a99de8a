//! HTTP control-plane client
//!
//! Talks to a Vault-compatible `/v1/...` API. Every failure goes through
//! [`crate::normalizer`] so callers see semantic error kinds.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use sdk::control_plane::{ControlPlane, PathData};
use sdk::errors::{InstallerError, Result};
use sdk::secret::SecretString;
use sdk::types::{CatalogEntry, ServerConfig};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::normalizer;

const TOKEN_HEADER: &str = "X-Vault-Token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Control-plane client over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    address: String,
    token: SecretString,
    client: Client,
}

impl HttpControlPlane {
    /// Create a client for `address` authenticated with `token`
    ///
    /// `tls_skip_verify` disables certificate verification for lab setups
    /// with self-signed certificates.
    pub fn new(address: &str, token: SecretString, tls_skip_verify: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(tls_skip_verify)
            .user_agent(concat!("vplug/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| InstallerError::InvalidAddress(e.to_string()))?;

        Ok(Self {
            address: address.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.address, path.trim_start_matches('/'))
    }

    /// Send one request; `Ok(None)` when the server returns no body
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<Value>> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method, &url)
            .header(TOKEN_HEADER, self.token.unsecure());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| normalizer::from_transport(&e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| normalizer::from_transport(&e))?;
        debug!("{} -> {} ({} bytes)", path, status, text.len());

        if !status.is_success() {
            return Err(normalizer::from_status(status.as_u16(), &text, path));
        }
        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| InstallerError::ControlPlane {
                status: Some(status.as_u16()),
                message: format!("invalid JSON from {}: {}", path, e),
            })
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.request(Method::GET, path, None)
            .await?
            .ok_or_else(|| InstallerError::NotFound(path.to_string()))
    }
}

/// The `data` object of a response, or the response itself
fn payload(response: Value) -> PathData {
    match response {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Object(data)) => data,
            Some(other) => {
                map.insert("data".into(), other);
                map
            }
            None => map,
        },
        _ => PathData::new(),
    }
}

fn string_field(data: &PathData, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn mount_endpoint(path: &str) -> String {
    format!("sys/mounts/{}", path.trim_matches('/'))
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn read_config(&self) -> Result<ServerConfig> {
        let data = payload(self.get("sys/config/state/sanitized").await?);
        Ok(ServerConfig {
            plugin_directory: string_field(&data, "plugin_directory"),
            mlock_disabled: data
                .get("disable_mlock")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    async fn get_catalog_entry(&self, name: &str) -> Result<CatalogEntry> {
        let path = format!("sys/plugins/catalog/secret/{}", name);
        let data = payload(self.get(&path).await?);
        Ok(CatalogEntry {
            name: string_field(&data, "name").unwrap_or_else(|| name.to_string()),
            command: string_field(&data, "command").unwrap_or_default(),
            digest: string_field(&data, "sha256").unwrap_or_default(),
        })
    }

    async fn register_plugin(&self, entry: &CatalogEntry) -> Result<()> {
        let path = format!("sys/plugins/catalog/secret/{}", entry.name);
        let body = json!({ "sha256": entry.digest, "command": entry.command });
        self.request(Method::PUT, &path, Some(&body)).await?;
        Ok(())
    }

    async fn reload_plugin(&self, name: &str) -> Result<()> {
        let body = json!({ "plugin": name });
        self.request(Method::PUT, "sys/plugins/reload/backend", Some(&body))
            .await?;
        Ok(())
    }

    async fn mount_backend_type(&self, path: &str) -> Result<String> {
        let response = match self.get(&mount_endpoint(path)).await {
            Ok(response) => response,
            Err(InstallerError::NotFound(_))
            | Err(InstallerError::ControlPlane {
                status: Some(400), ..
            }) => return Err(InstallerError::PluginNotMounted(path.to_string())),
            Err(e) => return Err(e),
        };

        string_field(&payload(response), "type")
            .ok_or_else(|| InstallerError::PluginNotMounted(path.to_string()))
    }

    async fn mount(&self, path: &str, backend_type: &str) -> Result<()> {
        let body = json!({ "type": backend_type });
        match self
            .request(Method::POST, &mount_endpoint(path), Some(&body))
            .await
        {
            Ok(_) => Ok(()),
            Err(InstallerError::MountPathInUse { .. }) => Err(InstallerError::MountPathInUse {
                path: path.to_string(),
                existing: self
                    .mount_backend_type(path)
                    .await
                    .unwrap_or_else(|_| "unknown".to_string()),
            }),
            Err(e) => Err(e),
        }
    }

    async fn write_path(&self, path: &str, data: &PathData) -> Result<Option<PathData>> {
        let body = Value::Object(data.clone());
        Ok(self
            .request(Method::PUT, path, Some(&body))
            .await?
            .map(payload))
    }

    async fn read_path(&self, path: &str) -> Result<PathData> {
        Ok(payload(self.get(path).await?))
    }
}
