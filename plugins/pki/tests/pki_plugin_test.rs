//! Configure/check round trips against an in-memory control plane

use async_trait::async_trait;
use sdk::control_plane::{ControlPlane, PathData};
use sdk::errors::{InstallerError, Result};
use sdk::expr::ExprContext;
use sdk::plugin::{PluginContext, PluginImplementation};
use sdk::report::{Check, Section};
use sdk::types::{CatalogEntry, ServerConfig};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use vplug_pki::{PkiBackend, PkiMonitor};

/// Stores written paths; reads drop credential fields like a real server
#[derive(Default)]
struct MemoryControlPlane {
    paths: Mutex<BTreeMap<String, PathData>>,
    issued_common_name: Option<String>,
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn read_config(&self) -> Result<ServerConfig> {
        Ok(ServerConfig::default())
    }

    async fn get_catalog_entry(&self, name: &str) -> Result<CatalogEntry> {
        Err(InstallerError::NotFound(name.to_string()))
    }

    async fn register_plugin(&self, _entry: &CatalogEntry) -> Result<()> {
        Ok(())
    }

    async fn reload_plugin(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn mount_backend_type(&self, path: &str) -> Result<String> {
        Err(InstallerError::PluginNotMounted(path.to_string()))
    }

    async fn mount(&self, _path: &str, _backend_type: &str) -> Result<()> {
        Ok(())
    }

    async fn write_path(&self, path: &str, data: &PathData) -> Result<Option<PathData>> {
        if path.contains("/issue/") {
            let requested = data.get("common_name").cloned().unwrap_or(Value::Null);
            let mut response = PathData::new();
            response.insert(
                "common_name".into(),
                self.issued_common_name
                    .as_ref()
                    .map(|cn| json!(cn))
                    .unwrap_or(requested),
            );
            response.insert("serial_number".into(), json!("1a:2b"));
            return Ok(Some(response));
        }
        self.paths
            .lock()
            .unwrap()
            .insert(path.to_string(), data.clone());
        Ok(None)
    }

    async fn read_path(&self, path: &str) -> Result<PathData> {
        let mut data = self
            .paths
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| InstallerError::NotFound(path.to_string()))?;
        data.remove("apikey");
        data.remove("access_token");
        Ok(data)
    }
}

#[derive(Default, Clone)]
struct Log(Arc<Mutex<Vec<String>>>);

impl Section for Log {
    fn add_check(&self, name: &str) -> Box<dyn Check> {
        Box::new(LogCheck {
            name: name.to_string(),
            log: self.clone(),
        })
    }
}

struct LogCheck {
    name: String,
    log: Log,
}

impl Check for LogCheck {
    fn update_status(&self, _message: &str) {}
    fn success(&self, _message: &str) {
        self.log.0.lock().unwrap().push(format!("ok {}", self.name));
    }
    fn warning(&self, _message: &str) {
        self.log.0.lock().unwrap().push(format!("warn {}", self.name));
    }
    fn error(&self, message: &str) {
        self.log
            .0
            .lock()
            .unwrap()
            .push(format!("error {}: {}", self.name, message));
    }
}

const BACKEND_BODY: &str = r#"
[secret]
name = "cloud"
[secret.cloud]
api_key = '${env("VPLUG_PKI_TEST_API_KEY")}'
zone = "Default"

[[role]]
name = "web"
max_ttl = "72h"
[role.test_certificate]
common_name = "sample.example.com"

[[role]]
name = "internal"
store_by = "hash"
"#;

async fn backend() -> PkiBackend {
    std::env::set_var("VPLUG_PKI_TEST_API_KEY", "key-from-env");
    let mut plugin = PkiBackend::default();
    plugin
        .parse(toml::from_str(BACKEND_BODY).unwrap(), &ExprContext::new())
        .await
        .unwrap();
    plugin.validate().unwrap();
    plugin
}

#[tokio::test]
async fn test_backend_configure_then_check() {
    let plugin = backend().await;
    let control_plane = MemoryControlPlane::default();
    let log = Log::default();
    let ctx = PluginContext::new(&control_plane, "pki", &log);

    plugin.configure(&ctx).await.unwrap();
    {
        let paths = control_plane.paths.lock().unwrap();
        assert_eq!(paths["pki/credentials/cloud"]["apikey"], json!("key-from-env"));
        assert_eq!(paths["pki/roles/web"]["credentials"], json!("cloud"));
        assert_eq!(paths["pki/roles/internal"]["store_by"], json!("hash"));
    }

    plugin.check(&ctx).await.unwrap();
    let entries = log.0.lock().unwrap().clone();
    assert!(entries.iter().all(|e| e.starts_with("ok ")), "{:?}", entries);
    assert!(entries.contains(&"ok Issue test certificate (web)".to_string()));
}

#[tokio::test]
async fn test_backend_check_detects_drift() {
    let plugin = backend().await;
    let control_plane = MemoryControlPlane::default();
    let log = Log::default();
    let ctx = PluginContext::new(&control_plane, "pki", &log);

    plugin.configure(&ctx).await.unwrap();
    control_plane
        .paths
        .lock()
        .unwrap()
        .get_mut("pki/roles/web")
        .unwrap()
        .insert("max_ttl".into(), json!("1h"));

    let result = plugin.check(&ctx).await;
    assert!(matches!(result, Err(InstallerError::CheckFailed(_))));
    assert!(log
        .0
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.starts_with("error Verify role web")));
}

#[tokio::test]
async fn test_backend_check_wrong_common_name() {
    let plugin = backend().await;
    let control_plane = MemoryControlPlane {
        issued_common_name: Some("other.example.com".into()),
        ..Default::default()
    };
    let log = Log::default();
    let ctx = PluginContext::new(&control_plane, "pki", &log);

    plugin.configure(&ctx).await.unwrap();
    let result = plugin.check(&ctx).await;
    assert!(matches!(result, Err(InstallerError::CheckFailed(_))));
}

#[tokio::test]
async fn test_backend_check_before_configure_fails() {
    let plugin = backend().await;
    let control_plane = MemoryControlPlane::default();
    let log = Log::default();
    let ctx = PluginContext::new(&control_plane, "pki", &log);

    assert_eq!(
        plugin.check(&ctx).await,
        Err(InstallerError::NotFound("pki/credentials/cloud".into()))
    );
}

#[tokio::test]
async fn test_monitor_configure_then_check() {
    let body = r#"
        [secret]
        name = "tpp"
        [secret.platform]
        url = "https://tpp.example.com"
        access_token = "token"
        zone = "Web"

        [policy]
        name = "default"
        zone = "Web"
        enforcement_roles = ["web", "api"]
        defaults_roles = ["web"]

        [[role]]
        name = "web"

        [[role]]
        name = "api"
    "#;
    let mut plugin = PkiMonitor::default();
    plugin
        .parse(toml::from_str(body).unwrap(), &ExprContext::new())
        .await
        .unwrap();
    plugin.validate().unwrap();

    let control_plane = MemoryControlPlane::default();
    let log = Log::default();
    let ctx = PluginContext::new(&control_plane, "monitor/", &log);

    plugin.configure(&ctx).await.unwrap();
    {
        let paths = control_plane.paths.lock().unwrap();
        assert_eq!(
            paths["monitor/roles/api"]["enforcement_policy"],
            json!("default")
        );
        assert_eq!(
            paths["monitor/policies/default"]["enforcement_roles"],
            json!(["web", "api"])
        );
    }

    plugin.check(&ctx).await.unwrap();
}
