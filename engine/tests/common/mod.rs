//! In-memory fakes of every pipeline collaborator
#![allow(dead_code)]

use async_trait::async_trait;
use sdk::control_plane::{ControlPlane, PathData};
use sdk::errors::{InstallerError, Result};
use sdk::expr::ExprContext;
use sdk::plugin::{PluginContext, PluginImplementation};
use sdk::release::{ArtifactFetcher, ReleaseIndex};
use sdk::remote::{HostConnector, RemoteSession};
use sdk::report::{Check, Reporter, Section};
use sdk::secret::SecretString;
use sdk::types::{Artifact, CatalogEntry, ResolvedRelease, ServerConfig, SshEndpoint};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use vplug_engine::config::{Configuration, ControlPlaneTarget, PluginSpec};
use vplug_engine::pipeline::Collaborators;
use vplug_engine::registry::PluginRegistry;

pub const BINARY: &[u8] = b"\x7fELF fake plugin v1";

pub fn digest_of(binary: &[u8]) -> String {
    vplug_artifacts::verifier::compute_hash(binary)
}

// ---------------------------------------------------------------------------
// Control plane
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ControlPlaneState {
    pub server: ServerConfig,
    pub catalog: BTreeMap<String, CatalogEntry>,
    pub mounts: BTreeMap<String, String>,
    pub paths: BTreeMap<String, PathData>,
    /// Mutating calls, in order
    pub mutations: Vec<String>,
    pub reads: Vec<String>,
}

#[derive(Clone)]
pub struct FakeControlPlane {
    pub state: Arc<Mutex<ControlPlaneState>>,
}

impl FakeControlPlane {
    /// Plugin directory configured, memory locking disabled
    pub fn new() -> Self {
        let state = ControlPlaneState {
            server: ServerConfig {
                plugin_directory: Some("/etc/vault/plugins".to_string()),
                mlock_disabled: true,
            },
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn mutations(&self) -> Vec<String> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn with(self, f: impl FnOnce(&mut ControlPlaneState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn read_config(&self) -> Result<ServerConfig> {
        Ok(self.state.lock().unwrap().server.clone())
    }

    async fn get_catalog_entry(&self, name: &str) -> Result<CatalogEntry> {
        self.state
            .lock()
            .unwrap()
            .catalog
            .get(name)
            .cloned()
            .ok_or_else(|| InstallerError::NotFound(format!("sys/plugins/catalog/secret/{}", name)))
    }

    async fn register_plugin(&self, entry: &CatalogEntry) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(format!("register:{}", entry.name));
        state.catalog.insert(entry.name.clone(), entry.clone());
        Ok(())
    }

    async fn reload_plugin(&self, name: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .mutations
            .push(format!("reload:{}", name));
        Ok(())
    }

    async fn mount_backend_type(&self, path: &str) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .mounts
            .get(path)
            .cloned()
            .ok_or_else(|| InstallerError::PluginNotMounted(path.to_string()))
    }

    async fn mount(&self, path: &str, backend_type: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(format!("mount:{}", path));
        state.mounts.insert(path.to_string(), backend_type.to_string());
        Ok(())
    }

    async fn write_path(&self, path: &str, data: &PathData) -> Result<Option<PathData>> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(format!("write:{}", path));
        state.paths.insert(path.to_string(), data.clone());
        Ok(None)
    }

    async fn read_path(&self, path: &str) -> Result<PathData> {
        let mut state = self.state.lock().unwrap();
        state.reads.push(path.to_string());
        state
            .paths
            .get(path)
            .cloned()
            .ok_or_else(|| InstallerError::NotFound(path.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Remote hosts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct HostBehavior {
    pub connect_error: Option<InstallerError>,
    pub write_error: Option<InstallerError>,
    pub has_memory_lock: bool,
    pub grant_error: Option<InstallerError>,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub behaviors: HashMap<String, HostBehavior>,
    /// `connect:host`, `write:host:path`, `grant:host`, `close:host`, in order
    pub events: Arc<Mutex<Vec<String>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: &str, behavior: HostBehavior) -> Self {
        self.behaviors.insert(host.to_string(), behavior);
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_starting_with(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl HostConnector for FakeConnector {
    async fn connect(&self, endpoint: &SshEndpoint) -> Result<Box<dyn RemoteSession>> {
        let behavior = self.behaviors.get(&endpoint.host).cloned().unwrap_or_default();
        if let Some(error) = behavior.connect_error.clone() {
            return Err(error);
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("connect:{}", endpoint.host));
        Ok(Box::new(FakeSession {
            host: endpoint.host.clone(),
            behavior,
            events: self.events.clone(),
        }))
    }
}

pub struct FakeSession {
    host: String,
    behavior: HostBehavior,
    events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RemoteSession for FakeSession {
    fn describe(&self) -> String {
        self.host.clone()
    }

    async fn write_file(&mut self, path: &str, _contents: &[u8]) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("write:{}:{}", self.host, path));
        match self.behavior.write_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn file_exists(&mut self, _path: &str) -> Result<bool> {
        Ok(true)
    }

    async fn grant_memory_lock(&mut self, _path: &str) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("grant:{}", self.host));
        match self.behavior.grant_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn has_memory_lock(&mut self, _path: &str) -> Result<bool> {
        Ok(self.behavior.has_memory_lock)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("close:{}", self.host));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Releases and artifacts
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct FakeReleases {
    pub requests: Arc<Mutex<Vec<(String, String, String)>>>,
}

#[async_trait]
impl ReleaseIndex for FakeReleases {
    async fn resolve_download_url(
        &self,
        repo: &str,
        desired_version: &str,
        asset_substring: &str,
    ) -> Result<ResolvedRelease> {
        self.requests.lock().unwrap().push((
            repo.to_string(),
            desired_version.to_string(),
            asset_substring.to_string(),
        ));
        let version = if desired_version.is_empty() {
            "v1.0.0"
        } else {
            desired_version
        };
        Ok(ResolvedRelease {
            url: format!("https://releases.test/{}/{}/{}", repo, version, asset_substring),
            version: version.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct FakeFetcher {
    pub binary: Vec<u8>,
    pub downloads: Arc<AtomicUsize>,
}

impl FakeFetcher {
    pub fn new(binary: &[u8]) -> Self {
        Self {
            binary: binary.to_vec(),
            downloads: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn download_and_verify(&self, _url: &str) -> Result<Artifact> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(Artifact {
            binary: self.binary.clone(),
            digest: digest_of(&self.binary),
        })
    }
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub section: String,
    pub check: String,
    pub status: &'static str,
    pub message: String,
}

#[derive(Clone, Default)]
pub struct RecordingReporter {
    pub entries: Arc<Mutex<Vec<Entry>>>,
}

impl RecordingReporter {
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn with_status(&self, status: &str) -> Vec<Entry> {
        self.entries()
            .into_iter()
            .filter(|e| e.status == status)
            .collect()
    }
}

impl Reporter for RecordingReporter {
    fn add_section(&self, name: &str) -> Box<dyn Section> {
        Box::new(RecordingSection {
            name: name.to_string(),
            entries: self.entries.clone(),
        })
    }
}

struct RecordingSection {
    name: String,
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl Section for RecordingSection {
    fn add_check(&self, name: &str) -> Box<dyn Check> {
        Box::new(RecordingCheck {
            section: self.name.clone(),
            name: name.to_string(),
            entries: self.entries.clone(),
        })
    }
}

struct RecordingCheck {
    section: String,
    name: String,
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl RecordingCheck {
    fn record(&self, status: &'static str, message: &str) {
        self.entries.lock().unwrap().push(Entry {
            section: self.section.clone(),
            check: self.name.clone(),
            status,
            message: message.to_string(),
        });
    }
}

impl Check for RecordingCheck {
    fn update_status(&self, _message: &str) {}

    fn success(&self, message: &str) {
        self.record("success", message);
    }

    fn warning(&self, message: &str) {
        self.record("warning", message);
    }

    fn error(&self, message: &str) {
        self.record("error", message);
    }
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

pub const FAKE_TYPE: &str = "x";

#[derive(Debug, Clone, Default)]
pub struct PluginCounters {
    pub configured: Arc<AtomicUsize>,
    pub checked: Arc<AtomicUsize>,
}

impl PluginCounters {
    pub fn configured(&self) -> usize {
        self.configured.load(Ordering::SeqCst)
    }

    pub fn checked(&self) -> usize {
        self.checked.load(Ordering::SeqCst)
    }
}

/// Plugin whose body is a single optional `setting` string
#[derive(Debug, Default)]
pub struct FakePlugin {
    pub counters: PluginCounters,
    pub setting: Option<String>,
    pub fail_configure: bool,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct FakeBody {
    setting: Option<String>,
    #[serde(default)]
    fail_configure: bool,
}

#[async_trait]
impl PluginImplementation for FakePlugin {
    fn type_name(&self) -> &'static str {
        FAKE_TYPE
    }

    async fn parse(&mut self, body: toml::Value, ctx: &ExprContext) -> Result<()> {
        let body: FakeBody = ctx.decode(body).await?;
        self.setting = body.setting;
        self.fail_configure = body.fail_configure;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        match &self.setting {
            Some(s) if s.trim().is_empty() => Err(InstallerError::BlankField("x.setting".into())),
            _ => Ok(()),
        }
    }

    async fn resolve_download_url(
        &self,
        releases: &dyn ReleaseIndex,
        version: &str,
        build_arch: Option<&str>,
    ) -> Result<ResolvedRelease> {
        releases
            .resolve_download_url(
                "acme/x-plugin",
                version,
                &sdk::plugin::asset_substring(build_arch),
            )
            .await
    }

    async fn configure(&self, ctx: &PluginContext<'_>) -> Result<()> {
        self.counters.configured.fetch_add(1, Ordering::SeqCst);
        if self.fail_configure {
            return Err(InstallerError::CheckFailed("configure refused".into()));
        }
        let mut data = PathData::new();
        if let Some(setting) = &self.setting {
            data.insert("setting".into(), serde_json::json!(setting));
        }
        ctx.control_plane.write_path(&ctx.path("config"), &data).await?;
        Ok(())
    }

    async fn check(&self, ctx: &PluginContext<'_>) -> Result<()> {
        self.counters.checked.fetch_add(1, Ordering::SeqCst);
        let check = ctx.section.add_check("Verify config");
        match ctx.control_plane.read_path(&ctx.path("config")).await {
            Ok(_) => {
                check.success("present");
                Ok(())
            }
            Err(e) => {
                check.error(&e.to_string());
                Err(e)
            }
        }
    }
}

/// Registry holding only the fake plugin, sharing `counters`
pub fn fake_registry(counters: &PluginCounters) -> PluginRegistry {
    let counters = counters.clone();
    PluginRegistry::new().with(FAKE_TYPE, move || {
        Box::new(FakePlugin {
            counters: counters.clone(),
            ..Default::default()
        })
    })
}

pub fn endpoint(host: &str) -> SshEndpoint {
    SshEndpoint {
        host: host.to_string(),
        user: "vault".to_string(),
        secret: SecretString::new("/keys/id_ed25519"),
        port: 22,
    }
}

pub fn spec(counters: &PluginCounters, mount_path: &str, version: &str) -> PluginSpec {
    PluginSpec {
        type_name: FAKE_TYPE.to_string(),
        mount_path: mount_path.to_string(),
        version: version.to_string(),
        build_arch: None,
        implementation: Box::new(FakePlugin {
            counters: counters.clone(),
            setting: Some("on".into()),
            fail_configure: false,
        }),
    }
}

pub fn configuration(ssh: Vec<SshEndpoint>, plugins: Vec<PluginSpec>) -> Configuration {
    Configuration {
        target: ControlPlaneTarget {
            address: "https://vault.test:8200".to_string(),
            token: SecretString::new("s.test"),
            tls_skip_verify: false,
            ssh,
        },
        plugins,
    }
}

/// Owns one instance of every fake so tests can borrow [`Collaborators`]
pub struct Harness {
    pub control_plane: FakeControlPlane,
    pub connector: FakeConnector,
    pub releases: FakeReleases,
    pub fetcher: FakeFetcher,
    pub reporter: RecordingReporter,
}

impl Harness {
    pub fn new(control_plane: FakeControlPlane, connector: FakeConnector) -> Self {
        Self {
            control_plane,
            connector,
            releases: FakeReleases::default(),
            fetcher: FakeFetcher::new(BINARY),
            reporter: RecordingReporter::default(),
        }
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            control_plane: &self.control_plane,
            connector: &self.connector,
            releases: &self.releases,
            fetcher: &self.fetcher,
            reporter: &self.reporter,
        }
    }
}
