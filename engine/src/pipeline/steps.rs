//! Individual pipeline steps
//!
//! Each step opens its own check in the plugin's report section and reports
//! the collaborator message verbatim when it fails.

use sdk::control_plane::ControlPlane;
use sdk::errors::{InstallerError, InstallerErrorExt, Result};
use sdk::plugin::PluginImplementation;
use sdk::release::{ArtifactFetcher, ReleaseIndex};
use sdk::remote::{HostConnector, RemoteSession};
use sdk::report::{Check, Section};
use sdk::types::{Artifact, CatalogEntry, ResolvedRelease, SshEndpoint};
use tracing::{info, warn};

use super::summary::{MountAction, PluginOutcome, RegistrationAction};

/// Server settings read by the preflight step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preflight {
    pub plugin_directory: String,
    pub mlock_enabled: bool,
}

fn fail<T>(check: &dyn Check, error: InstallerError) -> Result<T> {
    check.error(&error.to_string());
    Err(error)
}

pub async fn preflight(control_plane: &dyn ControlPlane, section: &dyn Section) -> Result<Preflight> {
    let check = section.add_check("Preflight");
    check.update_status("Reading server configuration");

    let server = match control_plane.read_config().await {
        Ok(server) => server,
        Err(e) => return fail(check.as_ref(), e),
    };
    let Some(plugin_directory) = server.plugin_directory else {
        return fail(check.as_ref(), InstallerError::DirectoryNotConfigured);
    };
    let mlock_disabled = match control_plane.is_memory_lock_disabled().await {
        Ok(disabled) => disabled,
        Err(e) => return fail(check.as_ref(), e),
    };

    check.success(&format!(
        "plugin directory {}, memory lock {}",
        plugin_directory,
        if mlock_disabled { "disabled" } else { "enabled" }
    ));
    Ok(Preflight {
        plugin_directory,
        mlock_enabled: !mlock_disabled,
    })
}

pub async fn download(
    implementation: &dyn PluginImplementation,
    releases: &dyn ReleaseIndex,
    fetcher: &dyn ArtifactFetcher,
    version: &str,
    build_arch: Option<&str>,
    section: &dyn Section,
) -> Result<(ResolvedRelease, Artifact)> {
    let check = section.add_check("Download");
    check.update_status("Resolving release");

    let release = match implementation
        .resolve_download_url(releases, version, build_arch)
        .await
    {
        Ok(release) => release,
        Err(e) => return fail(check.as_ref(), e),
    };

    check.update_status(&format!("Downloading {}", release.url));
    let artifact = match fetcher.download_and_verify(&release.url).await {
        Ok(artifact) => artifact,
        Err(e) => return fail(check.as_ref(), e),
    };

    info!("Verified {} ({})", release.version, artifact.digest);
    check.success(&format!("{} verified, sha256 {}", release.version, artifact.digest));
    Ok((release, artifact))
}

/// Push the binary to every endpoint, in declaration order
///
/// Sessions are kept in an ordered list and all of them are closed before
/// returning, whether the step succeeded or not. The first fatal error stops
/// the loop, so later endpoints are never contacted.
pub async fn deploy(
    connector: &dyn HostConnector,
    endpoints: &[SshEndpoint],
    preflight: &Preflight,
    file_name: &str,
    artifact: &Artifact,
    section: &dyn Section,
    outcome: &mut PluginOutcome,
) -> Result<()> {
    if endpoints.is_empty() {
        let check = section.add_check("Deploy");
        info!("No SSH endpoints configured, skipping deploy");
        check.success("no SSH endpoints configured, deploy skipped");
        return Ok(());
    }

    let path = format!(
        "{}/{}",
        preflight.plugin_directory.trim_end_matches('/'),
        file_name
    );

    let mut sessions: Vec<Box<dyn RemoteSession>> = Vec::with_capacity(endpoints.len());
    let result = deploy_to_hosts(
        connector,
        endpoints,
        &path,
        artifact,
        preflight.mlock_enabled,
        section,
        outcome,
        &mut sessions,
    )
    .await;

    for session in sessions {
        let name = session.describe();
        if let Err(e) = session.close().await {
            warn!("Failed to close session to {}: {}", name, e);
        }
    }

    result
}

#[allow(clippy::too_many_arguments)]
async fn deploy_to_hosts(
    connector: &dyn HostConnector,
    endpoints: &[SshEndpoint],
    path: &str,
    artifact: &Artifact,
    mlock_enabled: bool,
    section: &dyn Section,
    outcome: &mut PluginOutcome,
    sessions: &mut Vec<Box<dyn RemoteSession>>,
) -> Result<()> {
    for endpoint in endpoints {
        let check = section.add_check(&format!("Deploy to {}", endpoint));
        check.update_status("Connecting");

        let mut session = match connector.connect(endpoint).await {
            Ok(session) => session,
            Err(e) => return fail(check.as_ref(), e),
        };
        let result = deploy_one(session.as_mut(), path, artifact, mlock_enabled, check.as_ref()).await;
        sessions.push(session);

        match result {
            Ok(warnings) => {
                if warnings.is_empty() {
                    check.success(&format!("wrote {}", path));
                }
                outcome
                    .warnings
                    .extend(warnings.into_iter().map(|w| format!("{}: {}", endpoint, w)));
                outcome.hosts_deployed += 1;
            }
            Err(e) => return fail(check.as_ref(), e),
        }
    }
    Ok(())
}

/// Returns the warnings raised on this host
async fn deploy_one(
    session: &mut dyn RemoteSession,
    path: &str,
    artifact: &Artifact,
    mlock_enabled: bool,
    check: &dyn Check,
) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    check.update_status(&format!("Writing {}", path));
    match session.write_file(path, &artifact.binary).await {
        Ok(()) => {}
        Err(e) if e.is_recoverable() => {
            warn!("{}: {}", session.describe(), e);
            check.warning(&format!("{} ({})", e, e.user_hint()));
            warnings.push(e.to_string());
        }
        Err(e) => return Err(e),
    }

    if mlock_enabled {
        check.update_status("Checking memory lock capability");
        let granted = match session.has_memory_lock(path).await {
            Ok(true) => Ok(()),
            Ok(false) => session.grant_memory_lock(path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = granted {
            warn!("{}: memory lock: {}", session.describe(), e);
            check.warning(&format!("memory lock capability: {}", e));
            warnings.push(format!("memory lock capability: {}", e));
        }
    }

    Ok(warnings)
}

pub async fn enable(
    control_plane: &dyn ControlPlane,
    name: &str,
    command: &str,
    digest: &str,
    section: &dyn Section,
) -> Result<RegistrationAction> {
    let check = section.add_check("Enable in catalog");
    let desired = CatalogEntry::new(name, command, digest);

    let action = match control_plane.get_catalog_entry(name).await {
        Ok(existing) if existing.matches(&desired) => Ok(RegistrationAction::Unchanged),
        Ok(_) => register_and_reload(control_plane, &desired).await,
        Err(InstallerError::NotFound(_)) => control_plane
            .register_plugin(&desired)
            .await
            .map(|_| RegistrationAction::Registered),
        Err(e) => Err(e),
    };

    match action {
        Ok(action) => {
            let message = match action {
                RegistrationAction::Registered => "registered",
                RegistrationAction::Unchanged => "already registered",
                RegistrationAction::Updated => "registered new binary and reloaded",
            };
            info!("{} {}", name, message);
            check.success(message);
            Ok(action)
        }
        Err(e) => fail(check.as_ref(), e),
    }
}

async fn register_and_reload(
    control_plane: &dyn ControlPlane,
    entry: &CatalogEntry,
) -> Result<RegistrationAction> {
    control_plane.register_plugin(entry).await?;
    control_plane.reload_plugin(&entry.name).await?;
    Ok(RegistrationAction::Updated)
}

pub async fn mount(
    control_plane: &dyn ControlPlane,
    mount_path: &str,
    backend_type: &str,
    section: &dyn Section,
) -> Result<MountAction> {
    let check = section.add_check("Mount");

    let action = match control_plane.mount_backend_type(mount_path).await {
        Ok(existing) if existing == backend_type => Ok(MountAction::Unchanged),
        Ok(existing) => Err(InstallerError::MountPathInUse {
            path: mount_path.to_string(),
            existing,
        }),
        Err(InstallerError::PluginNotMounted(_)) => control_plane
            .mount(mount_path, backend_type)
            .await
            .map(|_| MountAction::Mounted),
        Err(e) => Err(e),
    };

    match action {
        Ok(MountAction::Mounted) => {
            info!("Mounted {} at {}", backend_type, mount_path);
            check.success(&format!("mounted at {}", mount_path));
            Ok(MountAction::Mounted)
        }
        Ok(MountAction::Unchanged) => {
            check.success(&format!("already mounted at {}", mount_path));
            Ok(MountAction::Unchanged)
        }
        Err(e) => fail(check.as_ref(), e),
    }
}
