//! Command handlers for CLI operations
//!
//! - install: resolve the configuration and run the full pipeline
//! - check: resolve the configuration and run the plugin checks only
//! - validate: resolve the configuration and print the plugin specs
//! - plugins: list supported plugin types

use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::{self, ConfigResolver, Configuration};
use crate::control_plane::HttpControlPlane;
use crate::pipeline::{Collaborators, Orchestrator, RunSummary};
use crate::registry::PluginRegistry;
use crate::report::{ConsoleReporter, OutputFormat};
use crate::ssh::OpenSshConnector;
use vplug_artifacts::{GitHubReleases, HttpArtifactFetcher};

fn config_path(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => config::default_config_path().context("Failed to locate configuration"),
    }
}

/// Run both resolver stages against the live control plane
pub async fn resolve(
    path: &Path,
    registry: &PluginRegistry,
) -> Result<(Configuration, Arc<HttpControlPlane>)> {
    let text = config::read_document(path)?;
    let mut resolver = ConfigResolver::from_str(&text, registry)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let target = resolver
        .bootstrap()
        .await
        .context("Failed to read control-plane address and token")?;
    let control_plane = Arc::new(HttpControlPlane::new(
        &target.address,
        target.token,
        target.tls_skip_verify,
    )?);
    resolver.bind_control_plane(control_plane.clone());

    let configuration = resolver
        .get_config()
        .await
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok((configuration, control_plane))
}

/// Install every declared plugin
pub async fn handle_install(path: Option<&Path>, format: OutputFormat) -> Result<()> {
    run_pipeline(path, format, false).await
}

/// Verify every declared plugin without mutating anything
pub async fn handle_check(path: Option<&Path>, format: OutputFormat) -> Result<()> {
    run_pipeline(path, format, true).await
}

async fn run_pipeline(path: Option<&Path>, format: OutputFormat, check_only: bool) -> Result<()> {
    let path = config_path(path)?;
    let registry = PluginRegistry::builtin();
    let (configuration, control_plane) = resolve(&path, &registry).await?;

    let connector = OpenSshConnector::new();
    let releases = GitHubReleases::new()?;
    let fetcher = HttpArtifactFetcher::new()?;
    let reporter = ConsoleReporter::new(format);

    let orchestrator = Orchestrator::new(Collaborators {
        control_plane: control_plane.as_ref(),
        connector: &connector,
        releases: &releases,
        fetcher: &fetcher,
        reporter: &reporter,
    });

    info!(
        "{} {} plugin(s) against {}",
        if check_only { "Checking" } else { "Installing" },
        configuration.plugins.len(),
        control_plane.address()
    );
    let summary = if check_only {
        orchestrator.check(&configuration).await
    } else {
        orchestrator.install(&configuration).await
    };

    print_summary(&summary, format)?;
    match summary.failure {
        Some(failure) => Err(anyhow::anyhow!("{}", failure)),
        None => Ok(()),
    }
}

fn print_summary(summary: &RunSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!();
            for plugin in &summary.plugins {
                println!(
                    "{} at {}: {}{}",
                    plugin.type_name,
                    plugin.mount_path,
                    plugin.version.as_deref().unwrap_or("-"),
                    if plugin.checked { ", verified" } else { "" }
                );
                for warning in &plugin.warnings {
                    println!("  warning: {}", warning);
                }
            }
            match &summary.failure {
                Some(failure) => println!("✗ {}", failure),
                None => println!(
                    "✓ {} plugin(s) done, {} warning(s)",
                    summary.plugins.len(),
                    summary.warning_count()
                ),
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&summary.to_json())?);
        }
    }
    Ok(())
}

/// Resolve the configuration and print what would be installed
pub async fn handle_validate(path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let path = config_path(path)?;
    let registry = PluginRegistry::builtin();
    let (configuration, _) = resolve(&path, &registry).await?;

    match format {
        OutputFormat::Text => {
            println!("Configuration is valid: {}", path.display());
            println!("  Control plane: {}", configuration.target.address);
            println!("  SSH endpoints: {}", configuration.target.ssh.len());
            for endpoint in &configuration.target.ssh {
                println!("    - {}", endpoint);
            }
            println!("  Plugins:");
            for spec in &configuration.plugins {
                println!(
                    "    - {} at {} ({}{})",
                    spec.type_name,
                    spec.mount_path,
                    spec.version_label(),
                    spec.build_arch
                        .as_deref()
                        .map(|a| format!(", {}", a))
                        .unwrap_or_default()
                );
            }
        }
        OutputFormat::Json => {
            let plugins: Vec<_> = configuration
                .plugins
                .iter()
                .map(|spec| {
                    json!({
                        "type": spec.type_name,
                        "mount_path": spec.mount_path,
                        "version": spec.version_label(),
                        "build_arch": spec.build_arch,
                    })
                })
                .collect();
            let output = json!({
                "valid": true,
                "address": configuration.target.address,
                "ssh": configuration.target.ssh.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
                "plugins": plugins,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// List supported plugin types
pub fn handle_plugins(registry: &PluginRegistry, format: OutputFormat) -> Result<()> {
    let types = registry.supported_types();
    match format {
        OutputFormat::Text => {
            println!("Supported plugin types:");
            for name in &types {
                println!("  {}", name);
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "plugins": types }))?
            );
        }
    }
    Ok(())
}
