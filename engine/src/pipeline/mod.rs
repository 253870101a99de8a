//! Task pipeline
//!
//! Brings every declared plugin to its target state, one after the other:
//!
//! 1. preflight: the control plane must have a plugin directory
//! 2. download: resolve the release and verify the archive
//! 3. deploy: write the binary to every SSH endpoint
//! 4. enable: register the binary in the plugin catalog
//! 5. mount: mount the backend at the declared path
//! 6. configure: plugin specific configuration
//! 7. check: plugin specific verification
//!
//! Every step is idempotent against the control plane. The first fatal
//! error stops the current plugin and every later one; nothing is undone.

pub mod steps;
pub mod summary;

use sdk::control_plane::ControlPlane;
use sdk::errors::InstallerError;
use sdk::plugin::PluginContext;
use sdk::release::{ArtifactFetcher, ReleaseIndex};
use sdk::remote::HostConnector;
use sdk::report::{Reporter, Section};
use sdk::types::{canonical_file_name, canonical_name};
use tracing::{info, info_span, Instrument};

use crate::config::{Configuration, PluginSpec};
pub use summary::{Failure, MountAction, PluginOutcome, RegistrationAction, RunSummary, Step};

/// External systems the pipeline works against
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub control_plane: &'a dyn ControlPlane,
    pub connector: &'a dyn HostConnector,
    pub releases: &'a dyn ReleaseIndex,
    pub fetcher: &'a dyn ArtifactFetcher,
    pub reporter: &'a dyn Reporter,
}

pub struct Orchestrator<'a> {
    collaborators: Collaborators<'a>,
}

type StepResult<T> = std::result::Result<T, (Step, InstallerError)>;

fn at(step: Step) -> impl FnOnce(InstallerError) -> (Step, InstallerError) {
    move |e| (step, e)
}

impl<'a> Orchestrator<'a> {
    pub fn new(collaborators: Collaborators<'a>) -> Self {
        Self { collaborators }
    }

    /// Run every step for every plugin, stopping at the first fatal error
    pub async fn install(&self, config: &Configuration) -> RunSummary {
        self.run(config, false).await
    }

    /// Run preflight and the plugin checks only; nothing is mutated
    pub async fn check(&self, config: &Configuration) -> RunSummary {
        self.run(config, true).await
    }

    async fn run(&self, config: &Configuration, check_only: bool) -> RunSummary {
        let mut summary = RunSummary::default();

        for spec in &config.plugins {
            let section = self
                .collaborators
                .reporter
                .add_section(&format!("{} ({})", spec.type_name, spec.mount_path));
            let mut outcome = PluginOutcome::new(&spec.type_name, &spec.mount_path);

            let span = info_span!("plugin", plugin = %spec.type_name, mount = %spec.mount_path);
            let result = if check_only {
                self.check_plugin(spec, section.as_ref(), &mut outcome)
                    .instrument(span)
                    .await
            } else {
                self.install_plugin(config, spec, section.as_ref(), &mut outcome)
                    .instrument(span)
                    .await
            };
            summary.plugins.push(outcome);

            if let Err((step, error)) = result {
                summary.failure = Some(Failure {
                    type_name: spec.type_name.clone(),
                    mount_path: spec.mount_path.clone(),
                    step,
                    error,
                });
                break;
            }
        }

        summary
    }

    async fn install_plugin(
        &self,
        config: &Configuration,
        spec: &PluginSpec,
        section: &dyn Section,
        outcome: &mut PluginOutcome,
    ) -> StepResult<()> {
        let c = self.collaborators;
        let implementation = spec.implementation.as_ref();
        let name = canonical_name(&spec.type_name);
        let file_name = canonical_file_name(&spec.type_name, &spec.mount_path);
        info!("Installing {} {} at {}", name, spec.version_label(), spec.mount_path);

        let preflight = steps::preflight(c.control_plane, section)
            .instrument(info_span!("step", step = %Step::Preflight))
            .await
            .map_err(at(Step::Preflight))?;

        let (release, artifact) = steps::download(
            implementation,
            c.releases,
            c.fetcher,
            &spec.version,
            spec.build_arch.as_deref(),
            section,
        )
        .instrument(info_span!("step", step = %Step::Download))
        .await
        .map_err(at(Step::Download))?;
        outcome.version = Some(release.version);
        outcome.digest = Some(artifact.digest.clone());

        steps::deploy(
            c.connector,
            &config.target.ssh,
            &preflight,
            &file_name,
            &artifact,
            section,
            outcome,
        )
        .instrument(info_span!("step", step = %Step::Deploy))
        .await
        .map_err(at(Step::Deploy))?;

        let registration = steps::enable(c.control_plane, &name, &file_name, &artifact.digest, section)
            .instrument(info_span!("step", step = %Step::Enable))
            .await
            .map_err(at(Step::Enable))?;
        outcome.registration = Some(registration);

        let mount = steps::mount(c.control_plane, &spec.mount_path, &name, section)
            .instrument(info_span!("step", step = %Step::Mount))
            .await
            .map_err(at(Step::Mount))?;
        outcome.mount = Some(mount);

        let ctx = PluginContext::new(c.control_plane, &spec.mount_path, section);
        implementation
            .configure(&ctx)
            .instrument(info_span!("step", step = %Step::Configure))
            .await
            .map_err(at(Step::Configure))?;

        implementation
            .check(&ctx)
            .instrument(info_span!("step", step = %Step::Check))
            .await
            .map_err(at(Step::Check))?;
        outcome.checked = true;

        info!("{} at {} is up to date", name, spec.mount_path);
        Ok(())
    }

    async fn check_plugin(
        &self,
        spec: &PluginSpec,
        section: &dyn Section,
        outcome: &mut PluginOutcome,
    ) -> StepResult<()> {
        let c = self.collaborators;
        steps::preflight(c.control_plane, section)
            .instrument(info_span!("step", step = %Step::Preflight))
            .await
            .map_err(at(Step::Preflight))?;

        let ctx = PluginContext::new(c.control_plane, &spec.mount_path, section);
        spec.implementation
            .check(&ctx)
            .instrument(info_span!("step", step = %Step::Check))
            .await
            .map_err(at(Step::Check))?;
        outcome.checked = true;
        Ok(())
    }
}
