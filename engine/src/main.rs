// vplug
// Main entry point for the vplug binary

use clap::Parser;
use vplug_engine::cli::{Cli, Command};
use vplug_engine::handlers::{handle_check, handle_install, handle_plugins, handle_validate};
use vplug_engine::registry::PluginRegistry;
use vplug_engine::report::OutputFormat;
use vplug_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.log {
        Some(level) => init_telemetry_with_level(level),
        None => init_telemetry(),
    }

    tracing::debug!("vplug v{}", env!("CARGO_PKG_VERSION"));

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    let config = cli.config.as_deref();

    match cli.command {
        Command::Install => {
            tracing::info!("Installing plugins...");
            handle_install(config, format).await
        }

        Command::Check => {
            tracing::info!("Checking plugins...");
            handle_check(config, format).await
        }

        Command::Validate => handle_validate(config, format).await,

        Command::Plugins => handle_plugins(&PluginRegistry::builtin(), format),
    }
}
