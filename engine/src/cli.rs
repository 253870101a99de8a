//! CLI interface for vplug
//!
//! Command-line interface built with clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// vplug: install and configure control-plane plugins
///
/// Downloads a verified plugin release, deploys it to the control-plane
/// hosts over SSH, registers and mounts it, then applies and verifies the
/// plugin's own configuration.
#[derive(Parser, Debug)]
#[command(name = "vplug")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Configuration file (default: ~/.vplug/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Bring every declared plugin to its target state
    Install,

    /// Verify declared plugin configuration without changing anything
    Check,

    /// Resolve and validate the configuration file
    Validate,

    /// List supported plugin types
    Plugins,
}
