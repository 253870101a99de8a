//! vplug engine library
//!
//! Configuration resolution, the plugin registry, the task pipeline and the
//! concrete collaborator adapters. Used by the `vplug` binary and by the
//! integration tests.

/// Configuration resolution
pub mod config;

/// Plugin registry
pub mod registry;

/// Error normalization for collaborator signals
pub mod normalizer;

/// HTTP control-plane client
pub mod control_plane;

/// OpenSSH remote host connector
pub mod ssh;

/// Task pipeline
pub mod pipeline;

/// Console reporting sink
pub mod report;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
