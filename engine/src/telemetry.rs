//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging. The level comes from
//! `RUST_LOG` when set, then from `--log`, then defaults to `info`. Debug
//! builds print human readable lines; release builds print JSON with spans.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber with the given log level
///
/// Log output goes to stderr so `--json` results on stdout stay parseable.
pub fn init_telemetry_with_level(log_level: &str) {
    let default_filter = format!(
        "{level},vplug_engine={level},vplug_artifacts={level},vplug_pki={level}",
        level = log_level
    );

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

/// Initialize the tracing subscriber at `info`
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}
