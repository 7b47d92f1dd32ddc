//! Logging system setup.
//!
//! Initializes the tracing-based logging used throughout the control plane.
//! The filter level comes from `RUST_LOG` when set, otherwise from the
//! `--debug` flag.

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Args;

/// Initialize the logging system.
///
/// Formatted output goes to stderr without target module names; `--log-json`
/// switches to structured JSON for aggregation systems.
pub fn setup_logging(args: &Args) -> Result<()> {
    let level = if args.debug { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    };

    result.map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}
