//! Command-line argument parsing.
//!
//! Arguments override configuration-file settings; everything that stays
//! stable across restarts belongs in the TOML file instead.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the rallypoint control plane.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration will be created.
    #[arg(short, long, default_value = "rallypoint.toml")]
    pub config: PathBuf,

    /// Front-door listen address override
    ///
    /// Format: "IP:PORT" (e.g., "127.0.0.1:7600" or "0.0.0.0:7600")
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Backend mode override: "memory" or "http"
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Emit JSON-formatted logs for aggregation systems
    #[arg(long)]
    pub log_json: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from("rallypoint.toml"),
            listen: None,
            backend: None,
            debug: false,
            log_json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default() {
        let args = Args::default();
        assert_eq!(args.config, PathBuf::from("rallypoint.toml"));
        assert!(!args.debug);
        assert!(!args.log_json);
        assert!(args.listen.is_none());
        assert!(args.backend.is_none());
    }
}
