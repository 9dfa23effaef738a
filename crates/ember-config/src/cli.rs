//! Command-line argument parsing for the Ember server.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Ember server command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "ember-server", about = "Ember game server")]
pub struct CliArgs {
    /// Address to bind to.
    #[arg(long)]
    pub bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long)]
    pub port: Option<u16>,

    /// Minimum milliseconds between two connections from one address.
    #[arg(long)]
    pub quiet_window_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref bind) = args.bind {
            self.server.bind_address = bind.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(window) = args.quiet_window_ms {
            self.admission.quiet_window_ms = window;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
