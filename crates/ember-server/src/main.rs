//! Ember game server entry point.
//!
//! Loads `config.ron` (creating it on first run), applies command-line
//! overrides, installs logging, registers the built-in packet handlers and
//! serves until Ctrl-C.
//!
//! Run with: `cargo run -p ember-server -- --port 4005`

mod handlers;
mod setup;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ember_config::{CliArgs, CodecKind, Config, resolve_config_dir};
use ember_net::{NetworkManager, RegistryError, StartupError};
use tracing::{error, info};

use crate::handlers::{ServerContext, build_registry};

/// Fatal startup failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("codec {codec:?} needs length-prefixed framing")]
    IncompatibleFraming { codec: CodecKind },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Startup(#[from] StartupError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = match resolve_config_dir(&args) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    ember_log::init_logging(Some(&log_dir), config.debug.file_logging, Some(&config));

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), ServerError> {
    let server_config = setup::server_config(&config)?;
    let framing = setup::framing(&config.framing, &config.codec)?;
    let ctx = Arc::new(ServerContext::in_memory());
    let registry = build_registry(&ctx)?;

    info!(
        codec = ?config.codec.kind,
        framing = ?config.framing.mode,
        max_connections = server_config.max_connections,
        "starting ember server"
    );

    let manager = NetworkManager::start(
        server_config,
        registry,
        setup::codec_factory(&config.codec),
        framing,
    )
    .await?;
    info!(address = %manager.local_addr(), "ember server ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
    }
    info!("shutdown requested");
    manager.shutdown().await;
    Ok(())
}
