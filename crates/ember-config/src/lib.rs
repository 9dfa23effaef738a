//! Configuration for the Ember game server.
//!
//! Settings persist to disk as `config.ron` and every field has a default, so
//! older and newer files both load. Command-line flags parsed with clap
//! override whatever the file says.

mod cli;
mod config;
mod error;

use std::path::PathBuf;

pub use cli::CliArgs;
pub use config::{
    AdmissionSection, CONFIG_FILE_NAME, CodecKind, CodecSection, Config, DebugSection,
    FramingMode, FramingSection, ServerSection,
};
pub use error::ConfigError;

/// Directory holding `config.ron`: `--config` if given, otherwise
/// `<platform config dir>/ember-server`.
pub fn resolve_config_dir(args: &CliArgs) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = &args.config {
        return Ok(dir.clone());
    }
    dirs::config_dir()
        .map(|d| d.join("ember-server"))
        .ok_or(ConfigError::NoConfigDir)
}
