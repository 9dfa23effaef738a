//! Configuration structs with sensible defaults and RON persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the persisted configuration inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ron";

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener settings.
    pub server: ServerSection,
    /// Admission policy.
    pub admission: AdmissionSection,
    /// Wire framing.
    pub framing: FramingSection,
    /// Per-session payload codec.
    pub codec: CodecSection,
    /// Debug/development settings.
    pub debug: DebugSection,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    /// Address to bind to.
    pub bind_address: String,
    /// TCP port.
    pub port: u16,
    /// Maximum number of concurrent sessions.
    pub max_connections: usize,
    /// Seconds a single frame write may take before the peer is dropped.
    pub write_timeout_secs: u64,
    /// Frames a session may have waiting to be written before it is dropped
    /// as a stalled reader.
    pub outbound_queue: usize,
}

/// Admission configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdmissionSection {
    /// Minimum milliseconds between two admissions from one address.
    /// `0` disables the check.
    pub quiet_window_ms: u64,
}

/// How frames are delimited on the wire.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum FramingMode {
    /// Each frame ends with a terminator byte.
    #[default]
    Delimited,
    /// Each frame is preceded by a little-endian `u32` length.
    LengthPrefixed,
}

/// Framing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FramingSection {
    /// Framing strategy.
    pub mode: FramingMode,
    /// Terminator byte for [`FramingMode::Delimited`].
    pub delimiter: u8,
    /// Largest accepted frame in bytes.
    pub max_frame_size: usize,
}

/// Which payload codec each session gets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum CodecKind {
    /// No transform.
    #[default]
    Identity,
    /// Single-byte XOR with [`CodecSection::key`].
    Xor,
    /// LZ4 block compression.
    Lz4,
}

/// Codec configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CodecSection {
    /// Codec selection.
    pub kind: CodecKind,
    /// Initial key for [`CodecKind::Xor`].
    pub key: u8,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugSection {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Also write JSON logs to the log directory.
    pub file_logging: bool,
}

// --- Default implementations ---

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 4005,
            max_connections: 1024,
            write_timeout_secs: 10,
            outbound_queue: 1024,
        }
    }
}

impl Default for AdmissionSection {
    fn default() -> Self {
        Self {
            quiet_window_ms: 5000,
        }
    }
}

impl Default for FramingSection {
    fn default() -> Self {
        Self {
            mode: FramingMode::Delimited,
            delimiter: 0xFF,
            max_frame_size: 65536,
        }
    }
}

impl Default for DebugSection {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            file_logging: false,
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Re-read the file: returns `Some(new_config)` if it changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
