//! Configuration module for lounge.

use serde::Deserialize;
use std::path::Path;

use crate::peer::wire::MAX_PAYLOAD_LEN;
use crate::{LoungeError, Result};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Capacity of each session's outbound notification queue.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3232
}

fn default_max_connections() -> usize {
    64
}

fn default_outbound_queue() -> usize {
    1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

/// Chat room configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Room that new sessions land in and that the empty room id maps to.
    #[serde(default = "default_room")]
    pub default_room: String,
    /// Number of messages each room keeps for newcomers.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_room() -> String {
    "Lobby".to_string()
}

fn default_max_history() -> usize {
    10
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_room: default_room(),
            max_history: default_max_history(),
        }
    }
}

/// File storage and transfer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    /// Root directory; each room gets a subdirectory.
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    /// Smallest accepted upload, in bytes (inclusive).
    #[serde(default = "default_min_upload_bytes")]
    pub min_upload_bytes: u64,
    /// Largest accepted upload, in bytes (inclusive).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Nominal chunk size for streamed transfers.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Whether an upload may replace a larger existing file.
    #[serde(default = "default_allow_shrinking_overwrite")]
    pub allow_shrinking_overwrite: bool,
}

fn default_storage_path() -> String {
    "chat-server-files".to_string()
}

fn default_min_upload_bytes() -> u64 {
    2 * 1024
}

fn default_max_upload_bytes() -> u64 {
    200 * 1024 * 1024
}

fn default_chunk_size() -> usize {
    1024
}

fn default_allow_shrinking_overwrite() -> bool {
    true
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            min_upload_bytes: default_min_upload_bytes(),
            max_upload_bytes: default_max_upload_bytes(),
            chunk_size: default_chunk_size(),
            allow_shrinking_overwrite: default_allow_shrinking_overwrite(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file. Empty disables file logging.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/lounge.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Chat room configuration.
    #[serde(default)]
    pub chat: ChatConfig,
    /// File storage configuration.
    #[serde(default)]
    pub files: FilesConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(LoungeError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| LoungeError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `LOUNGE_STORAGE_PATH`: Override the file storage root
    /// - `LOUNGE_LOG_LEVEL`: Override the log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("LOUNGE_STORAGE_PATH") {
            if !path.is_empty() {
                self.files.storage_path = path;
            }
        }
        if let Ok(level) = std::env::var("LOUNGE_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.files.min_upload_bytes > self.files.max_upload_bytes {
            return Err(LoungeError::Config(format!(
                "files.min_upload_bytes ({}) exceeds files.max_upload_bytes ({})",
                self.files.min_upload_bytes, self.files.max_upload_bytes
            )));
        }
        if self.files.chunk_size == 0 {
            return Err(LoungeError::Config(
                "files.chunk_size must be positive".to_string(),
            ));
        }
        if self.files.chunk_size > MAX_PAYLOAD_LEN {
            return Err(LoungeError::Config(format!(
                "files.chunk_size ({}) exceeds the frame payload limit ({MAX_PAYLOAD_LEN})",
                self.files.chunk_size
            )));
        }
        if self.chat.max_history == 0 {
            return Err(LoungeError::Config(
                "chat.max_history must be positive".to_string(),
            ));
        }
        if self.chat.default_room.trim().is_empty() {
            return Err(LoungeError::Config(
                "chat.default_room must not be empty".to_string(),
            ));
        }
        if let Err(e) = crate::file::validate_room_id(&self.chat.default_room) {
            return Err(LoungeError::Config(format!("chat.default_room: {e}")));
        }
        if self.server.outbound_queue == 0 {
            return Err(LoungeError::Config(
                "server.outbound_queue must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
