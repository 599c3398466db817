//! Configuration for the `MatchChat` engine.
//!
//! Supports layered configuration with the following priority (highest
//! first):
//! 1. Values set by the embedding application on [`EngineConfig`]
//! 2. TOML config file (`~/.config/matchchat/config.toml`)
//! 3. Compiled defaults
//!
//! A missing config file is not an error (defaults are used). An explicit
//! path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::transport::socket::ReconnectConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    session: SessionFileConfig,
    reconnect: ReconnectFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    ws_url: Option<String>,
    http_base_url: Option<String>,
    connect_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    join_timeout_secs: Option<u64>,
    echo_timeout_secs: Option<u64>,
    join_retry_limit: Option<u32>,
    event_buffer: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_secs: Option<u64>,
    max_attempts: Option<u32>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// WebSocket URL of the live channel (e.g. `ws://127.0.0.1:5005/ws`).
    pub ws_url: String,
    /// Base URL of the REST history endpoint.
    pub http_base_url: String,
    /// Timeout for establishing connections (socket and history requests).
    pub connect_timeout: Duration,
    /// How long a join waits for its acknowledgement or first live event.
    pub join_timeout: Duration,
    /// How long an optimistic send waits for its echo before being flagged
    /// as failed.
    pub echo_timeout: Duration,
    /// Number of automatic join retries after a timeout.
    pub join_retry_limit: u32,
    /// Capacity of the session event channel toward the UI.
    pub event_buffer: usize,
    /// Reconnection behavior of the socket transport.
    pub reconnect: ReconnectConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:5005/ws".to_string(),
            http_base_url: "http://127.0.0.1:5005".to_string(),
            connect_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(10),
            echo_timeout: Duration::from_secs(8),
            join_retry_limit: 1,
            event_buffer: 256,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default config file location, falling
    /// back to compiled defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an existing file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let file = load_config_file(None)?;
        Ok(Self::resolve(&file))
    }

    /// Load configuration from an explicit file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = load_config_file(Some(path))?;
        Ok(Self::resolve(&file))
    }

    /// Resolve an `EngineConfig` from a parsed config file.
    ///
    /// Priority: file > default.
    fn resolve(file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let reconnect_defaults = ReconnectConfig::default();

        Self {
            ws_url: file
                .server
                .ws_url
                .clone()
                .unwrap_or(defaults.ws_url),
            http_base_url: file
                .server
                .http_base_url
                .clone()
                .unwrap_or(defaults.http_base_url),
            connect_timeout: file
                .server
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            join_timeout: file
                .session
                .join_timeout_secs
                .map_or(defaults.join_timeout, Duration::from_secs),
            echo_timeout: file
                .session
                .echo_timeout_secs
                .map_or(defaults.echo_timeout, Duration::from_secs),
            join_retry_limit: file
                .session
                .join_retry_limit
                .unwrap_or(defaults.join_retry_limit),
            event_buffer: file.session.event_buffer.unwrap_or(defaults.event_buffer),
            reconnect: ReconnectConfig {
                initial_delay: file
                    .reconnect
                    .initial_delay_ms
                    .map_or(reconnect_defaults.initial_delay, Duration::from_millis),
                max_delay: file
                    .reconnect
                    .max_delay_secs
                    .map_or(reconnect_defaults.max_delay, Duration::from_secs),
                max_attempts: file
                    .reconnect
                    .max_attempts
                    .unwrap_or(reconnect_defaults.max_attempts),
            },
        }
    }
}

/// Load and parse the TOML config file.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("matchchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
