//! Configuration loading and server endpoint resolution
//!
//! The endpoint URL and session tunables resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`CALLDECK_SERVER_URL`)
//! 3. TOML config file (`~/.config/calldeck/config.toml` or an explicit path)
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the server endpoint URL
pub const SERVER_URL_ENV: &str = "CALLDECK_SERVER_URL";

/// Default duplex session endpoint
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:5870/session";

/// Default reconnect backoff base delay in milliseconds
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1000;

/// Default maximum automatic reconnect attempts
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Client configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Duplex session endpoint URL
    pub server_url: String,

    /// Reconnect backoff base delay in milliseconds (doubles per attempt)
    pub reconnect_base_delay_ms: u64,

    /// Maximum automatic reconnect attempts before giving up
    pub reconnect_max_attempts: u32,

    /// Audio output buffer size in frames (None = device default)
    pub audio_buffer_size: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            audio_buffer_size: None,
        }
    }
}

impl Config {
    /// Parse configuration from TOML text.
    ///
    /// Missing keys fall back to compiled defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid config file: {}", e)))
    }

    /// Load configuration following the resolution priority order.
    ///
    /// # Arguments
    /// - `cli_url`: URL from the command line (highest priority)
    /// - `config_path`: Explicit config file path (None = default location)
    pub fn load(cli_url: Option<&str>, config_path: Option<&Path>) -> Result<Self> {
        // Priority 3/4: config file over compiled defaults
        let mut config = match resolve_config_path(config_path) {
            Some(path) => {
                debug!("Loading config file: {}", path.display());
                let text = std::fs::read_to_string(&path)?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };

        // Priority 2: environment variable
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            config.server_url = url;
        }

        // Priority 1: command-line argument
        if let Some(url) = cli_url {
            config.server_url = url.to_string();
        }

        Ok(config)
    }
}

/// Pick the config file to read: the explicit path if given, otherwise the
/// platform default location when it exists.
fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    default_config_path().filter(|p| p.exists())
}

/// Default configuration file path for the platform
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("calldeck").join("config.toml"))
}
