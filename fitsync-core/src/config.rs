//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/fitsync/config.toml` and resolved
//! once at process start; the resulting [`Config`] value is passed by reference
//! into every component, so nothing else consults the environment at runtime.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/fitsync/` (~/.config/fitsync/)
//! - Data: `$XDG_DATA_HOME/fitsync/` (~/.local/share/fitsync/)
//! - State/Logs: `$XDG_STATE_HOME/fitsync/` (~/.local/state/fitsync/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Directory overrides
    #[serde(default)]
    pub paths: PathsConfig,

    /// Vendor API configuration
    #[serde(default)]
    pub whoop: WhoopConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Chat webhook notification configuration
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Directory overrides; unset entries fall back to XDG defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PathsConfig {
    /// Base data directory (default: XDG data dir)
    pub data_dir: Option<PathBuf>,
    /// Raw JSON dump directory (default: `<data_dir>/raw`)
    pub raw_dir: Option<PathBuf>,
    /// Processed dataset directory (default: `<data_dir>/processed`)
    pub processed_dir: Option<PathBuf>,
}

/// WHOOP API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WhoopConfig {
    /// Collection API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// OAuth token endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// OAuth scope requested on token refresh
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry ceiling for rate-limit and server-error responses
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Default page size for collection requests (clamped to the vendor max)
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

impl Default for WhoopConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token_url: default_token_url(),
            scope: default_scope(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            page_limit: default_page_limit(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.prod.whoop.com/developer/v2".to_string()
}

fn default_token_url() -> String {
    "https://api.prod.whoop.com/oauth/oauth2/token".to_string()
}

fn default_scope() -> String {
    "offline".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    6
}

fn default_page_limit() -> u32 {
    25
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Chat webhook configuration; all fields optional, missing webhook means skip.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct NotifyConfig {
    /// Incoming-webhook URL
    pub webhook_url: Option<String>,
    /// Optional channel override
    pub channel: Option<String>,
    /// Optional sender name override
    pub username: Option<String>,
}

impl Config {
    /// Returns the fitsync config directory
    pub fn config_dir() -> PathBuf {
        xdg_config_home().join("fitsync")
    }

    /// Returns the fitsync state directory (logs, metrics, run state)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("fitsync")
    }

    /// Returns the config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Returns the env-style credential dotfile path
    pub fn env_file_path() -> PathBuf {
        Self::config_dir().join("fitsync.env")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("fitsync.log")
    }

    /// Load configuration from the default path, falling back to defaults when
    /// the file does not exist. `FITSYNC_DATA_DIR`, `FITSYNC_RAW_DIR` and
    /// `FITSYNC_PROCESSED_DIR` override the corresponding `[paths]` entries;
    /// the lookup happens here, once, at construction.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            toml::from_str(&text)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Configuration rooted at an explicit data directory; raw and processed
    /// directories resolve beneath it. Used by tests and embedding code.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            paths: PathsConfig {
                data_dir: Some(data_dir),
                raw_dir: None,
                processed_dir: None,
            },
            ..Self::default()
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("FITSYNC_DATA_DIR") {
            self.paths.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(dir) = std::env::var("FITSYNC_RAW_DIR") {
            self.paths.raw_dir = Some(PathBuf::from(dir));
        }
        if let Ok(dir) = std::env::var("FITSYNC_PROCESSED_DIR") {
            self.paths.processed_dir = Some(PathBuf::from(dir));
        }
    }

    /// Base data directory
    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(|| xdg_data_home().join("fitsync"))
    }

    /// Raw JSON dump directory
    pub fn raw_dir(&self) -> PathBuf {
        self.paths
            .raw_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("raw"))
    }

    /// Processed dataset directory
    pub fn processed_dir(&self) -> PathBuf {
        self.paths
            .processed_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("processed"))
    }

    /// SQLite database path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("fitsync.db")
    }

    /// Per-run metrics directory
    pub fn metrics_dir(&self) -> PathBuf {
        Self::state_dir().join("metrics")
    }

    /// Last-success state file path
    pub fn last_success_path(&self) -> PathBuf {
        Self::state_dir().join("last_success.json")
    }

    /// Create the data directories this process writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.raw_dir())?;
        std::fs::create_dir_all(self.processed_dir())?;
        Ok(())
    }
}
