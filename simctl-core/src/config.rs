//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/simctl/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/simctl/` (~/.config/simctl/)
//! - Data: `$XDG_DATA_HOME/simctl/` (~/.local/share/simctl/)
//! - State/Logs: `$XDG_STATE_HOME/simctl/` (~/.local/state/simctl/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

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
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Job supervision configuration
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Status source of record
    #[serde(default)]
    pub status: StatusConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Job supervision configuration
#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    /// Lines kept per output stream of each job (0 = unbounded)
    #[serde(default = "default_max_retained_lines")]
    pub max_retained_lines: usize,

    /// Milliseconds between status polls in the CLI
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Refuse to replace a job that is still running
    #[serde(default = "default_reject_active_relaunch")]
    pub reject_active_relaunch: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_retained_lines: default_max_retained_lines(),
            poll_interval_ms: default_poll_interval_ms(),
            reject_active_relaunch: default_reject_active_relaunch(),
        }
    }
}

impl JobsConfig {
    /// Per-stream retention cap, `None` when unbounded.
    pub fn retention_cap(&self) -> Option<usize> {
        match self.max_retained_lines {
            0 => None,
            n => Some(n),
        }
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(
                "jobs.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_retained_lines() -> usize {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_reject_active_relaunch() -> bool {
    true
}

/// Status source of record configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct StatusConfig {
    /// Override for the status database location
    pub database_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.jobs.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/simctl/config.toml` (~/.config/simctl/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("simctl").join("config.toml")
    }

    /// Returns the data directory path (for the status database)
    ///
    /// `$XDG_DATA_HOME/simctl/` (~/.local/share/simctl/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("simctl")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/simctl/` (~/.local/state/simctl/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("simctl")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/simctl/simctl.log` (~/.local/state/simctl/simctl.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("simctl.log")
    }

    /// Returns the status database path, honoring `status.database_path`
    ///
    /// Default: `$XDG_DATA_HOME/simctl/status.db`
    pub fn status_database_path(&self) -> PathBuf {
        self.status
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("status.db"))
    }
}
