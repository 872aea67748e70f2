//! Configuration loading from TOML files and environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration validation failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("idle duration must be greater than 0")]
    ZeroIdleDuration,
    #[error("check interval must be greater than 0")]
    ZeroCheckInterval,
    #[error("tracker selector cannot be empty")]
    EmptySelector,
    #[error("container selector cannot be empty")]
    EmptyContainerSelector,
    #[error("log attribute name cannot be empty")]
    EmptyLogAttribute,
    #[error("re-observation window must be greater than 0")]
    ZeroReobserveWindow,
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub idle: IdleConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Idle detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleConfig {
    /// Inactivity window in seconds before `idle` is emitted.
    #[serde(default = "default_idle_duration")]
    pub idle_duration_secs: u64,
    /// Checker polling granularity in milliseconds.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            idle_duration_secs: default_idle_duration(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

impl IdleConfig {
    pub fn idle_duration(&self) -> Duration {
        Duration::from_secs(self.idle_duration_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Interaction tracker configuration. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Class selector marking trackable elements.
    #[serde(default = "default_selector")]
    pub selector: String,
    /// Selector for the scoping container element.
    #[serde(default = "default_container_selector")]
    pub container_selector: String,
    /// Attribute the log payload is read from.
    #[serde(default = "default_log_attribute")]
    pub log_attribute_name: String,
    /// Class marking elements that block event bubbling and therefore need
    /// direct listeners.
    #[serde(default = "default_stop_propagation_class")]
    pub stop_propagation_class_name: String,
    /// Trailing rate-limit window for exposure re-registration, in
    /// milliseconds.
    #[serde(default = "default_reobserve_window_ms")]
    pub reobserve_window_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            selector: default_selector(),
            container_selector: default_container_selector(),
            log_attribute_name: default_log_attribute(),
            stop_propagation_class_name: default_stop_propagation_class(),
            reobserve_window_ms: default_reobserve_window_ms(),
        }
    }
}

impl TrackerConfig {
    pub fn reobserve_window(&self) -> Duration {
        Duration::from_millis(self.reobserve_window_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Data directory for JSONL report files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Returns the logs directory path.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

// Default value functions
fn default_idle_duration() -> u64 {
    10
}

fn default_check_interval_ms() -> u64 {
    250
}

fn default_selector() -> String {
    ".track".to_string()
}

fn default_container_selector() -> String {
    "body".to_string()
}

fn default_log_attribute() -> String {
    "data-log".to_string()
}

fn default_stop_propagation_class() -> String {
    "stop".to_string()
}

fn default_reobserve_window_ms() -> u64 {
    3000
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".attent"))
        .unwrap_or_else(|| PathBuf::from(".attent"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle: IdleConfig::default(),
            tracker: TrackerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = config_path {
            Self::from_file(path)?
        } else {
            // Try default config locations
            let default_paths = [
                PathBuf::from("config/default.toml"),
                dirs::config_dir()
                    .map(|d| d.join("attent/config.toml"))
                    .unwrap_or_default(),
            ];

            let mut loaded = None;
            for path in &default_paths {
                if path.exists() {
                    loaded = Some(Self::from_file(path)?);
                    break;
                }
            }
            loaded.unwrap_or_default()
        };

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Expand home directory in data_dir
        config.logging.data_dir = expand_tilde(&config.logging.data_dir);

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ATTENT_IDLE_DURATION") {
            if let Ok(v) = val.parse() {
                self.idle.idle_duration_secs = v;
            }
        }
        if let Ok(val) = std::env::var("ATTENT_CHECK_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                self.idle.check_interval_ms = v;
            }
        }
        if let Ok(val) = std::env::var("ATTENT_SELECTOR") {
            self.tracker.selector = val;
        }
        if let Ok(val) = std::env::var("ATTENT_CONTAINER_SELECTOR") {
            self.tracker.container_selector = val;
        }
        if let Ok(val) = std::env::var("ATTENT_LOG_ATTRIBUTE") {
            self.tracker.log_attribute_name = val;
        }
        if let Ok(val) = std::env::var("ATTENT_DATA_DIR") {
            self.logging.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("ATTENT_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.idle.idle_duration_secs == 0 {
            return Err(ConfigError::ZeroIdleDuration);
        }
        if self.idle.check_interval_ms == 0 {
            return Err(ConfigError::ZeroCheckInterval);
        }
        if self.tracker.selector.trim_start_matches('.').is_empty() {
            return Err(ConfigError::EmptySelector);
        }
        if self.tracker.container_selector.is_empty() {
            return Err(ConfigError::EmptyContainerSelector);
        }
        if self.tracker.log_attribute_name.is_empty() {
            return Err(ConfigError::EmptyLogAttribute);
        }
        if self.tracker.reobserve_window_ms == 0 {
            return Err(ConfigError::ZeroReobserveWindow);
        }
        Ok(())
    }
}

/// Expand ~ to home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(rest) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
    }
    path.to_path_buf()
}
