//! Configuration
//!
//! Read from `$XDG_CONFIG_HOME/threadline/config.toml`; every section and
//! key is optional. Logs go to `$XDG_STATE_HOME/threadline/`.
//!
//! ```toml
//! [stream]
//! allow_incomplete_line_on_flush = false
//! max_line_bytes = 8388608
//!
//! [logging]
//! level = "info"
//! max_files = 5
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "threadline";
const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// `$var`, or `$HOME/fallback` when unset
fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    if let Some(dir) = std::env::var_os(var).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(fallback)
}

/// Top-level configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Frame decoding behavior
    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Frame decoding options, also used as the accumulator options.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Drop a dangling partial line at end of stream instead of failing
    #[serde(default)]
    pub allow_incomplete_line_on_flush: bool,

    /// Largest frame accepted before the stream is failed
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            allow_incomplete_line_on_flush: false,
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl StreamConfig {
    /// Strict decoding with default limits
    pub fn strict() -> Self {
        Self::default()
    }

    /// Lenient decoding with default limits
    pub fn lenient() -> Self {
        Self {
            allow_incomplete_line_on_flush: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_line_bytes == 0 {
            return Err(Error::Config(
                "stream.max_line_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_line_bytes() -> usize {
    8 * 1024 * 1024
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Level for threadline's own log targets
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Daily log files kept before the oldest is removed
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

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "logging.level must be one of {}, got {:?}",
                LOG_LEVELS.join(", "),
                self.level
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load `config.toml`, falling back to defaults when it does not exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }
        Self::load_from(&path)
    }

    /// Load and validate a config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))?;

        config.stream.validate()?;
        config.logging.validate()?;

        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/threadline/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_dir("XDG_CONFIG_HOME", ".config")
            .join(APP_DIR)
            .join("config.toml")
    }

    /// `$XDG_STATE_HOME/threadline/`, where logs are written
    pub fn state_dir() -> PathBuf {
        xdg_dir("XDG_STATE_HOME", ".local/state").join(APP_DIR)
    }

    /// Pin the XDG variables to their resolved values so every later lookup
    /// in the process agrees, even if `HOME` changes.
    pub fn ensure_xdg_env() {
        for (var, fallback) in [
            ("XDG_STATE_HOME", ".local/state"),
            ("XDG_CONFIG_HOME", ".config"),
        ] {
            let dir = xdg_dir(var, fallback);
            std::env::set_var(var, dir);
        }
    }
}
