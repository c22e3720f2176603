//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/clickstream/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/clickstream/` (~/.config/clickstream/)
//! - Data: `$XDG_DATA_HOME/clickstream/` (~/.local/share/clickstream/)
//! - State/Logs: `$XDG_STATE_HOME/clickstream/` (~/.local/state/clickstream/)

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

/// Main configuration for the clickstream pipeline
///
/// `app_id` and `endpoint` have no sensible defaults and must be provided by
/// the host application, either programmatically or via the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct ClickstreamConfig {
    /// Application id attached to every event and upload request
    #[serde(default)]
    pub app_id: String,

    /// Collection endpoint for event uploads
    #[serde(default)]
    pub endpoint: String,

    /// Interval between automatic submissions, in milliseconds
    #[serde(default = "default_send_events_interval_ms")]
    pub send_events_interval_ms: u64,

    /// Duration in background after which a paused session expires, in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: i64,

    /// Whether to gzip-compress upload request bodies
    #[serde(default = "default_true")]
    pub is_compress_events: bool,

    /// Whether to log full event JSON at debug level when recording
    #[serde(default)]
    pub is_log_events: bool,

    /// Whether to record `_screen_view` events via the explicit screen API
    #[serde(default = "default_true")]
    pub is_track_screen_view_events: bool,

    /// Whether to record `_user_engagement` events on background transitions
    #[serde(default = "default_true")]
    pub is_track_user_engagement_events: bool,

    /// Whether to record `_app_exception` events (not implemented; reserved)
    #[serde(default)]
    pub is_track_app_exception_events: bool,

    /// Static auth cookie attached to upload requests
    pub auth_cookie: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ClickstreamConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            endpoint: String::new(),
            send_events_interval_ms: default_send_events_interval_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            is_compress_events: true,
            is_log_events: false,
            is_track_screen_view_events: true,
            is_track_user_engagement_events: true,
            is_track_app_exception_events: false,
            auth_cookie: None,
            logging: LoggingConfig::default(),
        }
    }
}

fn default_send_events_interval_ms() -> u64 {
    10_000
}

fn default_session_timeout_ms() -> i64 {
    1_800_000
}

fn default_true() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
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

impl ClickstreamConfig {
    /// Create a configuration with the two required fields set
    pub fn new(app_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Load configuration from the default path, falling back to defaults
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(ClickstreamConfig::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: ClickstreamConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate configuration, returning an error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.app_id.is_empty() {
            return Err(Error::Config("app_id is required".to_string()));
        }
        if self.endpoint.is_empty() {
            return Err(Error::Config("endpoint is required".to_string()));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(Error::Config(format!(
                "endpoint must be an http(s) URL, got: {}",
                self.endpoint
            )));
        }
        if self.send_events_interval_ms == 0 {
            return Err(Error::Config(
                "send_events_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.session_timeout_ms <= 0 {
            return Err(Error::Config(
                "session_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("clickstream").join("config.toml")
    }

    /// Returns the data directory path (SQLite database, preferences file)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("clickstream")
    }

    /// Returns the state directory path (logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("clickstream")
    }

    /// Returns the event database file path
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("events.db")
    }

    /// Returns the preferences file path
    pub fn preferences_path() -> PathBuf {
        Self::data_dir().join("prefs.json")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("clickstream.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClickstreamConfig::default();
        assert_eq!(config.send_events_interval_ms, 10_000);
        assert_eq!(config.session_timeout_ms, 1_800_000);
        assert!(config.is_compress_events);
        assert!(!config.is_log_events);
        assert!(config.auth_cookie.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
app_id = "shopping"
endpoint = "https://collect.example.com/collect"
send_events_interval_ms = 5000
is_compress_events = false

[logging]
level = "debug"
"#;
        let config: ClickstreamConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.app_id, "shopping");
        assert_eq!(config.endpoint, "https://collect.example.com/collect");
        assert_eq!(config.send_events_interval_ms, 5000);
        assert!(!config.is_compress_events);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_requires_app_id_and_endpoint() {
        let config = ClickstreamConfig::default();
        assert!(config.validate().is_err());

        let config = ClickstreamConfig::new("app", "https://collect.example.com");
        assert!(config.validate().is_ok());

        let config = ClickstreamConfig::new("app", "not-a-url");
        assert!(config.validate().is_err());
    }
}
