//! Configuration loading: `presence.toml` with environment variable overrides.
//!
//! Every field has a default so the file is optional. `PRESENCE_*` variables
//! and `RUST_LOG` take precedence over file values.

use presence_core::PresenceConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default config file, looked up in the working directory
pub const CONFIG_FILE: &str = "presence.toml";

/// Top-level configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub assistant: AssistantConfig,
    pub notifications: NotificationConfig,
    pub vendors: VendorConfig,
    /// Log collaborator calls instead of performing them
    pub debug: bool,
    /// Engine tunables
    pub presence: PresenceConfig,
}

/// HTTP listener and data directory
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind (e.g. `0.0.0.0:3000`)
    pub bind: String,
    /// Holds the store snapshot and the seed files
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax)
    pub filter: String,
}

/// Voice-assistant relay endpoint
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub url: Option<String>,
    pub user: Option<String>,
}

/// Push notification endpoint; the topic is appended to the URL
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub fcm_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    /// Base URL of the MAC vendor database
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "presence_api=debug,automation_engine=debug,presence_core=info,info"
                .to_string(),
        }
    }
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            url: "https://api.macvendors.com".to_string(),
        }
    }
}

/// Errors that can occur while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    /// Load `presence.toml` (if present), apply environment overrides, and
    /// validate the result
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file(Path::new(CONFIG_FILE))?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file; a missing file yields the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("PRESENCE_BIND") {
            self.server.bind = val;
        }
        if let Some(val) = lookup("PRESENCE_DATA_DIR") {
            self.server.data_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("PRESENCE_ASSISTANT_URL") {
            self.assistant.url = Some(val);
        }
        if let Some(val) = lookup("PRESENCE_ASSISTANT_USER") {
            self.assistant.user = Some(val);
        }
        if let Some(val) = lookup("PRESENCE_FCM_URL") {
            self.notifications.fcm_url = Some(val);
        }
        if let Some(val) = lookup("PRESENCE_DEBUG") {
            self.debug = parse_flag(&val);
        }
        if let Some(val) = lookup("PRESENCE_CQ") {
            self.presence.command_queue_enabled = parse_flag(&val);
        }
        if let Some(val) = lookup("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.presence.time_away_seconds == 0 {
            return Err(ConfigError::Validation(
                "presence.time_away_seconds must be positive".to_string(),
            ));
        }
        if self.presence.call_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "presence.call_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.presence.occupancy_sweep_seconds == 0 {
            return Err(ConfigError::Validation(
                "presence.occupancy_sweep_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|e| ConfigError::Validation(format!("bind '{}': {}", self.server.bind, e)))
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_file(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert_eq!(config.presence.time_away_seconds, 300);
        assert!(!config.presence.command_queue_enabled);
        assert!(config.assistant.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            debug = true

            [server]
            data_dir = "/var/lib/presence"

            [presence]
            absence_seconds = 600
            new_device_is_person = true
            "#,
        )
        .unwrap();
        assert!(config.debug);
        assert_eq!(config.server.data_dir, PathBuf::from("/var/lib/presence"));
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert_eq!(config.presence.absence_seconds, 600);
        assert!(config.presence.new_device_is_person);
        assert_eq!(config.presence.shutdown_stagger_seconds, 10);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        assert!(matches!(
            Config::from_toml("[server\nbind = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut config = Config::from_toml("[server]\nbind = \"127.0.0.1:8080\"").unwrap();
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PRESENCE_BIND", "127.0.0.1:9090"),
            ("PRESENCE_ASSISTANT_URL", "http://relay"),
            ("PRESENCE_CQ", "true"),
            ("PRESENCE_DEBUG", "0"),
            ("RUST_LOG", "warn"),
        ]);
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.server.bind, "127.0.0.1:9090");
        assert_eq!(config.assistant.url.as_deref(), Some("http://relay"));
        assert!(config.presence.command_queue_enabled);
        assert!(!config.debug);
        assert_eq!(config.logging.filter, "warn");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        config.server.bind = "not-an-address".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::default();
        config.presence.call_timeout_seconds = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
}
