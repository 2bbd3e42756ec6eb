//! Configuration management for Prism.
//!
//! Configuration is read from `config.toml` in the platform config directory
//! (or `$PRISM_CONFIG`), falls back to defaults, and is then overlaid with the
//! environment-style settings every stage recognizes (`BROKER_HOST`,
//! `SCAN_DIRS`, `TARGET_DIR`, ...).

mod env;
mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that points at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "PRISM_CONFIG";

/// Root configuration structure for Prism.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection settings
    pub broker: BrokerConfig,

    /// Exchanges and routing keys
    pub routing: RoutingConfig,

    /// Scanner settings
    pub scanner: ScannerConfig,

    /// Sorter settings
    pub sorter: SorterConfig,

    /// Request correlator settings
    pub correlator: CorrelatorConfig,

    /// HTTP front-end settings
    pub server: ServerConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location, then apply the process
    /// environment on top.
    ///
    /// A missing config file is not an error; defaults are used instead.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_layered(&Self::resolve_path(), |key| std::env::var(key).ok())
    }

    /// Config file in effect: `$PRISM_CONFIG` if set, else [`Config::default_path`].
    pub fn resolve_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_path)
    }

    /// Load `path` if it exists, overlay values from `lookup`, and validate.
    pub fn load_layered<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if path.exists() {
            Self::read_file(path)?
        } else {
            Self::default()
        };
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path (no environment overlay).
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.prism.prism/config.toml
    /// - Linux: ~/.config/prism/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\prism\config\config.toml
    ///
    /// Falls back to ~/.prism/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "prism", "prism")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".prism").join("config.toml")
            })
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker.port, 5672);
        assert_eq!(config.broker.connection_attempts, 5);
        assert_eq!(config.broker.retry_delay_ms, 2000);
        assert_eq!(config.routing.request_routing_key, "compute");
        assert_eq!(config.routing.result_topic_suffix, "computed");
        assert_eq!(config.correlator.timeout_secs, 30);
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[broker]"));
        assert!(toml.contains("[routing]"));
        assert!(toml.contains("[correlator]"));
    }

    #[test]
    fn test_broker_uri_default_vhost() {
        let config = BrokerConfig::default();
        assert_eq!(config.uri(), "amqp://localhost:5672/%2f");
    }

    #[test]
    fn test_broker_uri_named_vhost() {
        let config = BrokerConfig {
            host: "rabbitmq".to_string(),
            vhost: "/images".to_string(),
            ..BrokerConfig::default()
        };
        assert_eq!(config.uri(), "amqp://rabbitmq:5672/images");
    }

    #[test]
    fn test_load_layered_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_layered(&dir.path().join("absent.toml"), |_| None).unwrap();
        assert_eq!(config.broker.host, "localhost");
    }

    #[test]
    fn test_load_layered_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[broker]\nhost = \"from-file\"\nport = 5673\n\n[scanner]\ninterval_secs = 9\n",
        )
        .unwrap();

        let config = Config::load_layered(&path, |key| match key {
            "BROKER_HOST" => Some("from-env".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.broker.host, "from-env");
        assert_eq!(config.broker.port, 5673);
        assert_eq!(config.scanner.interval_secs, 9);
    }

    #[test]
    fn test_load_from_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[broker\nhost = ").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_required_settings() {
        let config = Config::default();
        assert!(matches!(
            config.scanner.require_dirs(),
            Err(ConfigError::Missing { env: "SCAN_DIRS", .. })
        ));
        assert!(matches!(
            config.sorter.require_target_dir(),
            Err(ConfigError::Missing { env: "TARGET_DIR", .. })
        ));
    }
}
