//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::{Config, ServerConfig};

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "broker.host must not be empty".into(),
            ));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::ValidationError(
                "broker.port must be > 0".into(),
            ));
        }
        if self.broker.connection_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "broker.connection_attempts must be > 0".into(),
            ));
        }
        for (name, value) in [
            ("routing.request_exchange", &self.routing.request_exchange),
            ("routing.request_routing_key", &self.routing.request_routing_key),
            ("routing.result_exchange", &self.routing.result_exchange),
            ("routing.result_topic_suffix", &self.routing.result_topic_suffix),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must not be empty"
                )));
            }
        }
        // The suffix is part of each waiter's exact binding key.
        if self
            .routing
            .result_topic_suffix
            .split('.')
            .any(|word| word == "*" || word == "#")
        {
            return Err(ConfigError::ValidationError(
                "routing.result_topic_suffix must not contain wildcards".into(),
            ));
        }
        if self.scanner.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "scanner.interval_secs must be > 0".into(),
            ));
        }
        if self.correlator.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "correlator.timeout_secs must be > 0".into(),
            ));
        }
        if self.correlator.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "correlator.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.server.max_upload_mb == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_upload_mb must be > 0".into(),
            ));
        }
        if self.server.max_upload_mb > ServerConfig::MAX_UPLOAD_MB {
            return Err(ConfigError::ValidationError(format!(
                "server.max_upload_mb must be <= {}",
                ServerConfig::MAX_UPLOAD_MB
            )));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be 'pretty' or 'json', got {:?}",
                self.logging.format
            )));
        }
        Ok(())
    }
}
