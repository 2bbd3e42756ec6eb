//! Environment overlay.
//!
//! Every stage is configurable through plain environment variables so it can
//! run in a container without a config file. Values found here win over the
//! file. Empty values are treated as unset.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

use super::{Config, IdentityMode};

impl Config {
    /// Overlay settings from an environment lookup function.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`; tests pass a closure
    /// over a fixed map instead of touching the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BROKER_HOST") {
            self.broker.host = v;
        }
        if let Some(v) = get("BROKER_PORT") {
            self.broker.port = parse("BROKER_PORT", &v)?;
        }
        if let Some(v) = get("BROKER_VHOST") {
            self.broker.vhost = v;
        }
        if let Some(v) = get("BROKER_CONNECTION_ATTEMPTS") {
            self.broker.connection_attempts = parse("BROKER_CONNECTION_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("BROKER_RETRY_DELAY_MS") {
            self.broker.retry_delay_ms = parse("BROKER_RETRY_DELAY_MS", &v)?;
        }

        if let Some(v) = get("REQUEST_EXCHANGE") {
            self.routing.request_exchange = v;
        }
        if let Some(v) = get("REQUEST_ROUTING_KEY") {
            self.routing.request_routing_key = v;
        }
        if let Some(v) = get("RESULT_EXCHANGE") {
            self.routing.result_exchange = v;
        }
        if let Some(v) = get("RESULT_TOPIC_SUFFIX") {
            self.routing.result_topic_suffix = v;
        }

        if let Some(v) = get("SCAN_DIRS") {
            self.scanner.dirs = split_list(&v).into_iter().map(PathBuf::from).collect();
        }
        if let Some(v) = get("SCAN_INTERVAL_SECS") {
            self.scanner.interval_secs = parse("SCAN_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("SCAN_IDENTITY") {
            self.scanner.identity = IdentityMode::parse(&v).ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "SCAN_IDENTITY must be 'path' or 'content', got {v:?}"
                ))
            })?;
        }
        if let Some(v) = get("SCAN_EXTENSIONS") {
            self.scanner.extensions = split_list(&v);
        }

        if let Some(v) = get("TARGET_DIR") {
            self.sorter.target_dir = Some(PathBuf::from(v));
        }

        if let Some(v) = get("REPLY_TIMEOUT_SECS") {
            self.correlator.timeout_secs = parse("REPLY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("REPLY_POLL_INTERVAL_MS") {
            self.correlator.poll_interval_ms = parse("REPLY_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("REPLY_RETENTION_SECS") {
            self.correlator.retention_secs = parse("REPLY_RETENTION_SECS", &v)?;
        }

        if let Some(v) = get("HTTP_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = get("HTTP_MAX_UPLOAD_MB") {
            self.server.max_upload_mb = parse("HTTP_MAX_UPLOAD_MB", &v)?;
        }

        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.logging.format = v.to_lowercase();
        }
        if let Some(v) = get("LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }

        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::ValidationError(format!("{key}={value:?}: {e}")))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
