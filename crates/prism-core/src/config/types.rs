//! Sub-configuration structs with their defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker hostname
    pub host: String,

    /// Broker port
    pub port: u16,

    /// AMQP virtual host
    pub vhost: String,

    /// Connection attempts before giving up
    pub connection_attempts: u32,

    /// Fixed delay between connection attempts in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            vhost: "/".to_string(),
            connection_attempts: 5,
            retry_delay_ms: 2000,
        }
    }
}

impl BrokerConfig {
    /// AMQP URI for this broker (`amqp://host:port/<vhost>`).
    pub fn uri(&self) -> String {
        let vhost = if self.vhost == "/" {
            "%2f".to_string()
        } else {
            self.vhost.trim_start_matches('/').to_string()
        };
        format!("amqp://{}:{}/{}", self.host, self.port, vhost)
    }

    /// Delay between connection attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Exchange names and routing keys shared by every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Direct exchange receiving compute requests
    pub request_exchange: String,

    /// Fixed routing key for compute requests
    pub request_routing_key: String,

    /// Topic exchange receiving compute results
    pub result_exchange: String,

    /// Suffix of the per-request result key, `"<id>.<suffix>"`
    pub result_topic_suffix: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            request_exchange: "image.requests".to_string(),
            request_routing_key: "compute".to_string(),
            result_exchange: "image.results".to_string(),
            result_topic_suffix: "computed".to_string(),
        }
    }
}

/// How the scanner decides two files are the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    /// The file path
    #[default]
    Path,
    /// A BLAKE3 digest of the file contents
    Content,
}

impl IdentityMode {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "path" => Some(Self::Path),
            "content" | "hash" => Some(Self::Content),
            _ => None,
        }
    }
}

/// Scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Directories to watch (non-recursive)
    pub dirs: Vec<PathBuf>,

    /// Seconds to sleep between scan cycles
    pub interval_secs: u64,

    /// File identity used for deduplication
    pub identity: IdentityMode,

    /// Only pick up files with these extensions (empty = every file)
    pub extensions: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            interval_secs: 5,
            identity: IdentityMode::Path,
            extensions: Vec::new(),
        }
    }
}

impl ScannerConfig {
    /// Watched directories with `~` expanded; errors if none are configured.
    pub fn require_dirs(&self) -> Result<Vec<PathBuf>, ConfigError> {
        if self.dirs.is_empty() {
            return Err(ConfigError::Missing {
                setting: "scanner.dirs",
                env: "SCAN_DIRS",
            });
        }
        Ok(self.dirs.iter().map(|d| expand(d)).collect())
    }

    /// Pause between scan cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Sorter settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SorterConfig {
    /// Root directory that receives `<summary>/<id>.<format>` files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<PathBuf>,
}

impl SorterConfig {
    /// Target directory with `~` expanded; errors if it is not configured.
    pub fn require_target_dir(&self) -> Result<PathBuf, ConfigError> {
        self.target_dir
            .as_deref()
            .map(expand)
            .ok_or(ConfigError::Missing {
                setting: "sorter.target_dir",
                env: "TARGET_DIR",
            })
    }
}

/// Request correlator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// Seconds to wait for a reply before giving up
    pub timeout_secs: u64,

    /// Milliseconds between reply-queue polls
    pub poll_interval_ms: u64,

    /// Seconds a finished request stays visible before it is pruned
    pub retention_secs: u64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            poll_interval_ms: 1000,
            retention_secs: 600,
        }
    }
}

/// HTTP front-end settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind: String,

    /// Largest accepted upload in megabytes
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            max_upload_mb: 25,
        }
    }
}

impl ServerConfig {
    /// Upper bound accepted for `max_upload_mb`.
    pub const MAX_UPLOAD_MB: usize = 1024;

    /// Body limit in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,

    /// Optional file that receives a copy of every log line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

fn expand(path: &std::path::Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&path_str).into_owned())
}
