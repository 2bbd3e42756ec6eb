//! Error types for the Prism pipeline.
//!
//! Errors are organized by concern. Per-message failures (`EnvelopeError`,
//! `ImageError`) are handled locally by the stage that hit them; broker and
//! configuration failures surface to whoever started the operation.

use thiserror::Error;

/// Top-level error type for Prism operations.
#[derive(Error, Debug)]
pub enum PrismError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Broker connection or transport errors
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Message envelope could not be decoded
    #[error("Malformed envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Payload present but not a valid image
    #[error("Invalid image: {0}")]
    Image(#[from] ImageError),

    /// A correlated wait ended without a result
    #[error("Correlation failed: {0}")]
    Correlation(#[from] CorrelationError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PrismError {
    /// Whether the error belongs to a single message and must not stop a stage.
    pub fn is_per_message(&self) -> bool {
        matches!(self, PrismError::Envelope(_) | PrismError::Image(_))
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// A setting the stage cannot run without is absent
    #[error("Missing required setting `{setting}` (set it in the config file or via {env})")]
    Missing {
        setting: &'static str,
        env: &'static str,
    },
}

/// Broker connection and transport errors.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Every connection attempt failed
    #[error("Broker unavailable after {attempts} attempt(s): {message}")]
    Unavailable { attempts: u32, message: String },

    /// An established connection or channel failed
    #[error("Broker transport error: {0}")]
    Transport(String),

    /// Publish or bind against an exchange that was never declared
    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    /// Operation on a queue that does not exist (or was auto-deleted)
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),
}

/// Envelope decoding errors (the `MalformedEnvelope` class).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Payload is not a JSON object
    #[error("payload is not a JSON object: {0}")]
    Parse(String),

    /// Required field is absent, null, not a string, or empty
    #[error("'{0}' field missing in message body")]
    MissingField(&'static str),

    /// Field present but its encoding is broken (e.g. bad base64)
    #[error("'{field}' field is not valid: {message}")]
    Encoding {
        field: &'static str,
        message: String,
    },

    /// Id cannot be used as a file name
    #[error("invalid correlation id: {0:?}")]
    InvalidId(String),

    /// Summary value is not a `#rrggbb`/`#rrggbbaa` token
    #[error("invalid summary value: {0:?}")]
    InvalidSummary(String),
}

/// Image validation errors (the `InvalidImage` class).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// No bytes at all
    #[error("image data is empty")]
    Empty,

    /// Bytes do not start with a known image signature
    #[error("unrecognized image format (invalid magic bytes)")]
    UnsupportedFormat,

    /// Decoder rejected the data
    #[error("cannot decode image: {0}")]
    Decode(String),

    /// Image exceeds the configured dimension limit
    #[error("image too large: {width}x{height} > {max_dim}")]
    TooLarge { width: u32, height: u32, max_dim: u32 },

    /// Channel means did not have an encodable arity or value
    #[error("invalid channel means: expected 3 or 4 finite values, got {0}")]
    Channels(usize),
}

/// Terminal failure states of a correlated wait.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// No reply arrived before the deadline
    #[error("timed out after {timeout_ms}ms waiting for the reply to {id}")]
    Timeout { id: String, timeout_ms: u64 },

    /// A reply arrived but could not be used
    #[error("received reply is not valid: {0}")]
    InvalidReply(String),

    /// The waiter could not talk to the broker
    #[error("broker failure while waiting: {0}")]
    Broker(String),

    /// The id is not (or no longer) tracked by this correlator
    #[error("unknown correlation id: {0}")]
    Unknown(String),
}

/// Convenience type alias for Prism results.
pub type Result<T> = std::result::Result<T, PrismError>;
