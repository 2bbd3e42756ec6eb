//! Message envelopes exchanged between stages.
//!
//! Wire shape (JSON):
//!
//! ```text
//! request: {"id": "<uuid>", "image": "<base64>"}
//! result:  {"id": "<uuid>", "image": "<base64>", "rgb": "#rrggbb"}
//! ```
//!
//! Decoding checks structure only: required fields must be present, strings
//! and non-empty, and `image` must be valid base64. Whether the bytes are an
//! image or `rgb` is a well-formed colour is for the caller to judge.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EnvelopeError;
use crate::summary::SummaryValue;

/// Opaque identifier threading one logical request through every message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh id (UUID v4).
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id can stand alone as a file name: ASCII letters, digits,
    /// `-` and `_` only, at most [`MAX_ID_LEN`] bytes.
    pub fn is_plain(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= MAX_ID_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }
}

/// Longest id accepted where the id becomes part of a path.
pub const MAX_ID_LEN: usize = 128;

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Best-effort id of a raw payload, for log context.
///
/// Only the `id` field is deserialized; the image is skipped unparsed.
pub fn peek_id(raw: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct IdOnly {
        id: Option<String>,
    }
    serde_json::from_slice::<IdOnly>(raw).ok()?.id
}

/// Routing key a result for `id` is published under: `"<id>.<suffix>"`.
pub fn result_routing_key(id: &CorrelationId, suffix: &str) -> String {
    format!("{}.{}", id, suffix)
}

/// Request to compute the summary of one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeRequest {
    pub id: CorrelationId,
    pub image: Vec<u8>,
}

/// Computed summary, addressed back to the originating request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeResult {
    pub id: CorrelationId,
    pub image: Vec<u8>,
    pub summary: SummaryValue,
}

#[derive(Serialize)]
struct WireOut<'a> {
    id: &'a str,
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rgb: Option<&'a str>,
}

/// Loosely typed view of an incoming payload so every field problem can be
/// reported as a `MissingField` rather than a serde message.
struct WireIn(serde_json::Map<String, serde_json::Value>);

impl WireIn {
    fn parse(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes)
            .map(Self)
            .map_err(|e| EnvelopeError::Parse(e.to_string()))
    }

    fn field(&self, name: &'static str) -> Result<&str, EnvelopeError> {
        required(name, self.0.get(name))
    }

    fn id(&self) -> Result<CorrelationId, EnvelopeError> {
        self.field("id").map(CorrelationId::from)
    }

    fn image(&self) -> Result<Vec<u8>, EnvelopeError> {
        let encoded = self.field("image")?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| EnvelopeError::Encoding {
                field: "image",
                message: e.to_string(),
            })
    }
}

fn required<'a>(
    field: &'static str,
    value: Option<&'a serde_json::Value>,
) -> Result<&'a str, EnvelopeError> {
    match value.and_then(serde_json::Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(EnvelopeError::MissingField(field)),
    }
}

fn encode_wire(id: &CorrelationId, image: &[u8], rgb: Option<&SummaryValue>) -> Vec<u8> {
    let wire = WireOut {
        id: id.as_str(),
        image: base64::engine::general_purpose::STANDARD.encode(image),
        rgb: rgb.map(SummaryValue::as_str),
    };
    // A struct of strings always serializes.
    serde_json::to_vec(&wire).unwrap_or_default()
}

impl ComputeRequest {
    pub fn new(id: CorrelationId, image: Vec<u8>) -> Self {
        Self { id, image }
    }

    /// Canonical JSON bytes.
    pub fn encode(&self) -> Vec<u8> {
        encode_wire(&self.id, &self.image, None)
    }

    /// Decode a request; `id` and `image` are required.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let wire = WireIn::parse(bytes)?;
        Ok(Self {
            id: wire.id()?,
            image: wire.image()?,
        })
    }
}

impl ComputeResult {
    /// Build the result for `request`, propagating its id.
    pub fn from_request(request: ComputeRequest, summary: SummaryValue) -> Self {
        Self {
            id: request.id,
            image: request.image,
            summary,
        }
    }

    /// Canonical JSON bytes.
    pub fn encode(&self) -> Vec<u8> {
        encode_wire(&self.id, &self.image, Some(&self.summary))
    }

    /// Decode a result; `id`, `image` and `rgb` are required.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let wire = WireIn::parse(bytes)?;
        let id = wire.id()?;
        let image = wire.image()?;
        let summary = wire.field("rgb")?;
        Ok(Self {
            id,
            image,
            summary: SummaryValue::from_wire(summary.to_string()),
        })
    }

    /// Routing key this result is published under.
    pub fn routing_key(&self, suffix: &str) -> String {
        result_routing_key(&self.id, suffix)
    }
}
