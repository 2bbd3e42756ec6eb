//! Sorter stage: files each computed image under a directory named by its
//! summary value.
//!
//! Layout: `<target_dir>/<summary>/<id>.<format>`. Redelivered results land on
//! the same path and overwrite it. Ids that are not a plain file stem are
//! rejected before anything touches the disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::ImageFormat;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::broker::{Channel, Connector, ExchangeKind};
use crate::config::{RoutingConfig, SorterConfig};
use crate::envelope::{peek_id, ComputeResult, CorrelationId};
use crate::error::{ConfigError, EnvelopeError, ImageError, Result};
use crate::pipeline::{format_extension, ImageDecoder};
use crate::summary::SummaryValue;

use super::SessionEnd;

/// Binding that receives every result.
pub const ALL_RESULTS: &str = "#";

pub struct Sorter {
    connector: Arc<dyn Connector>,
    routing: RoutingConfig,
    root: PathBuf,
    decoder: ImageDecoder,
    reconnect_delay: Duration,
}

impl Sorter {
    /// Build a sorter, creating the target directory if needed.
    pub fn new(
        connector: Arc<dyn Connector>,
        routing: RoutingConfig,
        config: &SorterConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let root = config.require_target_dir()?;
        if root.is_file() {
            return Err(ConfigError::ValidationError(format!(
                "Target directory {} is a file",
                root.display()
            )));
        }
        std::fs::create_dir_all(&root).map_err(|e| {
            ConfigError::ValidationError(format!(
                "Cannot create target directory {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self {
            connector,
            routing,
            root,
            decoder: ImageDecoder::default(),
            reconnect_delay: Duration::from_secs(2),
        })
    }

    /// Pause before re-establishing a lost consumer.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Decode a result and make sure its id and summary are safe to use as
    /// path components.
    pub fn validate_body(raw: &[u8]) -> std::result::Result<ComputeResult, EnvelopeError> {
        let result = ComputeResult::decode(raw)?;
        if !result.id.is_plain() {
            return Err(EnvelopeError::InvalidId(result.id.to_string()));
        }
        let summary = SummaryValue::parse(result.summary.as_str())?;
        Ok(ComputeResult { summary, ..result })
    }

    /// Check that the bytes are a recognizable image and return its format.
    pub fn validate_image(&self, bytes: &[u8]) -> std::result::Result<ImageFormat, ImageError> {
        self.decoder.inspect(bytes)
    }

    /// Write the image to `<root>/<summary>/<id>.<ext>`.
    pub async fn persist(
        &self,
        id: &CorrelationId,
        summary: &SummaryValue,
        image: &[u8],
        format: ImageFormat,
    ) -> std::io::Result<PathBuf> {
        let dir = self.root.join(summary.as_str());
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.{}", id, format_extension(format)));
        tokio::fs::write(&path, image).await?;
        tracing::info!("Saving: {}", path.display());
        Ok(path)
    }

    /// Validate and persist one result message.
    pub async fn handle(&self, raw: &[u8]) -> Result<PathBuf> {
        let result = Self::validate_body(raw)?;
        let format = self.validate_image(&result.image)?;
        let path = self
            .persist(&result.id, &result.summary, &result.image, format)
            .await?;
        Ok(path)
    }

    /// Consume every result until `shutdown` is cancelled.
    ///
    /// A lost consumer is re-established after the reconnect delay; if the
    /// broker stays unreachable through the bounded connection attempts the
    /// error is returned.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        loop {
            match self.session(&shutdown).await? {
                SessionEnd::Shutdown => break,
                SessionEnd::StreamClosed => {
                    tracing::warn!(
                        "Result consumer closed, reconnecting in {:?}",
                        self.reconnect_delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
            }
        }
        tracing::info!("Sorter stopped");
        Ok(())
    }

    async fn session(&self, shutdown: &CancellationToken) -> Result<SessionEnd> {
        let channel = self.connector.connect().await?;
        let outcome = self.consume(channel.as_ref(), shutdown).await;
        channel.close().await;
        outcome
    }

    async fn consume(&self, channel: &dyn Channel, shutdown: &CancellationToken) -> Result<SessionEnd> {
        let exchange = &self.routing.result_exchange;
        channel.declare_exchange(exchange, ExchangeKind::Topic).await?;
        let queue = channel.declare_queue(true).await?;
        channel.bind_queue(&queue, exchange, ALL_RESULTS).await?;
        let mut consumer = channel.consume(&queue).await?;

        tracing::info!("Waiting for images to be sorted... To exit press CTRL+C");
        tracing::debug!(
            "Consuming: exchange={}, topic={}, queue={}",
            exchange,
            ALL_RESULTS,
            queue
        );

        loop {
            let message = tokio::select! {
                m = consumer.recv() => m,
                _ = shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
            };
            let raw = match message {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => {
                    tracing::warn!("Consumer error: {}", e);
                    return Ok(SessionEnd::StreamClosed);
                }
                None => return Ok(SessionEnd::StreamClosed),
            };

            let id = peek_id(&raw).unwrap_or_else(|| "-".into());
            let span = tracing::info_span!("request", %id);
            if let Err(e) = self.handle(&raw).instrument(span.clone()).await {
                span.in_scope(|| tracing::error!("Message handling failed: {}", e));
            }
        }
    }
}
