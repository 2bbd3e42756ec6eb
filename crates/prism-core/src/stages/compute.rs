//! Compute stage: consumes requests, derives the summary, publishes results.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::broker::{Channel, Connector, ExchangeKind};
use crate::config::RoutingConfig;
use crate::envelope::{peek_id, ComputeRequest, ComputeResult};
use crate::error::{PrismError, Result};
use crate::pipeline::ImageDecoder;
use crate::summary::compute_summary;

use super::SessionEnd;

pub struct ComputeStage {
    connector: Arc<dyn Connector>,
    routing: RoutingConfig,
    decoder: ImageDecoder,
    reconnect_delay: Duration,
}

impl ComputeStage {
    pub fn new(connector: Arc<dyn Connector>, routing: RoutingConfig) -> Self {
        Self {
            connector,
            routing,
            decoder: ImageDecoder::default(),
            reconnect_delay: Duration::from_secs(2),
        }
    }

    /// Pause before re-establishing a lost consumer.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Turn a raw request into its result. The id is carried over unchanged.
    pub async fn process(&self, raw: &[u8]) -> Result<ComputeResult> {
        let request = ComputeRequest::decode(raw)?;
        tracing::info!(
            "Processing image {:.1} kB",
            request.image.len() as f64 / 1000.0
        );

        let decoded = self.decoder.decode(request.image.clone()).await?;
        let summary = tokio::task::spawn_blocking(move || compute_summary(&decoded.image))
            .await
            .map_err(|e| std::io::Error::other(format!("Task join error: {}", e)))??;

        tracing::info!("Image processed, result: {}", summary);
        Ok(ComputeResult::from_request(request, summary))
    }

    /// Process one message and publish its result on `channel`.
    pub async fn handle(&self, channel: &dyn Channel, raw: &[u8]) -> Result<ComputeResult> {
        let result = self.process(raw).await?;
        let key = result.routing_key(&self.routing.result_topic_suffix);
        channel
            .publish(&self.routing.result_exchange, &key, &result.encode())
            .await?;
        tracing::debug!(
            "Message sent, exchange={}, key={}",
            self.routing.result_exchange,
            key
        );
        Ok(result)
    }

    /// Consume requests until `shutdown` is cancelled.
    ///
    /// A lost consumer is re-established; if the broker stays unreachable
    /// through the bounded connection attempts the error is returned.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        loop {
            match self.session(&shutdown).await? {
                SessionEnd::Shutdown => break,
                SessionEnd::StreamClosed => {
                    tracing::warn!(
                        "Request consumer closed, reconnecting in {:?}",
                        self.reconnect_delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
            }
        }
        tracing::info!("Compute stage stopped");
        Ok(())
    }

    async fn session(&self, shutdown: &CancellationToken) -> Result<SessionEnd> {
        let channel = self.connector.connect().await?;
        let outcome = self.consume(channel.as_ref(), shutdown).await;
        channel.close().await;
        outcome
    }

    async fn consume(&self, channel: &dyn Channel, shutdown: &CancellationToken) -> Result<SessionEnd> {
        let routing = &self.routing;
        channel
            .declare_exchange(&routing.request_exchange, ExchangeKind::Direct)
            .await?;
        channel
            .declare_exchange(&routing.result_exchange, ExchangeKind::Topic)
            .await?;
        let queue = channel.declare_queue(true).await?;
        channel
            .bind_queue(&queue, &routing.request_exchange, &routing.request_routing_key)
            .await?;
        let mut consumer = channel.consume(&queue).await?;

        tracing::info!("Waiting for images to be processed... To exit press CTRL+C");
        tracing::debug!(
            "Consuming: exchange={}, key={}, queue={}",
            routing.request_exchange,
            routing.request_routing_key,
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
            match self.handle(channel, &raw).instrument(span.clone()).await {
                Ok(_) => {}
                Err(e) if e.is_per_message() => {
                    span.in_scope(|| tracing::error!("Message handling failed: {}", e));
                }
                Err(PrismError::Broker(e)) => {
                    span.in_scope(|| tracing::error!("Result publish failed: {}", e));
                    return Ok(SessionEnd::StreamClosed);
                }
                Err(e) => {
                    span.in_scope(|| tracing::error!("Message handling failed: {}", e));
                }
            }
        }
    }
}
