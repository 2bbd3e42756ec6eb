//! AMQP 0-9-1 transport backed by `lapin`.
//!
//! One [`Connector::connect`] call opens one TCP connection with one channel,
//! matching the scoped-connection discipline of the stages.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicGetOptions, BasicPublishOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};

use crate::error::BrokerError;

use super::{Channel, Connector, Consumer, ExchangeKind};

/// Connects to an AMQP server by URI.
pub struct AmqpConnector {
    uri: String,
}

impl AmqpConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

fn transport(error: lapin::Error) -> BrokerError {
    BrokerError::Transport(error.to_string())
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self) -> Result<Box<dyn Channel>, BrokerError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(transport)?;
        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(200, "OK").await;
                return Err(transport(e));
            }
        };
        tracing::trace!("Opened AMQP channel {} on {}", channel.id(), self.uri);
        Ok(Box::new(AmqpChannel {
            connection,
            channel,
        }))
    }

    fn describe(&self) -> String {
        self.uri.clone()
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        let kind = match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        };
        self.channel
            .exchange_declare(
                name,
                kind,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(transport)
    }

    async fn declare_queue(&self, exclusive: bool) -> Result<String, BrokerError> {
        let queue = self
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive,
                    auto_delete: exclusive,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(transport)?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(transport)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default(),
            )
            .await
            .map_err(transport)?
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn message_count(&self, queue: &str) -> Result<u32, BrokerError> {
        // A passive declare reports the ready count without touching the queue.
        let queue = self
            .channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(transport)?;
        Ok(queue.message_count())
    }

    async fn get_one(&self, queue: &str) -> Result<Option<Vec<u8>>, BrokerError> {
        let message = self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: true })
            .await
            .map_err(transport)?;
        Ok(message.map(|m| m.delivery.data))
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(transport)?;
        Ok(Box::new(AmqpConsumer { inner: consumer }))
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.channel.close(200, "OK").await {
            tracing::debug!("Channel close: {}", e);
        }
        if let Err(e) = self.connection.close(200, "OK").await {
            tracing::debug!("Connection close: {}", e);
        }
    }
}

struct AmqpConsumer {
    inner: lapin::Consumer,
}

#[async_trait]
impl Consumer for AmqpConsumer {
    async fn recv(&mut self) -> Option<Result<Vec<u8>, BrokerError>> {
        self.inner
            .next()
            .await
            .map(|delivery| delivery.map(|d| d.data).map_err(transport))
    }
}
