//! Message broker client abstraction.
//!
//! Stages talk to the broker only through these traits, so the same code runs
//! against an AMQP server in production and against [`memory::InMemoryBroker`]
//! in tests.
//!
//! A [`Connector`] hands out one [`Channel`] per operation. Callers close the
//! channel when the operation ends, on success and on failure alike; exclusive
//! queues declared on it disappear with it.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;
pub mod retry;
pub mod topic;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::BrokerConfig;
use crate::error::BrokerError;

pub use memory::InMemoryBroker;
pub use retry::RetryingConnector;

/// Exchange routing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Exact routing-key match
    Direct,
    /// Pattern match (`*` one word, `#` zero or more words)
    Topic,
}

/// Opens broker connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection with a single channel on it.
    async fn connect(&self) -> Result<Box<dyn Channel>, BrokerError>;

    /// Human-readable target (for logs).
    fn describe(&self) -> String;
}

/// One open connection/channel pair.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declare an exchange (idempotent for the same kind).
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError>;

    /// Declare a queue with a broker-assigned name and return that name.
    ///
    /// Exclusive queues belong to this channel's connection and are deleted
    /// when it closes.
    async fn declare_queue(&self, exclusive: bool) -> Result<String, BrokerError>;

    /// Route messages published to `exchange` under `routing_key` into `queue`.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Publish a payload.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError>;

    /// Number of messages ready in `queue`.
    async fn message_count(&self, queue: &str) -> Result<u32, BrokerError>;

    /// Take one message from `queue` if there is one (auto-acknowledged).
    async fn get_one(&self, queue: &str) -> Result<Option<Vec<u8>>, BrokerError>;

    /// Start consuming `queue` (auto-acknowledged).
    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>, BrokerError>;

    /// Close the channel and its connection.
    async fn close(self: Box<Self>);
}

/// A stream of deliveries from one queue.
#[async_trait]
pub trait Consumer: Send {
    /// Next payload; `None` once the queue or connection is gone.
    async fn recv(&mut self) -> Option<Result<Vec<u8>, BrokerError>>;
}

/// Build the production connector for `config`, wrapped in the bounded retry.
#[cfg(feature = "amqp")]
pub fn connector_from_config(config: &BrokerConfig) -> Arc<dyn Connector> {
    Arc::new(RetryingConnector::from_config(
        amqp::AmqpConnector::new(config.uri()),
        config,
    ))
}

/// Without the `amqp` feature the only broker is in-process.
#[cfg(not(feature = "amqp"))]
pub fn connector_from_config(config: &BrokerConfig) -> Arc<dyn Connector> {
    tracing::warn!(
        "Built without the `amqp` feature; using an in-process broker instead of {}:{}",
        config.host,
        config.port
    );
    Arc::new(RetryingConnector::from_config(InMemoryBroker::new(), config))
}
