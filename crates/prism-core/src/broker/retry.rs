//! Bounded connection retries.
//!
//! Connection establishment is retried a fixed number of times with a fixed
//! delay. Once an operation has a channel, failures are not retried here; the
//! enclosing loop decides what to do next.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::BrokerConfig;
use crate::error::BrokerError;

use super::{Channel, Connector};

/// Wraps a connector with bounded, fixed-delay connection attempts.
pub struct RetryingConnector<C> {
    inner: C,
    attempts: u32,
    delay: Duration,
}

impl<C: Connector> RetryingConnector<C> {
    pub fn new(inner: C, attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn from_config(inner: C, config: &BrokerConfig) -> Self {
        Self::new(inner, config.connection_attempts, config.retry_delay())
    }
}

#[async_trait]
impl<C: Connector> Connector for RetryingConnector<C> {
    async fn connect(&self) -> Result<Box<dyn Channel>, BrokerError> {
        let mut last_error = String::new();
        for attempt in 1..=self.attempts {
            if attempt > 1 {
                tracing::debug!(
                    "Retry {}/{} connecting to {} after {:?}",
                    attempt,
                    self.attempts,
                    self.inner.describe(),
                    self.delay
                );
                tokio::time::sleep(self.delay).await;
            }
            match self.inner.connect().await {
                Ok(channel) => return Ok(channel),
                Err(e) => {
                    last_error = e.to_string();
                    if !is_retryable(&e) {
                        break;
                    }
                }
            }
        }
        Err(BrokerError::Unavailable {
            attempts: self.attempts,
            message: last_error,
        })
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

/// Whether a connection failure is worth another attempt.
///
/// Transport-level failures are; protocol errors about missing exchanges or
/// queues will not fix themselves.
pub fn is_retryable(error: &BrokerError) -> bool {
    matches!(
        error,
        BrokerError::Unavailable { .. } | BrokerError::Transport(_)
    )
}
