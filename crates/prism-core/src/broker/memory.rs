//! In-process broker.
//!
//! Implements the same exchange/queue/binding model as an AMQP server:
//! direct and topic exchanges, broker-named queues, exclusive queues that are
//! deleted with their connection, and unrouted messages silently dropped.
//!
//! Cloning an [`InMemoryBroker`] yields another handle to the same broker, so
//! several stages in one process (or one test) can share it.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::error::BrokerError;

use super::{topic, Channel, Connector, Consumer, ExchangeKind};

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    unavailable: AtomicBool,
    next_connection: AtomicU64,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Arc<Queue>>,
    next_queue: u64,
}

struct Exchange {
    kind: ExchangeKind,
    /// (queue, binding key)
    bindings: Vec<(String, String)>,
}

struct Queue {
    messages: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    deleted: AtomicBool,
    /// Owning connection for exclusive queues.
    owner: Option<u64>,
}

impl Queue {
    fn messages(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the broker going away (or coming back).
    ///
    /// While unavailable, new connections are refused and every operation on
    /// existing channels fails with a transport error.
    pub fn set_available(&self, available: bool) {
        self.shared.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Simulate a broker restart: every queue, binding and exchange is lost
    /// and open consumers see their stream end.
    pub fn restart(&self) {
        let mut state = self.state();
        for (_, queue) in state.queues.drain() {
            queue.messages().clear();
            queue.deleted.store(true, Ordering::SeqCst);
            queue.notify.notify_waiters();
        }
        state.exchanges.clear();
    }

    /// Number of queues currently declared.
    pub fn queue_count(&self) -> usize {
        self.state().queues.len()
    }

    /// Total messages waiting across all queues.
    pub fn pending_messages(&self) -> usize {
        self.state()
            .queues
            .values()
            .map(|q| q.messages().len())
            .sum()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_available(&self) -> Result<(), BrokerError> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            Err(BrokerError::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn queue(&self, name: &str) -> Result<Arc<Queue>, BrokerError> {
        self.state()
            .queues
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }

    /// Delete every exclusive queue owned by `connection`.
    fn drop_connection(&self, connection: u64) {
        let mut state = self.state();
        let owned: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(connection))
            .map(|(name, _)| name.clone())
            .collect();

        for name in owned {
            if let Some(queue) = state.queues.remove(&name) {
                queue.deleted.store(true, Ordering::SeqCst);
                queue.notify.notify_waiters();
            }
            for exchange in state.exchanges.values_mut() {
                exchange.bindings.retain(|(q, _)| *q != name);
            }
        }
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self) -> Result<Box<dyn Channel>, BrokerError> {
        self.ensure_available()?;
        let id = self.shared.next_connection.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryChannel {
            broker: self.clone(),
            connection: id,
        }))
    }

    fn describe(&self) -> String {
        "in-memory broker".to_string()
    }
}

struct MemoryChannel {
    broker: InMemoryBroker,
    connection: u64,
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.broker.drop_connection(self.connection);
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.broker.ensure_available()?;
        let mut state = self.broker.state();
        match state.exchanges.get(name) {
            Some(existing) if existing.kind != kind => Err(BrokerError::Transport(format!(
                "exchange {} already declared as {:?}",
                name, existing.kind
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(
                    name.to_string(),
                    Exchange {
                        kind,
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, exclusive: bool) -> Result<String, BrokerError> {
        self.broker.ensure_available()?;
        let mut state = self.broker.state();
        state.next_queue += 1;
        let name = format!("amq.gen-{}", state.next_queue);
        state.queues.insert(
            name.clone(),
            Arc::new(Queue {
                messages: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                deleted: AtomicBool::new(false),
                owner: exclusive.then_some(self.connection),
            }),
        );
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.broker.ensure_available()?;
        let mut state = self.broker.state();
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        let exchange = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;
        let binding = (queue.to_string(), routing_key.to_string());
        if !exchange.bindings.contains(&binding) {
            exchange.bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        self.broker.ensure_available()?;
        let state = self.broker.state();
        let exchange = state
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;

        // One copy per queue, however many of its bindings match.
        let mut targets: Vec<&str> = Vec::new();
        for (queue, key) in &exchange.bindings {
            let hit = match exchange.kind {
                ExchangeKind::Direct => key == routing_key,
                ExchangeKind::Topic => topic::matches(key, routing_key),
            };
            if hit && !targets.contains(&queue.as_str()) {
                targets.push(queue);
            }
        }

        for name in targets {
            if let Some(queue) = state.queues.get(name) {
                queue.messages().push_back(payload.to_vec());
                queue.notify.notify_one();
            }
        }
        Ok(())
    }

    async fn message_count(&self, queue: &str) -> Result<u32, BrokerError> {
        self.broker.ensure_available()?;
        let queue = self.broker.queue(queue)?;
        let len = queue.messages().len();
        Ok(u32::try_from(len).unwrap_or(u32::MAX))
    }

    async fn get_one(&self, queue: &str) -> Result<Option<Vec<u8>>, BrokerError> {
        self.broker.ensure_available()?;
        let queue = self.broker.queue(queue)?;
        let message = queue.messages().pop_front();
        Ok(message)
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>, BrokerError> {
        self.broker.ensure_available()?;
        let queue = self.broker.queue(queue)?;
        Ok(Box::new(MemoryConsumer {
            broker: self.broker.clone(),
            queue,
        }))
    }

    async fn close(self: Box<Self>) {
        // Exclusive queues go away in Drop.
    }
}

struct MemoryConsumer {
    broker: InMemoryBroker,
    queue: Arc<Queue>,
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn recv(&mut self) -> Option<Result<Vec<u8>, BrokerError>> {
        loop {
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Err(e) = self.broker.ensure_available() {
                return Some(Err(e));
            }
            if let Some(message) = self.queue.messages().pop_front() {
                return Some(Ok(message));
            }
            if self.queue.deleted.load(Ordering::SeqCst) {
                return None;
            }

            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn bound_queue(
        channel: &dyn Channel,
        exchange: &str,
        kind: ExchangeKind,
        key: &str,
    ) -> String {
        channel.declare_exchange(exchange, kind).await.unwrap();
        let queue = channel.declare_queue(true).await.unwrap();
        channel.bind_queue(&queue, exchange, key).await.unwrap();
        queue
    }

    #[tokio::test]
    async fn test_direct_routing() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        let queue = bound_queue(channel.as_ref(), "req", ExchangeKind::Direct, "compute").await;

        channel.publish("req", "compute", b"one").await.unwrap();
        channel.publish("req", "other", b"two").await.unwrap();

        assert_eq!(channel.message_count(&queue).await.unwrap(), 1);
        assert_eq!(channel.get_one(&queue).await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(channel.get_one(&queue).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_topic_fanout_to_every_match() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        let all = bound_queue(channel.as_ref(), "res", ExchangeKind::Topic, "#").await;
        let one = channel.declare_queue(true).await.unwrap();
        channel.bind_queue(&one, "res", "abc.computed").await.unwrap();

        channel.publish("res", "abc.computed", b"x").await.unwrap();
        channel.publish("res", "def.computed", b"y").await.unwrap();

        assert_eq!(channel.message_count(&all).await.unwrap(), 2);
        assert_eq!(channel.message_count(&one).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_bindings_deliver_once() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        let queue = bound_queue(channel.as_ref(), "res", ExchangeKind::Topic, "#").await;
        channel.bind_queue(&queue, "res", "*.computed").await.unwrap();

        channel.publish("res", "abc.computed", b"x").await.unwrap();
        assert_eq!(channel.message_count(&queue).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unrouted_messages_are_dropped() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel
            .declare_exchange("req", ExchangeKind::Direct)
            .await
            .unwrap();
        channel.publish("req", "compute", b"lost").await.unwrap();

        // A queue bound afterwards does not see it.
        let queue = channel.declare_queue(true).await.unwrap();
        channel.bind_queue(&queue, "req", "compute").await.unwrap();
        assert_eq!(channel.message_count(&queue).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_publish_to_unknown_exchange_fails() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        let err = channel.publish("nope", "k", b"x").await.unwrap_err();
        assert!(matches!(err, BrokerError::UnknownExchange(_)));
    }

    #[tokio::test]
    async fn test_redeclare_with_other_kind_fails() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel
            .declare_exchange("x", ExchangeKind::Direct)
            .await
            .unwrap();
        channel
            .declare_exchange("x", ExchangeKind::Direct)
            .await
            .unwrap();
        assert!(channel
            .declare_exchange("x", ExchangeKind::Topic)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_exclusive_queue_deleted_on_close() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        let queue = bound_queue(channel.as_ref(), "res", ExchangeKind::Topic, "#").await;
        assert_eq!(broker.queue_count(), 1);

        channel.close().await;
        assert_eq!(broker.queue_count(), 0);

        let other = broker.connect().await.unwrap();
        assert!(matches!(
            other.message_count(&queue).await,
            Err(BrokerError::UnknownQueue(_))
        ));
        // Its binding is gone too.
        other.publish("res", "abc.computed", b"x").await.unwrap();
        assert_eq!(broker.pending_messages(), 0);
    }

    #[tokio::test]
    async fn test_non_exclusive_queue_survives_close() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.declare_queue(false).await.unwrap();
        channel.close().await;
        assert_eq!(broker.queue_count(), 1);
    }

    #[tokio::test]
    async fn test_consumer_receives_later_publish() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        let queue = bound_queue(channel.as_ref(), "req", ExchangeKind::Direct, "compute").await;
        let mut consumer = channel.consume(&queue).await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let ch = publisher.connect().await.unwrap();
            ch.publish("req", "compute", b"late").await.unwrap();
            ch.close().await;
        });

        let got = tokio::time::timeout(Duration::from_secs(2), consumer.recv())
            .await
            .expect("consumer should wake up");
        assert_eq!(got.unwrap().unwrap(), b"late".to_vec());
    }

    #[tokio::test]
    async fn test_consumer_ends_when_queue_deleted() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        let queue = bound_queue(channel.as_ref(), "req", ExchangeKind::Direct, "compute").await;
        let mut consumer = channel.consume(&queue).await.unwrap();

        channel.close().await;
        let got = tokio::time::timeout(Duration::from_secs(2), consumer.recv())
            .await
            .expect("consumer should finish");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_restart_ends_consumers() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        let queue = bound_queue(channel.as_ref(), "res", ExchangeKind::Topic, "#").await;
        let mut consumer = channel.consume(&queue).await.unwrap();

        broker.restart();
        assert_eq!(broker.queue_count(), 0);
        let got = tokio::time::timeout(Duration::from_secs(2), consumer.recv())
            .await
            .expect("consumer should finish");
        assert!(got.is_none());
        assert!(matches!(
            channel.publish("res", "abc.computed", b"x").await,
            Err(BrokerError::UnknownExchange(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_broker() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        broker.set_available(false);

        assert!(broker.connect().await.is_err());
        assert!(matches!(
            channel.declare_exchange("x", ExchangeKind::Direct).await,
            Err(BrokerError::Transport(_))
        ));

        broker.set_available(true);
        assert!(broker.connect().await.is_ok());
    }
}
