//! Request correlator: submit one image, get its summary back by id.
//!
//! Every submission gets a fresh [`CorrelationId`] and its own waiter task.
//! The waiter binds a private exclusive queue to `"<id>.<suffix>"` on the
//! result exchange *before* publishing the request, so a fast reply cannot be
//! routed before anyone listens for it. It then polls that queue until a reply
//! arrives or the deadline passes and writes exactly one terminal state into
//! the entry's result slot.
//!
//! The pending-wait table belongs to the correlator instance; independent
//! correlators never see each other's requests.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::broker::{Channel, Connector, ExchangeKind};
use crate::config::{CorrelatorConfig, RoutingConfig};
use crate::envelope::{result_routing_key, ComputeRequest, ComputeResult, CorrelationId};
use crate::error::{BrokerError, CorrelationError, ImageError, Result};
use crate::summary::SummaryValue;

/// Timing knobs for a correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorOptions {
    /// How long a waiter listens for its reply
    pub timeout: Duration,
    /// Pause between reply-queue polls
    pub poll_interval: Duration,
    /// How long a finished entry stays visible
    pub retention: Duration,
}

impl Default for CorrelatorOptions {
    fn default() -> Self {
        Self::from(&CorrelatorConfig::default())
    }
}

impl From<&CorrelatorConfig> for CorrelatorOptions {
    fn from(config: &CorrelatorConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            retention: Duration::from_secs(config.retention_secs),
        }
    }
}

/// Lifecycle of one submitted request. Terminal states never change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitState {
    Pending,
    Completed(SummaryValue),
    Failed(CorrelationError),
}

impl WaitState {
    pub fn is_pending(&self) -> bool {
        matches!(self, WaitState::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            WaitState::Pending => "pending",
            WaitState::Completed(_) => "completed",
            WaitState::Failed(_) => "failed",
        }
    }
}

/// Serializable view of one entry.
#[derive(Debug, Clone, Serialize)]
pub struct WaitSnapshot {
    pub id: CorrelationId,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    pub size_kb: f64,
    pub elapsed_ms: u64,
}

struct PendingWait {
    queue: Arc<OnceLock<String>>,
    submitted: Instant,
    finished: Arc<OnceLock<Instant>>,
    size: usize,
    slot: watch::Receiver<WaitState>,
    task: JoinHandle<()>,
}

impl PendingWait {
    fn snapshot(&self, id: &CorrelationId) -> WaitSnapshot {
        let state = self.slot.borrow().clone();
        let (summary, error) = match &state {
            WaitState::Pending => (None, None),
            WaitState::Completed(s) => (Some(s.clone()), None),
            WaitState::Failed(e) => (None, Some(e.to_string())),
        };
        let end = self.finished.get().copied().unwrap_or_else(Instant::now);
        WaitSnapshot {
            id: id.clone(),
            state: state.label(),
            summary,
            error,
            queue: self.queue.get().cloned(),
            size_kb: self.size as f64 / 1000.0,
            elapsed_ms: end.duration_since(self.submitted).as_millis() as u64,
        }
    }
}

pub struct Correlator {
    connector: Arc<dyn Connector>,
    routing: RoutingConfig,
    options: CorrelatorOptions,
    table: Mutex<HashMap<CorrelationId, PendingWait>>,
}

impl Correlator {
    pub fn new(
        connector: Arc<dyn Connector>,
        routing: RoutingConfig,
        options: CorrelatorOptions,
    ) -> Self {
        Self {
            connector,
            routing,
            options,
            table: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> CorrelatorOptions {
        self.options
    }

    fn table(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingWait>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a request for `image` and return its id immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, image: Vec<u8>) -> Result<CorrelationId> {
        if image.is_empty() {
            return Err(ImageError::Empty.into());
        }

        let id = CorrelationId::new();
        let size = image.len();
        let (sender, slot) = watch::channel(WaitState::Pending);
        let queue = Arc::new(OnceLock::new());
        let finished = Arc::new(OnceLock::new());

        let waiter = Waiter {
            connector: self.connector.clone(),
            routing: self.routing.clone(),
            poll_interval: self.options.poll_interval,
            timeout: self.options.timeout,
            deadline: tokio::time::Instant::now() + self.options.timeout,
            request: ComputeRequest::new(id.clone(), image),
            queue: queue.clone(),
        };

        let span = tracing::info_span!("request", id = %id);
        let done = finished.clone();
        let task = tokio::spawn(
            async move {
                let state = waiter.run().await;
                match &state {
                    WaitState::Completed(summary) => tracing::info!("Completed: {}", summary),
                    WaitState::Failed(e) => tracing::warn!("Failed: {}", e),
                    WaitState::Pending => {}
                }
                let _ = done.set(Instant::now());
                sender.send_replace(state);
            }
            .instrument(span),
        );

        let previous = self.table().insert(
            id.clone(),
            PendingWait {
                queue,
                submitted: Instant::now(),
                finished,
                size,
                slot,
                task,
            },
        );
        debug_assert!(previous.is_none(), "correlation id reused: {}", id);

        tracing::debug!("Submitted {} ({} bytes)", id, size);
        Ok(id)
    }

    /// Current state of `id`, if it is tracked.
    pub fn status(&self, id: &CorrelationId) -> Option<WaitState> {
        self.table().get(id).map(|w| w.slot.borrow().clone())
    }

    pub fn snapshot(&self, id: &CorrelationId) -> Option<WaitSnapshot> {
        self.table().get(id).map(|w| w.snapshot(id))
    }

    /// Every tracked entry, oldest first.
    pub fn snapshots(&self) -> Vec<WaitSnapshot> {
        let table = self.table();
        let mut entries: Vec<(&CorrelationId, &PendingWait)> = table.iter().collect();
        entries.sort_by_key(|(_, w)| w.submitted);
        entries.into_iter().map(|(id, w)| w.snapshot(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Wait until `id` reaches a terminal state.
    pub async fn wait(&self, id: &CorrelationId) -> std::result::Result<SummaryValue, CorrelationError> {
        let mut slot = self
            .table()
            .get(id)
            .map(|w| w.slot.clone())
            .ok_or_else(|| CorrelationError::Unknown(id.to_string()))?;

        let state = slot
            .wait_for(|s| !s.is_pending())
            .await
            .map(|s| s.clone())
            .map_err(|_| CorrelationError::Broker("waiter stopped before a reply".to_string()))?;

        match state {
            WaitState::Completed(summary) => Ok(summary),
            WaitState::Failed(e) => Err(e),
            WaitState::Pending => Err(CorrelationError::Unknown(id.to_string())),
        }
    }

    /// Forget `id`. A still-running waiter is stopped.
    pub fn retire(&self, id: &CorrelationId) -> bool {
        match self.table().remove(id) {
            Some(wait) => {
                wait.task.abort();
                true
            }
            None => false,
        }
    }

    /// Drop finished entries older than the retention period.
    pub fn prune_finished(&self) -> usize {
        let retention = self.options.retention;
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, w| match w.finished.get() {
            Some(at) => at.elapsed() < retention,
            None => true,
        });
        let removed = before - table.len();
        if removed > 0 {
            tracing::debug!("Pruned {} finished request(s)", removed);
        }
        removed
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        for (_, wait) in self.table().drain() {
            wait.task.abort();
        }
    }
}

/// Everything one waiter task needs.
struct Waiter {
    connector: Arc<dyn Connector>,
    routing: RoutingConfig,
    poll_interval: Duration,
    timeout: Duration,
    deadline: tokio::time::Instant,
    request: ComputeRequest,
    queue: Arc<OnceLock<String>>,
}

impl Waiter {
    async fn run(self) -> WaitState {
        let channel = match self.connector.connect().await {
            Ok(channel) => channel,
            Err(e) => return broker_failure(e),
        };
        let state = match self.setup(channel.as_ref()).await {
            Ok(queue) => self.poll(channel.as_ref(), &queue).await,
            Err(e) => broker_failure(e),
        };
        channel.close().await;
        state
    }

    /// Listen first, then send.
    async fn setup(&self, channel: &dyn Channel) -> std::result::Result<String, BrokerError> {
        let routing = &self.routing;
        channel
            .declare_exchange(&routing.result_exchange, ExchangeKind::Topic)
            .await?;
        let queue = channel.declare_queue(true).await?;
        let _ = self.queue.set(queue.clone());

        let key = result_routing_key(&self.request.id, &routing.result_topic_suffix);
        channel
            .bind_queue(&queue, &routing.result_exchange, &key)
            .await?;
        tracing::debug!("Listening on {} for {}", queue, key);

        channel
            .declare_exchange(&routing.request_exchange, ExchangeKind::Direct)
            .await?;
        channel
            .publish(
                &routing.request_exchange,
                &routing.request_routing_key,
                &self.request.encode(),
            )
            .await?;
        tracing::debug!(
            "Request sent, exchange={}, key={}",
            routing.request_exchange,
            routing.request_routing_key
        );
        Ok(queue)
    }

    async fn poll(&self, channel: &dyn Channel, queue: &str) -> WaitState {
        loop {
            match channel.message_count(queue).await {
                Ok(0) => {}
                Ok(_) => match channel.get_one(queue).await {
                    Ok(Some(raw)) => return self.accept(&raw),
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Reply fetch failed, retrying: {}", e),
                },
                Err(e) => tracing::warn!("Reply poll failed, retrying: {}", e),
            }

            let now = tokio::time::Instant::now();
            if now >= self.deadline {
                return WaitState::Failed(CorrelationError::Timeout {
                    id: self.request.id.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.poll_interval.min(self.deadline - now)).await;
        }
    }

    fn accept(&self, raw: &[u8]) -> WaitState {
        let reply = match ComputeResult::decode(raw) {
            Ok(reply) => reply,
            Err(e) => return WaitState::Failed(CorrelationError::InvalidReply(e.to_string())),
        };
        if reply.id != self.request.id {
            return WaitState::Failed(CorrelationError::InvalidReply(format!(
                "reply carries id {}",
                reply.id
            )));
        }
        match SummaryValue::parse(reply.summary.as_str()) {
            Ok(summary) => WaitState::Completed(summary),
            Err(e) => WaitState::Failed(CorrelationError::InvalidReply(e.to_string())),
        }
    }
}

fn broker_failure(error: BrokerError) -> WaitState {
    WaitState::Failed(CorrelationError::Broker(error.to_string()))
}
