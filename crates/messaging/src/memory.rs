use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};

use crate::{
    CommandPublisher, EventEnvelope, EventHandler, EventPublisher, EventSource, Headers,
    MessageHandler, MessagingError, Result, SubscriptionId, TransportMessage,
    TransportSubscriber,
};

/// Messages kept for inspection unless configured otherwise.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

type EventHandlers = Vec<(SubscriptionId, Arc<dyn EventHandler>)>;
type MessageHandlers = Vec<(SubscriptionId, Arc<dyn MessageHandler>)>;

/// Most recent published items, oldest dropped first.
#[derive(Clone)]
struct History<T> {
    items: Arc<RwLock<VecDeque<T>>>,
    capacity: usize,
}

impl<T: Clone> History<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: Arc::new(RwLock::new(VecDeque::new())),
            capacity,
        }
    }

    async fn push(&self, item: T) {
        if self.capacity == 0 {
            return;
        }
        let mut items = self.items.write().await;
        if items.len() == self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    async fn snapshot(&self) -> Vec<T> {
        self.items.read().await.iter().cloned().collect()
    }
}

/// In-process event bus.
///
/// Routes events by type to subscribed handlers without any serialization.
/// Handlers are snapshotted under the read lock and invoked after it is
/// released, so a handler may subscribe or unsubscribe while being called.
/// Delivery happens inline during `publish`.
#[derive(Clone)]
pub struct InMemoryEventBus {
    handlers: Arc<RwLock<HashMap<String, EventHandlers>>>,
    published: History<EventEnvelope>,
    next_id: Arc<AtomicU64>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self {
            handlers: Arc::default(),
            published: History::new(DEFAULT_HISTORY_CAPACITY),
            next_id: Arc::default(),
        }
    }
}

impl InMemoryEventBus {
    /// Creates a new bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `capacity` published events; zero keeps none.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.published = History::new(capacity);
        self
    }

    /// Delivers an event to every handler subscribed to its type.
    ///
    /// Returns the number of handlers the event was delivered to. Handler
    /// failures are logged and do not affect other handlers.
    pub async fn publish(&self, event: EventEnvelope) -> usize {
        let targets: Vec<_> = {
            let guard = self.handlers.read().await;
            guard
                .get(&event.event_type)
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };

        self.published.push(event.clone()).await;

        for handler in &targets {
            if let Err(e) = handler.handle(&event).await {
                tracing::warn!(
                    event_type = %event.event_type,
                    correlation_id = %event.correlation_id,
                    error = %e,
                    "event handler failed"
                );
            }
        }

        targets.len()
    }

    /// Returns the number of handlers subscribed to an event type.
    pub async fn subscriber_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Returns the retained published events, oldest first.
    pub async fn published_events(&self) -> Vec<EventEnvelope> {
        self.published.snapshot().await
    }
}

#[async_trait]
impl EventSource for InMemoryEventBus {
    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.handlers
            .write()
            .await
            .entry(event_type.to_string())
            .or_default()
            .push((id, handler));
        tracing::debug!(%event_type, subscription = %id, "bus subscription added");
        Ok(id)
    }

    async fn unsubscribe(&self, event_type: &str, subscription: SubscriptionId) -> Result<()> {
        let mut guard = self.handlers.write().await;
        if let Some(list) = guard.get_mut(event_type) {
            list.retain(|(id, _)| *id != subscription);
            if list.is_empty() {
                guard.remove(event_type);
            }
        }
        tracing::debug!(%event_type, %subscription, "bus subscription removed");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish_event(&self, event: EventEnvelope) -> Result<()> {
        self.publish(event).await;
        Ok(())
    }
}

/// Counts deliveries still running so callers can wait for quiet.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Held by a delivery task for as long as it runs.
struct DeliveryGuard(Arc<InFlight>);

impl DeliveryGuard {
    fn start(in_flight: &Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self(in_flight.clone())
    }
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// In-memory subject-based transport.
///
/// Stands in for NATS/Kafka/Redis in tests and single-process deployments.
/// `publish` returns once the message is accepted; every subscriber gets it
/// on its own task, so a slow or cancelled publisher never holds up or cuts
/// short a handler. No ordering holds between deliveries.
#[derive(Clone)]
pub struct InMemoryTransport {
    subscribers: Arc<RwLock<HashMap<String, MessageHandlers>>>,
    published: History<TransportMessage>,
    in_flight: Arc<InFlight>,
    fail_on_publish: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self {
            subscribers: Arc::default(),
            published: History::new(DEFAULT_HISTORY_CAPACITY),
            in_flight: Arc::default(),
            fail_on_publish: Arc::default(),
            next_id: Arc::default(),
        }
    }
}

impl InMemoryTransport {
    /// Creates a new transport with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `capacity` accepted messages; zero keeps none.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.published = History::new(capacity);
        self
    }

    /// Configures the transport to reject every publish.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of handlers subscribed to a subject.
    pub async fn subscriber_count(&self, subject: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(subject)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of deliveries whose handler has not returned yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Waits until no delivery is running, including deliveries started by
    /// handlers while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Returns the retained accepted messages, oldest first.
    pub async fn published_messages(&self) -> Vec<TransportMessage> {
        self.published.snapshot().await
    }

    /// Returns retained accepted messages for one subject.
    pub async fn messages_on(&self, subject: &str) -> Vec<TransportMessage> {
        self.published
            .snapshot()
            .await
            .into_iter()
            .filter(|m| m.subject == subject)
            .collect()
    }
}

#[async_trait]
impl CommandPublisher for InMemoryTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>, headers: Headers) -> Result<()> {
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(MessagingError::PublishRejected {
                subject: subject.to_string(),
                reason: "transport unavailable".to_string(),
            });
        }

        let message = Arc::new(TransportMessage {
            subject: subject.to_string(),
            payload,
            headers,
        });

        let targets: Vec<_> = {
            let guard = self.subscribers.read().await;
            guard
                .get(subject)
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };

        for handler in targets {
            let delivery = DeliveryGuard::start(&self.in_flight);
            let message = message.clone();
            tokio::spawn(async move {
                let _delivery = delivery;
                if let Err(e) = handler.handle(&message).await {
                    tracing::warn!(subject = %message.subject, error = %e, "transport handler failed");
                }
            });
        }

        self.published.push(message.as_ref().clone()).await;
        metrics::counter!("transport_messages_published_total").increment(1);
        Ok(())
    }
}

#[async_trait]
impl TransportSubscriber for InMemoryTransport {
    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId> {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.subscribers
            .write()
            .await
            .entry(subject.to_string())
            .or_default()
            .push((id, handler));
        Ok(id)
    }

    async fn unsubscribe(&self, subject: &str, subscription: SubscriptionId) -> Result<()> {
        let mut guard = self.subscribers.write().await;
        if let Some(list) = guard.get_mut(subject) {
            list.retain(|(id, _)| *id != subscription);
            if list.is_empty() {
                guard.remove(subject);
            }
        }
        Ok(())
    }
}
