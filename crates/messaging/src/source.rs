use std::sync::Arc;

use async_trait::async_trait;

use crate::{EventEnvelope, Result};

/// Handle identifying one subscription on an event source or transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a subscription id from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receives events delivered by an [`EventSource`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles a single delivered event.
    async fn handle(&self, event: &EventEnvelope) -> Result<()>;
}

/// "Subscribe by event type" semantics, satisfied either by an in-process
/// bus or by a transport adapter.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Subscribes a handler to one event type.
    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId>;

    /// Removes a previously registered subscription.
    ///
    /// Unsubscribing an unknown id is not an error.
    async fn unsubscribe(&self, event_type: &str, subscription: SubscriptionId) -> Result<()>;
}

/// Emits events to whoever is listening.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event.
    async fn publish_event(&self, event: EventEnvelope) -> Result<()>;
}
