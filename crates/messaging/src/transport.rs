use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Result, SubscriptionId};

/// Transport headers. Ordered so that logs and tests are stable.
pub type Headers = BTreeMap<String, String>;

/// Standard header names attached to every outbound command.
pub mod headers {
    pub const COMMAND_ID: &str = "command_id";
    pub const CORRELATION_ID: &str = "correlation_id";
    pub const CAUSATION_ID: &str = "causation_id";
    /// RFC3339 creation time of the command.
    pub const TIMESTAMP: &str = "timestamp";
    pub const COMMAND_NAME: &str = "command_name";
    pub const CONTENT_TYPE: &str = "content_type";
    pub const EVENT_TYPE: &str = "event_type";
}

/// A raw message as seen by a subject-based transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl TransportMessage {
    /// Returns a header value, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Publishes raw payloads onto subjects (NATS, Kafka, Redis streams, memory).
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Publishes a payload with headers. Fire-and-forget: returns once the
    /// transport has accepted the message.
    async fn publish(&self, subject: &str, payload: Vec<u8>, headers: Headers) -> Result<()>;
}

/// Receives raw transport messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &TransportMessage) -> Result<()>;
}

/// Subject-based subscription side of a transport.
#[async_trait]
pub trait TransportSubscriber: Send + Sync {
    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId>;

    async fn unsubscribe(&self, subject: &str, subscription: SubscriptionId) -> Result<()>;
}
