use std::sync::Arc;

use async_trait::async_trait;
use common::{CausationId, CorrelationId};

use crate::{
    CommandPublisher, EventEnvelope, EventHandler, EventPublisher, EventSource, Headers,
    MessageHandler, MessagingError, Result, Serializer, SubjectResolver, SubscriptionId,
    TransportMessage, TransportSubscriber, headers,
};

/// Adapts a subject-based transport into an [`EventSource`].
///
/// Event types are mapped onto subjects with the [`SubjectResolver`]; inbound
/// bytes are decoded into an [`EventEnvelope`] shell. Decoding the typed
/// payload is left to the caller.
#[derive(Clone)]
pub struct TransportEventSource {
    transport: Arc<dyn TransportSubscriber>,
    resolver: Arc<dyn SubjectResolver>,
    serializer: Arc<dyn Serializer>,
}

impl TransportEventSource {
    pub fn new(
        transport: Arc<dyn TransportSubscriber>,
        resolver: Arc<dyn SubjectResolver>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            transport,
            resolver,
            serializer,
        }
    }
}

#[async_trait]
impl EventSource for TransportEventSource {
    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        let subject = self.resolver.event_subject(event_type);
        let decoder = Arc::new(EnvelopeDecoder {
            event_type: event_type.to_string(),
            serializer: self.serializer.clone(),
            handler,
        });
        let id = self.transport.subscribe(&subject, decoder).await?;
        tracing::debug!(
            %event_type,
            %subject,
            subscription = %id,
            "transport event subscription added"
        );
        Ok(id)
    }

    async fn unsubscribe(&self, event_type: &str, subscription: SubscriptionId) -> Result<()> {
        let subject = self.resolver.event_subject(event_type);
        self.transport.unsubscribe(&subject, subscription).await
    }
}

/// Turns raw transport messages into envelopes for one event type.
struct EnvelopeDecoder {
    event_type: String,
    serializer: Arc<dyn Serializer>,
    handler: Arc<dyn EventHandler>,
}

impl EnvelopeDecoder {
    fn decode(&self, message: &TransportMessage) -> Result<EventEnvelope> {
        let value = self.serializer.deserialize(&message.payload)?;
        if !value.is_object() {
            return Err(MessagingError::InvalidMessage(format!(
                "expected an event object on '{}'",
                message.subject
            )));
        }

        let mut envelope: EventEnvelope = serde_json::from_value(value)?;

        // Headers fill in what a sparse producer left out of the body.
        if envelope.event_type.is_empty() {
            envelope.event_type = message
                .header(headers::EVENT_TYPE)
                .unwrap_or(&self.event_type)
                .to_string();
        }
        if envelope.correlation_id.is_empty()
            && let Some(cid) = message.header(headers::CORRELATION_ID)
        {
            envelope.correlation_id = CorrelationId::from(cid);
        }
        if envelope.causation_id.is_none()
            && let Some(causation) = message.header(headers::CAUSATION_ID)
        {
            envelope.causation_id = Some(CausationId::from(causation));
        }

        Ok(envelope)
    }
}

#[async_trait]
impl MessageHandler for EnvelopeDecoder {
    async fn handle(&self, message: &TransportMessage) -> Result<()> {
        match self.decode(message) {
            Ok(envelope) => self.handler.handle(&envelope).await,
            Err(e) => {
                // Malformed messages are dropped; the waiter side times out.
                tracing::warn!(subject = %message.subject, error = %e, "dropping undecodable event");
                Ok(())
            }
        }
    }
}

/// Publishes envelopes onto event subjects of a transport.
#[derive(Clone)]
pub struct TransportEventPublisher {
    publisher: Arc<dyn CommandPublisher>,
    resolver: Arc<dyn SubjectResolver>,
    serializer: Arc<dyn Serializer>,
}

impl TransportEventPublisher {
    pub fn new(
        publisher: Arc<dyn CommandPublisher>,
        resolver: Arc<dyn SubjectResolver>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            publisher,
            resolver,
            serializer,
        }
    }
}

#[async_trait]
impl EventPublisher for TransportEventPublisher {
    async fn publish_event(&self, event: EventEnvelope) -> Result<()> {
        let subject = self.resolver.event_subject(&event.event_type);

        let mut message_headers = Headers::new();
        message_headers.insert(headers::EVENT_TYPE.to_string(), event.event_type.clone());
        message_headers.insert(
            headers::CORRELATION_ID.to_string(),
            event.correlation_id.to_string(),
        );
        if let Some(causation) = &event.causation_id {
            message_headers.insert(headers::CAUSATION_ID.to_string(), causation.to_string());
        }
        message_headers.insert(
            headers::CONTENT_TYPE.to_string(),
            self.serializer.content_type().to_string(),
        );

        let payload = crate::encode(self.serializer.as_ref(), &event)?;
        self.publisher.publish(&subject, payload, message_headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryTransport, JsonSerializer, PrefixSubjectResolver};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Collecting {
        events: Mutex<Vec<EventEnvelope>>,
    }

    #[async_trait]
    impl EventHandler for Collecting {
        async fn handle(&self, event: &EventEnvelope) -> Result<()> {
            self.events.lock().await.push(event.clone());
            Ok(())
        }
    }

    fn wire(transport: &InMemoryTransport) -> (TransportEventSource, TransportEventPublisher) {
        let resolver: Arc<dyn SubjectResolver> = Arc::new(PrefixSubjectResolver::new("events"));
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);
        let source = TransportEventSource::new(
            Arc::new(transport.clone()),
            resolver.clone(),
            serializer.clone(),
        );
        let publisher =
            TransportEventPublisher::new(Arc::new(transport.clone()), resolver, serializer);
        (source, publisher)
    }

    #[tokio::test]
    async fn test_published_event_reaches_subscriber_on_resolved_subject() {
        let transport = InMemoryTransport::new();
        let (source, publisher) = wire(&transport);
        let collector = Arc::new(Collecting::default());
        source.subscribe("Done", collector.clone()).await.unwrap();
        assert_eq!(transport.subscriber_count("events.Done").await, 1);

        let cid = CorrelationId::from("c-1");
        publisher
            .publish_event(EventEnvelope::new("Done", cid.clone(), serde_json::json!({"ok": true})))
            .await
            .unwrap();
        transport.wait_idle().await;

        let events = collector.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, cid);
        assert_eq!(events[0].payload["ok"], true);

        let sent = transport.messages_on("events.Done").await;
        assert_eq!(sent[0].header(headers::CORRELATION_ID), Some("c-1"));
    }

    #[tokio::test]
    async fn test_sparse_message_is_completed_from_headers() {
        let transport = InMemoryTransport::new();
        let (source, _) = wire(&transport);
        let collector = Arc::new(Collecting::default());
        source.subscribe("Done", collector.clone()).await.unwrap();

        let mut message_headers = Headers::new();
        message_headers.insert(headers::CORRELATION_ID.to_string(), "from-header".to_string());
        transport
            .publish("events.Done", br#"{"payload": 1}"#.to_vec(), message_headers)
            .await
            .unwrap();
        transport.wait_idle().await;

        let events = collector.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "Done");
        assert_eq!(events[0].correlation_id.as_str(), "from-header");
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let transport = InMemoryTransport::new();
        let (source, _) = wire(&transport);
        let collector = Arc::new(Collecting::default());
        source.subscribe("Done", collector.clone()).await.unwrap();

        transport
            .publish("events.Done", b"[1,2,3]".to_vec(), Headers::new())
            .await
            .unwrap();
        transport.wait_idle().await;

        assert!(collector.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_transport_subscription() {
        let transport = InMemoryTransport::new();
        let (source, _) = wire(&transport);
        let id = source
            .subscribe("Done", Arc::new(Collecting::default()))
            .await
            .unwrap();

        source.unsubscribe("Done", id).await.unwrap();
        assert_eq!(transport.subscriber_count("events.Done").await, 0);
    }
}
