//! Responder side: runs command handlers and publishes their replies.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use common::{CommandId, CorrelationId};
use messaging::{
    CommandRef, ErrorDetails, EventEnvelope, EventPublisher, MessageHandler, Serializer,
    SubjectResolver, SubscriptionId, TransportMessage, TransportSubscriber,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::command::{Command, CommandMetadata, ResponseEvent};
use crate::error::Result;

/// Event type used for handler failures unless the router is told otherwise.
pub const DEFAULT_ERROR_EVENT_TYPE: &str = "CommandFailed";

/// What a handler sees besides the command itself.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub metadata: CommandMetadata,
    pub subject: String,
}

impl CommandContext {
    pub fn correlation_id(&self) -> &CorrelationId {
        self.metadata.correlation_id()
    }

    pub fn command_id(&self) -> CommandId {
        self.metadata.command_id()
    }
}

/// A successful handler result: the response event to publish.
#[derive(Debug, Clone)]
pub struct Reply {
    event_type: String,
    payload: serde_json::Value,
    aggregate_id: Option<String>,
}

impl Reply {
    /// Replies with a typed response event.
    pub fn event<R: ResponseEvent + Serialize>(event: &R) -> Result<Self> {
        Ok(Self {
            event_type: R::EVENT_TYPE.to_string(),
            payload: serde_json::to_value(event)?,
            aggregate_id: None,
        })
    }

    /// Replies with an untyped event.
    pub fn raw(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            aggregate_id: None,
        }
    }

    pub fn with_aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

/// A domain-level failure reported by a handler. Published as an error event.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct HandlerError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl HandlerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl From<crate::InvocationError> for HandlerError {
    fn from(e: crate::InvocationError) -> Self {
        HandlerError::new("HANDLER_ERROR", e.to_string())
    }
}

/// Handles one command type.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    async fn handle(
        &self,
        command: C,
        ctx: &CommandContext,
    ) -> std::result::Result<Reply, HandlerError>;
}

/// Subscribes command handlers to their subjects.
///
/// Replies carry the caller's correlation id and the command id as causation
/// id, so the invoker on the other side can match them.
#[derive(Clone)]
pub struct CommandRouter {
    subscriber: Arc<dyn TransportSubscriber>,
    events: Arc<dyn EventPublisher>,
    resolver: Arc<dyn SubjectResolver>,
    serializer: Arc<dyn Serializer>,
    error_event_type: String,
    bindings: Arc<Mutex<Vec<(String, SubscriptionId)>>>,
}

impl CommandRouter {
    pub fn new(
        subscriber: Arc<dyn TransportSubscriber>,
        events: Arc<dyn EventPublisher>,
        resolver: Arc<dyn SubjectResolver>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            subscriber,
            events,
            resolver,
            serializer,
            error_event_type: DEFAULT_ERROR_EVENT_TYPE.to_string(),
            bindings: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_error_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.error_event_type = event_type.into();
        self
    }

    pub fn error_event_type(&self) -> &str {
        &self.error_event_type
    }

    /// Routes commands of type `C` to `handler`.
    pub async fn bind<C, H>(&self, handler: H) -> Result<SubscriptionId>
    where
        C: Command + DeserializeOwned,
        H: CommandHandler<C>,
    {
        let subject = self.resolver.command_subject(C::NAME);
        let dispatcher = Arc::new(Dispatcher::<C, H> {
            handler,
            events: self.events.clone(),
            serializer: self.serializer.clone(),
            error_event_type: self.error_event_type.clone(),
            _command: PhantomData,
        });

        let id = self.subscriber.subscribe(&subject, dispatcher).await?;
        self.bindings.lock().await.push((subject.clone(), id));
        tracing::info!(command = C::NAME, %subject, "command handler bound");
        Ok(id)
    }

    /// Removes every binding made through this router.
    pub async fn unbind_all(&self) -> Result<()> {
        let bindings: Vec<_> = self.bindings.lock().await.drain(..).collect();
        for (subject, id) in bindings {
            self.subscriber.unsubscribe(&subject, id).await?;
        }
        Ok(())
    }
}

struct Dispatcher<C, H> {
    handler: H,
    events: Arc<dyn EventPublisher>,
    serializer: Arc<dyn Serializer>,
    error_event_type: String,
    _command: PhantomData<fn() -> C>,
}

impl<C, H> Dispatcher<C, H>
where
    C: Command + DeserializeOwned,
    H: CommandHandler<C>,
{
    fn failure(&self, metadata: &CommandMetadata, error: &HandlerError) -> EventEnvelope {
        let details = ErrorDetails::new(&error.code, &error.message)
            .retryable(error.retryable)
            .for_command(CommandRef {
                command_id: Some(metadata.command_id()),
                command_name: C::NAME.to_string(),
            });
        let mut envelope = EventEnvelope::error_event(
            &self.error_event_type,
            metadata.correlation_id().clone(),
            details,
        );
        envelope.causation_id = Some(metadata.command_id().into());
        envelope
    }

    fn success(
        &self,
        metadata: &CommandMetadata,
        reply: Reply,
    ) -> messaging::Result<EventEnvelope> {
        let mut builder = EventEnvelope::builder()
            .event_type(reply.event_type)
            .correlation_id(metadata.correlation_id().clone())
            .causation_id(metadata.command_id())
            .payload_raw(reply.payload);
        if let Some(aggregate_id) = reply.aggregate_id {
            builder = builder.aggregate_id(aggregate_id);
        }
        builder.build()
    }
}

#[async_trait]
impl<C, H> MessageHandler for Dispatcher<C, H>
where
    C: Command + DeserializeOwned,
    H: CommandHandler<C>,
{
    async fn handle(&self, message: &TransportMessage) -> messaging::Result<()> {
        let metadata = match CommandMetadata::from_headers(&message.headers) {
            Ok(metadata) => metadata,
            Err(e) => {
                // Without a correlation id there is nobody to answer.
                tracing::warn!(subject = %message.subject, error = %e, "dropping command");
                return Ok(());
            }
        };

        let command: C = match messaging::decode(self.serializer.as_ref(), &message.payload) {
            Ok(command) => command,
            Err(e) => {
                let error = HandlerError::new("INVALID_COMMAND", e.to_string());
                return self.events.publish_event(self.failure(&metadata, &error)).await;
            }
        };

        let ctx = CommandContext {
            metadata,
            subject: message.subject.clone(),
        };
        let reply = match self.handler.handle(command, &ctx).await {
            Ok(reply) => self.success(&ctx.metadata, reply)?,
            Err(error) => {
                tracing::debug!(
                    command = C::NAME,
                    correlation_id = %ctx.correlation_id(),
                    code = %error.code,
                    "command handler reported failure"
                );
                self.failure(&ctx.metadata, &error)
            }
        };

        self.events.publish_event(reply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::{InMemoryEventBus, InMemoryTransport, JsonSerializer, PrefixSubjectResolver};
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Echo {
        text: String,
    }

    impl Command for Echo {
        const NAME: &'static str = "Echo";
    }

    #[derive(Serialize, Deserialize)]
    struct Echoed {
        text: String,
    }

    impl ResponseEvent for Echoed {
        const EVENT_TYPE: &'static str = "Echoed";
    }

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler<Echo> for EchoHandler {
        async fn handle(
            &self,
            command: Echo,
            _ctx: &CommandContext,
        ) -> std::result::Result<Reply, HandlerError> {
            if command.text.is_empty() {
                return Err(HandlerError::new("EMPTY", "nothing to echo"));
            }
            Ok(Reply::event(&Echoed { text: command.text })?)
        }
    }

    async fn router() -> (InMemoryTransport, InMemoryEventBus, CommandRouter) {
        let transport = InMemoryTransport::new();
        let bus = InMemoryEventBus::new();
        let router = CommandRouter::new(
            Arc::new(transport.clone()),
            Arc::new(bus.clone()),
            Arc::new(PrefixSubjectResolver::default()),
            Arc::new(JsonSerializer),
        );
        router.bind::<Echo, _>(EchoHandler).await.unwrap();
        (transport, bus, router)
    }

    async fn send(transport: &InMemoryTransport, metadata: &CommandMetadata, text: &str) {
        use messaging::CommandPublisher;
        let payload = serde_json::to_vec(&Echo {
            text: text.to_string(),
        })
        .unwrap();
        transport
            .publish("commands.Echo", payload, metadata.to_headers("Echo"))
            .await
            .unwrap();
        transport.wait_idle().await;
    }

    #[tokio::test]
    async fn test_reply_carries_correlation_and_causation() {
        let (transport, bus, _router) = router().await;
        let metadata = CommandMetadata::new();

        send(&transport, &metadata, "hi").await;

        let published = bus.published_events().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, "Echoed");
        assert_eq!(&published[0].correlation_id, metadata.correlation_id());
        assert_eq!(
            published[0].causation_id.as_ref().map(|c| c.to_string()),
            Some(metadata.command_id().to_string())
        );
        assert_eq!(published[0].payload["text"], "hi");
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_event() {
        let (transport, bus, router) = router().await;
        let metadata = CommandMetadata::new();

        send(&transport, &metadata, "").await;

        let published = bus.published_events().await;
        assert_eq!(published[0].event_type, router.error_event_type());
        let details = published[0].error.as_ref().unwrap();
        assert_eq!(details.code, "EMPTY");
        assert_eq!(
            details.command.as_ref().map(|c| c.command_name.as_str()),
            Some("Echo")
        );
    }

    #[tokio::test]
    async fn test_undecodable_command_is_answered_with_error() {
        use messaging::CommandPublisher;
        let (transport, bus, _router) = router().await;
        let metadata = CommandMetadata::new();

        transport
            .publish("commands.Echo", b"{\"wrong\": 1}".to_vec(), metadata.to_headers("Echo"))
            .await
            .unwrap();
        transport.wait_idle().await;

        let published = bus.published_events().await;
        assert_eq!(published[0].error.as_ref().unwrap().code, "INVALID_COMMAND");
    }

    #[tokio::test]
    async fn test_command_without_metadata_is_dropped() {
        use messaging::CommandPublisher;
        let (transport, bus, _router) = router().await;

        transport
            .publish("commands.Echo", b"{\"text\": \"x\"}".to_vec(), Default::default())
            .await
            .unwrap();
        transport.wait_idle().await;

        assert!(bus.published_events().await.is_empty());
    }

    #[tokio::test]
    async fn test_unbind_all_removes_subscriptions() {
        let (transport, _bus, router) = router().await;
        assert_eq!(transport.subscriber_count("commands.Echo").await, 1);

        router.unbind_all().await.unwrap();
        assert_eq!(transport.subscriber_count("commands.Echo").await, 0);
    }
}
