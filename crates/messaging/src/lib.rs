//! Messaging primitives for the correlated command layer.
//!
//! This crate owns the event shell that travels over the bus
//! ([`EventEnvelope`]) and the collaborator contracts the engines are
//! written against:
//! - [`EventSource`] / [`EventPublisher`] for subscribing to and emitting events
//! - [`CommandPublisher`] / [`TransportSubscriber`] for raw subject-based transports
//! - [`SubjectResolver`] for mapping commands and event types onto subjects
//! - [`Serializer`] for the wire codec
//!
//! In-memory implementations are provided for tests and single-process use.

pub mod adapter;
pub mod codec;
pub mod error;
pub mod event;
pub mod memory;
pub mod resolver;
pub mod source;
pub mod transport;

pub use adapter::{TransportEventPublisher, TransportEventSource};
pub use codec::{JsonSerializer, Serializer, decode, encode};
pub use error::{MessagingError, Result};
pub use event::{CommandRef, ErrorDetails, ErrorEvent, EventEnvelope, EventEnvelopeBuilder};
pub use memory::{DEFAULT_HISTORY_CAPACITY, InMemoryEventBus, InMemoryTransport};
pub use resolver::{PrefixSubjectResolver, SubjectResolver};
pub use source::{EventHandler, EventPublisher, EventSource, SubscriptionId};
pub use transport::{
    CommandPublisher, Headers, MessageHandler, TransportMessage, TransportSubscriber, headers,
};
