use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{CausationId, CommandId, CorrelationId, EventId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{MessagingError, Result};

/// Reference to the command an error event answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRef {
    /// The command instance, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
    /// The command name (e.g., "ReserveStock").
    pub command_name: String,
}

/// Failure block carried by an error event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error code (e.g., "OUT_OF_STOCK").
    pub code: String,
    /// Human readable message.
    pub message: String,
    /// Whether retrying the whole invocation may succeed.
    #[serde(default)]
    pub retryable: bool,
    /// The underlying cause, if the handler reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// The command that produced this failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandRef>,
}

impl ErrorDetails {
    /// Creates a non-retryable error block.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: false,
            cause: None,
            command: None,
        }
    }

    /// Marks the error as retryable.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attaches the underlying cause.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Attaches the originating command.
    pub fn for_command(mut self, command: CommandRef) -> Self {
        self.command = Some(command);
        self
    }
}

/// The event shell that travels over the bus.
///
/// Only `event_type` and `correlation_id` are read by the correlation engine;
/// decoding `payload` into a concrete type happens at a higher layer. An
/// envelope whose `error` block is set is an error event (see [`ErrorEvent`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event.
    #[serde(default)]
    pub event_id: EventId,

    /// The type of the event (e.g., "StockReserved").
    #[serde(default)]
    pub event_type: String,

    /// The aggregate this event concerns, if any.
    #[serde(default)]
    pub aggregate_id: String,

    /// Correlation id of the logical call this event belongs to.
    #[serde(default = "empty_correlation")]
    pub correlation_id: CorrelationId,

    /// The message that caused this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<CausationId>,

    /// When the event was created.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// The event payload as JSON.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Failure block; present only on error events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,

    /// Additional metadata about the event.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn empty_correlation() -> CorrelationId {
    CorrelationId::from(String::new())
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Shorthand for a data event with a JSON payload.
    pub fn new(
        event_type: impl Into<String>,
        correlation_id: CorrelationId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            aggregate_id: String::new(),
            correlation_id,
            causation_id: None,
            timestamp: Utc::now(),
            payload,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Shorthand for an error event.
    pub fn error_event(
        event_type: impl Into<String>,
        correlation_id: CorrelationId,
        details: ErrorDetails,
    ) -> Self {
        let mut envelope = Self::new(event_type, correlation_id, serde_json::Value::Null);
        envelope.error = Some(details);
        envelope
    }

    /// Returns true if this envelope signals a domain-level failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Decodes the payload into a concrete type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_id: Option<String>,
    correlation_id: Option<CorrelationId>,
    causation_id: Option<CausationId>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    error: Option<ErrorDetails>,
    metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the aggregate ID.
    pub fn aggregate_id(mut self, id: impl Into<String>) -> Self {
        self.aggregate_id = Some(id.into());
        self
    }

    /// Sets the correlation ID.
    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Sets the causation ID.
    pub fn causation_id(mut self, id: impl Into<CausationId>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Turns the envelope into an error event.
    pub fn error(mut self, details: ErrorDetails) -> Self {
        self.error = Some(details);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builds the event envelope.
    ///
    /// `event_type` and `correlation_id` are required; a missing payload
    /// becomes JSON `null`.
    pub fn build(self) -> Result<EventEnvelope> {
        Ok(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self
                .event_type
                .ok_or(MessagingError::MissingField("event_type"))?,
            aggregate_id: self.aggregate_id.unwrap_or_default(),
            correlation_id: self
                .correlation_id
                .ok_or(MessagingError::MissingField("correlation_id"))?,
            causation_id: self.causation_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.unwrap_or(serde_json::Value::Null),
            error: self.error,
            metadata: self.metadata,
        })
    }
}

/// A domain-level failure delivered as an event.
///
/// Wraps the envelope it arrived in so callers keep access to correlation and
/// causation data.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    envelope: EventEnvelope,
    details: ErrorDetails,
}

impl ErrorEvent {
    /// Returns the error view of an envelope, if it carries an error block.
    pub fn from_envelope(envelope: EventEnvelope) -> Option<Self> {
        let details = envelope.error.clone()?;
        Some(Self { envelope, details })
    }

    /// Interprets any envelope as an error event.
    ///
    /// Used when an envelope arrives under a declared error event type but was
    /// produced without an error block: the payload is tried as
    /// [`ErrorDetails`], and otherwise summarized under code `UNKNOWN`.
    pub fn coerce(envelope: EventEnvelope) -> Self {
        if let Some(details) = envelope.error.clone() {
            return Self { envelope, details };
        }
        let details = serde_json::from_value::<ErrorDetails>(envelope.payload.clone())
            .unwrap_or_else(|_| {
                let message = match &envelope.payload {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => format!("{} received", envelope.event_type),
                    other => other.to_string(),
                };
                ErrorDetails::new("UNKNOWN", message)
            });
        Self { envelope, details }
    }

    /// The error code.
    pub fn code(&self) -> &str {
        &self.details.code
    }

    /// The human readable message.
    pub fn message(&self) -> &str {
        &self.details.message
    }

    /// Whether the failure is retryable.
    pub fn is_retryable(&self) -> bool {
        self.details.retryable
    }

    /// The underlying cause, if any.
    pub fn cause(&self) -> Option<&str> {
        self.details.cause.as_deref()
    }

    /// The originating command, if recorded.
    pub fn command(&self) -> Option<&CommandRef> {
        self.details.command.as_ref()
    }

    /// The full error block.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// The envelope this error arrived in.
    pub fn envelope(&self) -> &EventEnvelope {
        &self.envelope
    }

    /// The correlation id of the failed call.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.envelope.correlation_id
    }
}

impl std::fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}]: {}",
            self.envelope.event_type, self.details.code, self.details.message
        )?;
        if let Some(cause) = &self.details.cause {
            write!(f, " (cause: {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorEvent {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_event_type_and_correlation() {
        let missing_type = EventEnvelope::builder()
            .correlation_id(CorrelationId::new())
            .build();
        assert!(matches!(
            missing_type,
            Err(MessagingError::MissingField("event_type"))
        ));

        let missing_correlation = EventEnvelope::builder().event_type("Done").build();
        assert!(matches!(
            missing_correlation,
            Err(MessagingError::MissingField("correlation_id"))
        ));
    }

    #[test]
    fn builder_sets_all_fields() {
        let cid = CorrelationId::from("c-1");
        let envelope = EventEnvelope::builder()
            .event_type("StockReserved")
            .aggregate_id("sku-1")
            .correlation_id(cid.clone())
            .causation_id("cmd-1")
            .payload_raw(serde_json::json!({"qty": 2}))
            .metadata("source", serde_json::json!("test"))
            .build()
            .unwrap();

        assert_eq!(envelope.event_type, "StockReserved");
        assert_eq!(envelope.aggregate_id, "sku-1");
        assert_eq!(envelope.correlation_id, cid);
        assert_eq!(envelope.causation_id, Some(CausationId::from("cmd-1")));
        assert_eq!(envelope.payload["qty"], 2);
        assert!(!envelope.is_error());
    }

    #[test]
    fn minimal_wire_shell_deserializes_with_defaults() {
        let json = serde_json::json!({
            "event_type": "Done",
            "correlation_id": "abc"
        });
        let envelope: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(envelope.event_type, "Done");
        assert_eq!(envelope.correlation_id.as_str(), "abc");
        assert!(envelope.aggregate_id.is_empty());
        assert!(envelope.causation_id.is_none());
        assert_eq!(envelope.payload, serde_json::Value::Null);
    }

    #[test]
    fn error_event_requires_error_block() {
        let data = EventEnvelope::new("Done", CorrelationId::new(), serde_json::Value::Null);
        assert!(ErrorEvent::from_envelope(data).is_none());

        let details = ErrorDetails::new("OUT_OF_STOCK", "no stock left")
            .retryable(true)
            .with_cause("warehouse empty");
        let failed = EventEnvelope::error_event("Failed", CorrelationId::new(), details);
        let error = ErrorEvent::from_envelope(failed).unwrap();
        assert_eq!(error.code(), "OUT_OF_STOCK");
        assert!(error.is_retryable());
        assert_eq!(error.cause(), Some("warehouse empty"));
        assert_eq!(
            error.to_string(),
            "Failed [OUT_OF_STOCK]: no stock left (cause: warehouse empty)"
        );
    }

    #[test]
    fn coerce_reads_details_from_payload() {
        let payload = serde_json::json!({"code": "DENIED", "message": "card declined"});
        let envelope = EventEnvelope::new("PaymentFailed", CorrelationId::new(), payload);
        let error = ErrorEvent::coerce(envelope);
        assert_eq!(error.code(), "DENIED");
        assert_eq!(error.message(), "card declined");
    }

    #[test]
    fn coerce_falls_back_to_unknown_code() {
        let envelope = EventEnvelope::new(
            "PaymentFailed",
            CorrelationId::new(),
            serde_json::json!("gateway down"),
        );
        let error = ErrorEvent::coerce(envelope);
        assert_eq!(error.code(), "UNKNOWN");
        assert_eq!(error.message(), "gateway down");
    }
}
