//! Commands, their metadata and typed response events.

use chrono::{DateTime, Utc};
use common::{CausationId, CommandId, CorrelationId};
use messaging::{Headers, headers};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{InvocationError, Result};

/// A request published to a handler somewhere on the bus.
///
/// Commands are plain serializable data. The name selects the transport
/// subject and is sent in the `command_name` header.
pub trait Command: Serialize + Send + Sync + 'static {
    /// The command name (e.g., "ReserveStock").
    const NAME: &'static str;
}

/// A typed response event.
///
/// The event type is fixed per Rust type, so a delivered envelope can be
/// checked against it before its payload is decoded.
pub trait ResponseEvent: DeserializeOwned + Send + 'static {
    /// The event type name (e.g., "StockReserved").
    const EVENT_TYPE: &'static str;
}

/// Identity of one command instance.
///
/// Generated once per invocation and carried in the transport headers, so the
/// handler and every response it publishes share the caller's correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMetadata {
    command_id: CommandId,
    correlation_id: CorrelationId,
    causation_id: Option<CausationId>,
    timestamp: DateTime<Utc>,
}

impl CommandMetadata {
    /// Fresh metadata with a new command id and a new correlation id.
    pub fn new() -> Self {
        Self {
            command_id: CommandId::new(),
            correlation_id: CorrelationId::new(),
            causation_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Continues an existing logical call.
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Records the message that caused this command.
    pub fn caused_by(mut self, causation_id: impl Into<CausationId>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn causation_id(&self) -> Option<&CausationId> {
        self.causation_id.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The standard command headers.
    ///
    /// A root command, with nothing that caused it, reports its own
    /// correlation id as causation id.
    pub fn to_headers(&self, command_name: &str) -> Headers {
        let causation = self
            .causation_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| self.correlation_id.to_string());

        let mut map = Headers::new();
        map.insert(headers::COMMAND_ID.to_string(), self.command_id.to_string());
        map.insert(
            headers::CORRELATION_ID.to_string(),
            self.correlation_id.to_string(),
        );
        map.insert(headers::CAUSATION_ID.to_string(), causation);
        map.insert(headers::TIMESTAMP.to_string(), self.timestamp.to_rfc3339());
        map.insert(headers::COMMAND_NAME.to_string(), command_name.to_string());
        map
    }

    /// Rebuilds metadata on the receiving side.
    ///
    /// `command_id` and `correlation_id` are required. A missing or
    /// unparseable timestamp falls back to the receive time.
    pub fn from_headers(map: &Headers) -> Result<Self> {
        let command_id = map
            .get(headers::COMMAND_ID)
            .ok_or_else(|| InvocationError::InvalidMetadata("missing command_id".to_string()))?
            .parse::<CommandId>()
            .map_err(|e| InvocationError::InvalidMetadata(format!("bad command_id: {e}")))?;

        let correlation_id = map
            .get(headers::CORRELATION_ID)
            .filter(|v| !v.is_empty())
            .map(|v| CorrelationId::from(v.as_str()))
            .ok_or_else(|| {
                InvocationError::InvalidMetadata("missing correlation_id".to_string())
            })?;

        let timestamp = map
            .get(headers::TIMESTAMP)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(Self {
            command_id,
            correlation_id,
            causation_id: map
                .get(headers::CAUSATION_ID)
                .map(|v| CausationId::from(v.as_str())),
            timestamp,
        })
    }
}

impl Default for CommandMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_carry_all_standard_fields() {
        let metadata = CommandMetadata::new()
            .with_correlation_id(CorrelationId::from("corr-1"))
            .caused_by("evt-9");

        let map = metadata.to_headers("ReserveStock");

        assert_eq!(map[headers::CORRELATION_ID], "corr-1");
        assert_eq!(map[headers::CAUSATION_ID], "evt-9");
        assert_eq!(map[headers::COMMAND_NAME], "ReserveStock");
        assert_eq!(map[headers::COMMAND_ID], metadata.command_id().to_string());
        assert!(DateTime::parse_from_rfc3339(&map[headers::TIMESTAMP]).is_ok());
    }

    #[test]
    fn test_root_command_uses_correlation_as_causation() {
        let metadata = CommandMetadata::new();
        let map = metadata.to_headers("X");
        assert_eq!(map[headers::CAUSATION_ID], metadata.correlation_id().to_string());
    }

    #[test]
    fn test_metadata_survives_header_round_trip() {
        let metadata = CommandMetadata::new().caused_by("parent");
        let parsed = CommandMetadata::from_headers(&metadata.to_headers("X")).unwrap();

        assert_eq!(parsed.command_id(), metadata.command_id());
        assert_eq!(parsed.correlation_id(), metadata.correlation_id());
        assert_eq!(parsed.causation_id().map(|c| c.as_str()), Some("parent"));
        assert_eq!(
            parsed.timestamp().timestamp_millis(),
            metadata.timestamp().timestamp_millis()
        );
    }

    #[test]
    fn test_from_headers_requires_ids() {
        let mut map = CommandMetadata::new().to_headers("X");
        map.remove(headers::CORRELATION_ID);
        assert!(matches!(
            CommandMetadata::from_headers(&map),
            Err(InvocationError::InvalidMetadata(_))
        ));

        let mut map = CommandMetadata::new().to_headers("X");
        map.insert(headers::COMMAND_ID.to_string(), "nope".to_string());
        assert!(CommandMetadata::from_headers(&map).is_err());
    }
}
