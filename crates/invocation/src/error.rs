//! Invocation error types.

use std::time::Duration;

use common::CorrelationId;
use correlation::AwaitError;
use messaging::{ErrorEvent, MessagingError};
use thiserror::Error;

/// Errors that can occur while invoking a command.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// No response arrived in time.
    #[error("Command timed out after {timeout:?} (correlation id {correlation_id})")]
    Timeout {
        correlation_id: CorrelationId,
        timeout: Duration,
    },

    /// The correlation engine was stopped mid-call.
    #[error("Invocation stopped (correlation id {correlation_id})")]
    Stopped { correlation_id: CorrelationId },

    /// The call was cancelled before a response arrived.
    #[error("Invocation cancelled (correlation id {correlation_id})")]
    Cancelled { correlation_id: CorrelationId },

    /// A response arrived but did not have the declared shape.
    #[error("Invalid result type: expected {expected}, got {actual}: {reason}")]
    InvalidResultType {
        expected: String,
        actual: String,
        reason: String,
    },

    /// The handler answered with an error event.
    #[error("Error event received: {0}")]
    ErrorEventReceived(ErrorEvent),

    /// The transport refused the command.
    #[error("Publish failed: {0}")]
    PublishFailed(MessagingError),

    /// Encoding, decoding or subscription failure in the messaging layer.
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Inbound command headers could not be turned into metadata.
    #[error("Invalid command metadata: {0}")]
    InvalidMetadata(String),

    /// Any other correlation engine failure.
    #[error("Await error: {0}")]
    Await(AwaitError),

    /// A spawned invocation task panicked or was aborted.
    #[error("Invocation task failed: {0}")]
    Join(String),
}

impl InvocationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, InvocationError::Timeout { .. })
    }

    /// The error event, if the handler reported a domain failure.
    pub fn error_event(&self) -> Option<&ErrorEvent> {
        match self {
            InvocationError::ErrorEventReceived(e) => Some(e),
            _ => None,
        }
    }

    /// Short label used on failure metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            InvocationError::Timeout { .. } => "timeout",
            InvocationError::Stopped { .. } => "stopped",
            InvocationError::Cancelled { .. } => "cancelled",
            InvocationError::InvalidResultType { .. } => "invalid_result_type",
            InvocationError::ErrorEventReceived(_) => "error_event",
            InvocationError::PublishFailed(_) => "publish_failed",
            InvocationError::Messaging(_) | InvocationError::Serialization(_) => "messaging",
            InvocationError::InvalidMetadata(_) => "invalid_metadata",
            InvocationError::Await(_) => "await",
            InvocationError::Join(_) => "join",
        }
    }
}

impl From<AwaitError> for InvocationError {
    fn from(e: AwaitError) -> Self {
        match e {
            AwaitError::Timeout {
                correlation_id,
                timeout,
            } => InvocationError::Timeout {
                correlation_id,
                timeout,
            },
            AwaitError::Stopped { correlation_id } => InvocationError::Stopped { correlation_id },
            AwaitError::Cancelled { correlation_id } => {
                InvocationError::Cancelled { correlation_id }
            }
            other => InvocationError::Await(other),
        }
    }
}

/// Convenience type alias for invocation results.
pub type Result<T> = std::result::Result<T, InvocationError>;
