use std::time::Duration;

use common::CorrelationId;
use messaging::MessagingError;
use thiserror::Error;

/// Errors returned by the correlation engine.
///
/// All variants are terminal at this layer; retrying is the caller's call.
#[derive(Debug, Error)]
pub enum AwaitError {
    /// No matching event arrived before the deadline.
    #[error("Timed out after {timeout:?} waiting for correlation id {correlation_id}")]
    Timeout {
        correlation_id: CorrelationId,
        timeout: Duration,
    },

    /// The engine was stopped while the caller was waiting (or before it
    /// registered).
    #[error("Event awaiter stopped while waiting for correlation id {correlation_id}")]
    Stopped { correlation_id: CorrelationId },

    /// The wait was cancelled explicitly.
    #[error("Wait for correlation id {correlation_id} was cancelled")]
    Cancelled { correlation_id: CorrelationId },

    /// Another waiter is already registered for this correlation id.
    #[error("A waiter is already registered for correlation id {0}")]
    DuplicateWaiter(CorrelationId),

    /// A waiter must expect at least one event type.
    #[error("No event types given to wait for")]
    NoEventTypes,

    /// Subscribing to the event source failed.
    #[error("Subscription error: {0}")]
    Subscription(#[from] MessagingError),

    /// Several independent awaits failed.
    #[error("{} awaits failed", .0.len())]
    Multiple(Vec<AwaitError>),

    /// The background sweep did not exit before the shutdown deadline.
    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimedOut(Duration),
}

impl AwaitError {
    /// Returns true for the timeout kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AwaitError::Timeout { .. })
    }

    /// The correlation id the failure concerns, where there is one.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            AwaitError::Timeout { correlation_id, .. }
            | AwaitError::Stopped { correlation_id }
            | AwaitError::Cancelled { correlation_id }
            | AwaitError::DuplicateWaiter(correlation_id) => Some(correlation_id),
            _ => None,
        }
    }
}

/// Convenience type alias for correlation results.
pub type Result<T> = std::result::Result<T, AwaitError>;
