//! Node error types.

use correlation::AwaitError;
use invocation::InvocationError;
use messaging::MessagingError;
use saga::SagaError;
use thiserror::Error;

/// Errors surfaced by the node's wiring and demo flows.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Subscribing or publishing on the transport failed.
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// A handler could not be bound or unbound.
    #[error("Invocation error: {0}")]
    Invocation(#[from] InvocationError),

    /// The fulfillment saga failed and was compensated.
    #[error("Saga error: {0}")]
    Saga(#[from] SagaError),

    /// The correlation engine did not stop cleanly.
    #[error("Await error: {0}")]
    Await(#[from] AwaitError),

    /// The order was rejected before the saga started.
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// The saga completed without leaving an expected value behind.
    #[error("Missing saga output: {0}")]
    MissingOutput(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;
