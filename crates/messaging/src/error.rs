use thiserror::Error;

/// Errors raised by messaging collaborators.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transport refused an outbound message.
    #[error("Publish to '{subject}' rejected: {reason}")]
    PublishRejected { subject: String, reason: String },

    /// An inbound message could not be interpreted.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A required field was not supplied to a builder.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A subscribed handler failed.
    #[error("Handler error: {0}")]
    Handler(String),
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
