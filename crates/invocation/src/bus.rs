use std::sync::Arc;

use messaging::{CommandPublisher, Serializer, SubjectResolver, headers};

use crate::command::{Command, CommandMetadata};
use crate::error::{InvocationError, Result};

/// Fire-and-forget command publishing.
///
/// Resolves the subject, serializes the command, attaches the standard
/// headers and hands the message to the transport. Never waits for a
/// response.
#[derive(Clone)]
pub struct AsyncCommandBus {
    publisher: Arc<dyn CommandPublisher>,
    resolver: Arc<dyn SubjectResolver>,
    serializer: Arc<dyn Serializer>,
}

impl AsyncCommandBus {
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

    /// Publishes `command` under `metadata`.
    pub async fn send_async<C: Command>(
        &self,
        command: &C,
        metadata: &CommandMetadata,
    ) -> Result<()> {
        let subject = self.resolver.command_subject(C::NAME);
        let payload = messaging::encode(self.serializer.as_ref(), command)?;

        let mut message_headers = metadata.to_headers(C::NAME);
        message_headers.insert(
            headers::CONTENT_TYPE.to_string(),
            self.serializer.content_type().to_string(),
        );

        self.publisher
            .publish(&subject, payload, message_headers)
            .await
            .map_err(InvocationError::PublishFailed)?;

        tracing::debug!(
            command = C::NAME,
            %subject,
            correlation_id = %metadata.correlation_id(),
            command_id = %metadata.command_id(),
            "command published"
        );
        Ok(())
    }
}
