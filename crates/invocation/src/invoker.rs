//! Request/reply over the asynchronous bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use common::{CausationId, CorrelationId};
use correlation::EventAwaiter;
use messaging::{ErrorEvent, EventEnvelope};
use tokio::task::JoinHandle;

use crate::bus::AsyncCommandBus;
use crate::command::{Command, CommandMetadata, ResponseEvent};
use crate::error::{InvocationError, Result};

/// Invoker-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokerConfig {
    /// Timeout used when a call does not set its own.
    pub default_timeout: Duration,
    /// Error event type raced against the success type on every call.
    pub error_event_type: Option<String>,
}

impl InvokerConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_error_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.error_event_type = Some(event_type.into());
        self
    }
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            error_event_type: None,
        }
    }
}

/// Per-call options. Anything left unset comes from [`InvokerConfig`].
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub correlation_id: Option<CorrelationId>,
    pub causation_id: Option<CausationId>,
    pub timeout: Option<Duration>,
    pub error_event_type: Option<String>,
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a caller-supplied correlation id instead of generating one.
    pub fn correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn caused_by(mut self, causation_id: impl Into<CausationId>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn error_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.error_event_type = Some(event_type.into());
        self
    }

    fn metadata(&self) -> CommandMetadata {
        let mut metadata = CommandMetadata::new();
        if let Some(cid) = &self.correlation_id {
            metadata = metadata.with_correlation_id(cid.clone());
        }
        if let Some(causation) = &self.causation_id {
            metadata = metadata.caused_by(causation.clone());
        }
        metadata
    }
}

/// The three ways a call can end that callers usually want to tell apart.
#[derive(Debug)]
pub enum InvocationOutcome<R> {
    Success(R),
    /// The handler answered with an error event.
    DomainError(ErrorEvent),
    TimedOut {
        correlation_id: CorrelationId,
        timeout: Duration,
    },
}

impl<R> InvocationOutcome<R> {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Success(_))
    }

    pub fn success(self) -> Option<R> {
        match self {
            InvocationOutcome::Success(r) => Some(r),
            _ => None,
        }
    }
}

/// Publishes commands and waits for their correlated response.
#[derive(Clone)]
pub struct CommandInvoker {
    bus: AsyncCommandBus,
    awaiter: EventAwaiter,
    config: InvokerConfig,
}

impl CommandInvoker {
    pub fn new(bus: AsyncCommandBus, awaiter: EventAwaiter, config: InvokerConfig) -> Self {
        Self {
            bus,
            awaiter,
            config,
        }
    }

    pub fn bus(&self) -> &AsyncCommandBus {
        &self.bus
    }

    pub fn awaiter(&self) -> &EventAwaiter {
        &self.awaiter
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Invokes `command` and decodes the `R` response.
    pub async fn invoke<C, R>(&self, command: &C, options: InvokeOptions) -> Result<R>
    where
        C: Command,
        R: ResponseEvent,
    {
        self.call::<C, R>(command, options, None).await
    }

    async fn call<C, R>(
        &self,
        command: &C,
        options: InvokeOptions,
        aborted: Option<&AtomicBool>,
    ) -> Result<R>
    where
        C: Command,
        R: ResponseEvent,
    {
        let envelope = self
            .dispatch(command, R::EVENT_TYPE, options, aborted)
            .await?;
        decode_response::<R>(envelope)
    }

    /// Like [`invoke`](Self::invoke) but keeps domain errors and timeouts out
    /// of the error channel.
    pub async fn invoke_with_both_results<C, R>(
        &self,
        command: &C,
        options: InvokeOptions,
    ) -> Result<InvocationOutcome<R>>
    where
        C: Command,
        R: ResponseEvent,
    {
        match self.invoke::<C, R>(command, options).await {
            Ok(response) => Ok(InvocationOutcome::Success(response)),
            Err(InvocationError::ErrorEventReceived(event)) => {
                Ok(InvocationOutcome::DomainError(event))
            }
            Err(InvocationError::Timeout {
                correlation_id,
                timeout,
            }) => Ok(InvocationOutcome::TimedOut {
                correlation_id,
                timeout,
            }),
            Err(other) => Err(other),
        }
    }

    /// Starts the call on a background task and returns a handle to it.
    pub fn invoke_async<C, R>(&self, command: C, mut options: InvokeOptions) -> InvocationHandle<R>
    where
        C: Command,
        R: ResponseEvent,
    {
        let correlation_id = options
            .correlation_id
            .get_or_insert_with(CorrelationId::new)
            .clone();
        let aborted = Arc::new(AtomicBool::new(false));
        let invoker = self.clone();
        let flag = aborted.clone();
        let task = tokio::spawn(async move {
            invoker
                .call::<C, R>(&command, options, Some(flag.as_ref()))
                .await
        });

        InvocationHandle {
            correlation_id,
            awaiter: self.awaiter.clone(),
            aborted,
            task,
        }
    }

    /// Cancels an in-flight call. Returns false if nothing was waiting.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        self.awaiter.cancel(correlation_id)
    }

    /// Invokes `command` and returns the raw response envelope of
    /// `success_type`.
    ///
    /// Any envelope carrying an error block, or arriving under the configured
    /// error type, is returned as [`InvocationError::ErrorEventReceived`].
    pub async fn invoke_envelope<C: Command>(
        &self,
        command: &C,
        success_type: &str,
        options: InvokeOptions,
    ) -> Result<EventEnvelope> {
        self.dispatch(command, success_type, options, None).await
    }

    #[tracing::instrument(
        name = "invoke",
        skip(self, command, options, aborted),
        fields(command = C::NAME, correlation_id = tracing::field::Empty)
    )]
    async fn dispatch<C: Command>(
        &self,
        command: &C,
        success_type: &str,
        options: InvokeOptions,
        aborted: Option<&AtomicBool>,
    ) -> Result<EventEnvelope> {
        let started = Instant::now();
        metrics::counter!("invocations_total", "command" => C::NAME).increment(1);

        let result = self
            .round_trip(command, success_type, options, aborted)
            .await;

        metrics::histogram!("invocation_duration_seconds", "command" => C::NAME)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::counter!(
                "invocation_failures_total",
                "command" => C::NAME,
                "kind" => e.kind()
            )
            .increment(1);
            tracing::debug!(error = %e, "invocation failed");
        }
        result
    }

    async fn round_trip<C: Command>(
        &self,
        command: &C,
        success_type: &str,
        options: InvokeOptions,
        aborted: Option<&AtomicBool>,
    ) -> Result<EventEnvelope> {
        let metadata = options.metadata();
        let correlation_id = metadata.correlation_id().clone();
        tracing::Span::current().record("correlation_id", correlation_id.as_str());

        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let error_type = options
            .error_event_type
            .as_deref()
            .or(self.config.error_event_type.as_deref());
        let mut expected = vec![success_type];
        if let Some(error_type) = error_type
            && error_type != success_type
        {
            expected.push(error_type);
        }

        // Registered before publishing so a fast reply cannot be missed.
        let mut pending = self
            .awaiter
            .register(correlation_id.clone(), &expected, timeout)
            .await?;

        // An abort that landed before the waiter existed had nothing to cancel.
        if aborted.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            pending.release().await;
            return Err(InvocationError::Cancelled { correlation_id });
        }

        let wait = pending.wait();
        tokio::pin!(wait);
        let publish = self.bus.send_async(command, &metadata);
        tokio::pin!(publish);

        let awaited = tokio::select! {
            awaited = &mut wait => awaited,
            published = &mut publish => match published {
                Ok(()) => wait.as_mut().await,
                Err(e) => {
                    self.awaiter.cancel(&correlation_id);
                    let _ = wait.as_mut().await;
                    return Err(e);
                }
            },
        };

        let awaited = awaited?;
        if awaited.matched_type == success_type && !awaited.event.is_error() {
            Ok(awaited.event)
        } else {
            Err(InvocationError::ErrorEventReceived(ErrorEvent::coerce(
                awaited.event,
            )))
        }
    }
}

fn decode_response<R: ResponseEvent>(envelope: EventEnvelope) -> Result<R> {
    if envelope.event_type != R::EVENT_TYPE {
        return Err(InvocationError::InvalidResultType {
            expected: R::EVENT_TYPE.to_string(),
            actual: envelope.event_type,
            reason: "unexpected event type".to_string(),
        });
    }
    envelope
        .decode_payload::<R>()
        .map_err(|e| InvocationError::InvalidResultType {
            expected: R::EVENT_TYPE.to_string(),
            actual: envelope.event_type.clone(),
            reason: e.to_string(),
        })
}

/// A call running on a background task.
pub struct InvocationHandle<R> {
    correlation_id: CorrelationId,
    awaiter: EventAwaiter,
    aborted: Arc<AtomicBool>,
    task: JoinHandle<Result<R>>,
}

impl<R> InvocationHandle<R> {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the call, whether or not its waiter is registered yet. The
    /// task then finishes with [`InvocationError::Cancelled`] after releasing
    /// its waiter, without publishing if it had not done so already.
    ///
    /// Returns false if the call had already finished.
    pub fn abort(&self) -> bool {
        if self.task.is_finished() {
            return false;
        }
        self.aborted.store(true, Ordering::SeqCst);
        self.awaiter.cancel(&self.correlation_id);
        true
    }

    /// Waits for the call to finish.
    pub async fn join(self) -> Result<R> {
        self.task
            .await
            .map_err(|e| InvocationError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Done {
        ok: bool,
    }

    impl ResponseEvent for Done {
        const EVENT_TYPE: &'static str = "Done";
    }

    #[test]
    fn test_decode_response_checks_type_and_shape() {
        let cid = CorrelationId::new();
        let good = EventEnvelope::new("Done", cid.clone(), serde_json::json!({"ok": true}));
        assert_eq!(decode_response::<Done>(good).unwrap(), Done { ok: true });

        let wrong_type = EventEnvelope::new("Other", cid.clone(), serde_json::json!({"ok": true}));
        assert!(matches!(
            decode_response::<Done>(wrong_type),
            Err(InvocationError::InvalidResultType { .. })
        ));

        let wrong_shape = EventEnvelope::new("Done", cid, serde_json::json!({"ok": "yes"}));
        match decode_response::<Done>(wrong_shape) {
            Err(InvocationError::InvalidResultType {
                expected, actual, ..
            }) => {
                assert_eq!(expected, "Done");
                assert_eq!(actual, "Done");
            }
            other => panic!("expected InvalidResultType, got {other:?}"),
        }
    }

    #[test]
    fn test_options_build_metadata() {
        let options = InvokeOptions::new()
            .correlation_id(CorrelationId::from("given"))
            .caused_by("parent");
        let metadata = options.metadata();
        assert_eq!(metadata.correlation_id().as_str(), "given");
        assert_eq!(metadata.causation_id().map(|c| c.as_str()), Some("parent"));
    }

    #[test]
    fn test_config_defaults() {
        let config = InvokerConfig::default();
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert!(config.error_event_type.is_none());
    }
}
