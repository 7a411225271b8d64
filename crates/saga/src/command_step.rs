use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::CorrelationId;
use invocation::{Command, CommandInvoker, InvokeOptions, ResponseEvent};

use crate::context::SagaContext;
use crate::error::StepError;
use crate::step::SagaStep;

type BuildFn<C> = dyn Fn(&SagaContext) -> Result<C, StepError> + Send + Sync;
type GuardFn = dyn Fn(&SagaContext) -> bool + Send + Sync;

/// A step that sends a command and waits for its reply.
///
/// The command is built from the context when the step runs. The decoded
/// `R` reply is stored in the context under the step's result key (its name
/// unless [`store_as`](Self::store_as) says otherwise).
///
/// Each call gets its own correlation id, `<saga correlation id>/<step>`,
/// with the saga's correlation id as causation.
pub struct CommandStep<C, R> {
    name: String,
    invoker: CommandInvoker,
    build: Arc<BuildFn<C>>,
    guard: Option<Arc<GuardFn>>,
    result_key: String,
    timeout: Option<Duration>,
    compensation: Option<Arc<dyn SagaStep>>,
    _reply: PhantomData<fn() -> R>,
}

impl<C, R> CommandStep<C, R>
where
    C: Command,
    R: ResponseEvent + Sync,
{
    pub fn new<F>(name: impl Into<String>, invoker: CommandInvoker, build: F) -> Self
    where
        F: Fn(&SagaContext) -> Result<C, StepError> + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            result_key: name.clone(),
            name,
            invoker,
            build: Arc::new(build),
            guard: None,
            timeout: None,
            compensation: None,
            _reply: PhantomData,
        }
    }

    pub fn store_as(mut self, key: impl Into<String>) -> Self {
        self.result_key = key.into();
        self
    }

    /// Runs the step only when `guard` holds for the context.
    pub fn when<G>(mut self, guard: G) -> Self
    where
        G: Fn(&SagaContext) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Reply timeout of the invocation. The saga's step timeout still
    /// applies on top of it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Undoes this step by executing `step`.
    pub fn compensate_with(mut self, step: Arc<dyn SagaStep>) -> Self {
        self.compensation = Some(step);
        self
    }

    pub fn result_key(&self) -> &str {
        &self.result_key
    }

    fn options(&self, ctx: &SagaContext) -> InvokeOptions {
        let correlation_id = CorrelationId::from(format!("{}/{}", ctx.correlation_id(), self.name));
        let mut options = InvokeOptions::new()
            .correlation_id(correlation_id)
            .caused_by(ctx.correlation_id().as_str());
        if let Some(timeout) = self.timeout {
            options = options.timeout(timeout);
        }
        options
    }
}

#[async_trait]
impl<C, R> SagaStep for CommandStep<C, R>
where
    C: Command,
    R: ResponseEvent + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn guard(&self, ctx: &SagaContext) -> bool {
        self.guard.as_ref().is_none_or(|guard| guard(ctx))
    }

    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), StepError> {
        let command = (self.build)(ctx)?;
        let options = self.options(ctx);
        tracing::debug!(
            step = %self.name,
            command = C::NAME,
            correlation_id = ?options.correlation_id,
            "invoking command"
        );

        let reply: R = self.invoker.invoke(&command, options).await?;
        ctx.insert(self.result_key.clone(), reply);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut SagaContext) -> Result<(), StepError> {
        match &self.compensation {
            Some(step) => step.execute(ctx).await,
            None => Ok(()),
        }
    }

    fn has_compensation(&self) -> bool {
        self.compensation.is_some()
    }
}
