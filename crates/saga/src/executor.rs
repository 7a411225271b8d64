//! Runs saga definitions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::SagaContext;
use crate::definition::SagaDefinition;
use crate::error::{Result, SagaError, StepError};
use crate::events::{SagaEvent, SagaId};
use crate::journal::{NoopSagaJournal, SagaJournal};
use crate::report::{CompensationOutcome, SagaReport, StepOutcome};
use crate::state::Lifecycle;
use crate::step::SagaStep;

/// Executor-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    /// Step timeout when neither the step nor the definition sets one.
    pub default_step_timeout: Duration,
}

impl SagaConfig {
    pub fn with_default_step_timeout(mut self, timeout: Duration) -> Self {
        self.default_step_timeout = timeout;
        self
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            default_step_timeout: Duration::from_secs(30),
        }
    }
}

/// Executes sagas one step at a time, unwinding executed steps in reverse
/// when one fails.
///
/// The executor holds no per-run state. Any number of runs may share it,
/// each with its own [`SagaContext`].
#[derive(Clone)]
pub struct SagaExecutor {
    config: SagaConfig,
    journal: Arc<dyn SagaJournal>,
}

impl SagaExecutor {
    pub fn new(config: SagaConfig) -> Self {
        Self {
            config,
            journal: Arc::new(NoopSagaJournal),
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn SagaJournal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Runs `definition` against `ctx`.
    ///
    /// Steps run in order. A step whose guard returns false is skipped. The
    /// first failing or timed-out step ends the forward pass: every step that
    /// executed before it is compensated, most recent first, and the run
    /// fails with the report attached. A compensation failure is recorded and
    /// the unwind continues.
    #[tracing::instrument(
        skip(self, definition, ctx),
        fields(
            saga = %definition.name(),
            correlation_id = %ctx.correlation_id(),
            saga_id = tracing::field::Empty
        )
    )]
    pub async fn execute(
        &self,
        definition: &SagaDefinition,
        ctx: &mut SagaContext,
    ) -> Result<SagaReport> {
        let started = Instant::now();
        let saga_id = SagaId::new();
        tracing::Span::current().record("saga_id", tracing::field::display(saga_id));
        metrics::counter!("saga_executions_total", "saga" => definition.name().to_string())
            .increment(1);

        let mut lifecycle = Lifecycle::new().await?;
        let mut report = SagaReport::new(saga_id, definition.name(), ctx.correlation_id().clone());

        lifecycle.start().await?;
        self.record(
            saga_id,
            SagaEvent::saga_started(saga_id, definition.name(), ctx.correlation_id().clone()),
        )
        .await;
        tracing::info!(steps = definition.len(), "saga started");

        // (step index, report index) of every step whose execute succeeded.
        let mut executed: Vec<(usize, usize)> = Vec::new();

        for (index, step) in definition.steps().iter().enumerate() {
            let name = step.name();

            if !step.guard(ctx).await {
                tracing::debug!(step = name, "step skipped by guard");
                report.record(name, StepOutcome::Skipped);
                self.record(saga_id, SagaEvent::step_skipped(name)).await;
                continue;
            }

            let limit = self.step_timeout(definition, step.as_ref());
            self.record(saga_id, SagaEvent::step_started(name)).await;
            tracing::debug!(step = name, timeout = ?limit, "step started");

            let error = match tokio::time::timeout(limit, step.execute(ctx)).await {
                Ok(Ok(())) => {
                    let slot = report.record(name, StepOutcome::Completed);
                    executed.push((index, slot));
                    self.record(saga_id, SagaEvent::step_completed(name)).await;
                    continue;
                }
                Ok(Err(e)) => e,
                Err(_) => StepError::TimedOut(limit),
            };

            let outcome = match &error {
                StepError::TimedOut(timeout) => StepOutcome::TimedOut { timeout: *timeout },
                other => StepOutcome::Failed {
                    reason: other.to_string(),
                },
            };
            report.record(name, outcome);
            self.record(saga_id, SagaEvent::step_failed(name, error.to_string()))
                .await;
            tracing::warn!(step = name, error = %error, "saga step failed, compensating");

            lifecycle.begin_compensation().await?;
            self.record(saga_id, SagaEvent::compensation_started(name))
                .await;
            self.compensate(definition, ctx, &executed, &mut report)
                .await;
            lifecycle.finish_compensation().await?;
            self.record(saga_id, SagaEvent::saga_failed(error.to_string()))
                .await;

            report.state = lifecycle.state()?;
            report.lifecycle = lifecycle.visited();
            report.duration = started.elapsed();

            metrics::counter!("saga_failed", "saga" => definition.name().to_string()).increment(1);
            metrics::histogram!("saga_duration_seconds", "saga" => definition.name().to_string())
                .record(report.duration.as_secs_f64());
            tracing::info!(
                step = name,
                compensated = report.compensation_order.len(),
                failed_compensations = report.compensation_failures().len(),
                "saga failed"
            );

            let saga = definition.name().to_string();
            let step = name.to_string();
            let report = Box::new(report);
            return Err(match error {
                StepError::TimedOut(timeout) => SagaError::StepTimedOut {
                    saga,
                    step,
                    timeout,
                    report,
                },
                source => SagaError::StepFailed {
                    saga,
                    step,
                    source,
                    report,
                },
            });
        }

        lifecycle.complete().await?;
        self.record(saga_id, SagaEvent::saga_completed()).await;

        report.state = lifecycle.state()?;
        report.lifecycle = lifecycle.visited();
        report.duration = started.elapsed();

        metrics::counter!("saga_completed", "saga" => definition.name().to_string()).increment(1);
        metrics::histogram!("saga_duration_seconds", "saga" => definition.name().to_string())
            .record(report.duration.as_secs_f64());
        tracing::info!(duration = ?report.duration, "saga completed successfully");

        Ok(report)
    }

    /// Compensates executed steps, most recent first. Never stops early.
    async fn compensate(
        &self,
        definition: &SagaDefinition,
        ctx: &mut SagaContext,
        executed: &[(usize, usize)],
        report: &mut SagaReport,
    ) {
        let saga_id = report.saga_id;

        for &(index, slot) in executed.iter().rev() {
            let Some(step) = definition.steps().get(index) else {
                continue;
            };
            let name = step.name();

            if !step.has_compensation() {
                report.set_compensation(slot, CompensationOutcome::NotRequired);
                continue;
            }

            report.compensation_order.push(name.to_string());
            let limit = self.step_timeout(definition, step.as_ref());
            let result = match tokio::time::timeout(limit, step.compensate(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(StepError::TimedOut(limit)),
            };

            match result {
                Ok(()) => {
                    tracing::debug!(step = name, "step compensated");
                    report.set_compensation(slot, CompensationOutcome::Compensated);
                    self.record(saga_id, SagaEvent::compensation_step_completed(name))
                        .await;
                }
                Err(e) => {
                    tracing::warn!(step = name, error = %e, "compensation failed, continuing unwind");
                    metrics::counter!(
                        "saga_compensation_failures_total",
                        "saga" => definition.name().to_string()
                    )
                    .increment(1);
                    report.set_compensation(
                        slot,
                        CompensationOutcome::Failed {
                            reason: e.to_string(),
                        },
                    );
                    self.record(
                        saga_id,
                        SagaEvent::compensation_step_failed(name, e.to_string()),
                    )
                    .await;
                }
            }
        }
    }

    fn step_timeout(&self, definition: &SagaDefinition, step: &dyn SagaStep) -> Duration {
        step.timeout()
            .or(definition.timeout())
            .unwrap_or(self.config.default_step_timeout)
    }

    async fn record(&self, saga_id: SagaId, event: SagaEvent) {
        if let Err(e) = self.journal.append(saga_id, &event).await {
            tracing::warn!(
                %saga_id,
                event = event.event_type(),
                error = %e,
                "failed to journal saga event"
            );
        }
    }
}

impl Default for SagaExecutor {
    fn default() -> Self {
        Self::new(SagaConfig::default())
    }
}
