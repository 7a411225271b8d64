//! Saga instance rebuilt from its journal.

use common::CorrelationId;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::events::{SagaEvent, SagaId};
use crate::state::SagaState;

/// The state of one saga run as recorded in its journal.
///
/// Replaying a run's events reproduces what the executor knew at the time
/// the last event was written, which is enough to tell whether a crashed
/// run still owes compensations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    id: Option<SagaId>,
    saga_name: String,
    correlation_id: Option<CorrelationId>,
    state: SagaState,
    current_step: usize,
    completed_steps: Vec<String>,
    skipped_steps: Vec<String>,
    compensated_steps: Vec<String>,
    failed_compensations: Vec<String>,
    failure_reason: Option<String>,
}

impl SagaInstance {
    /// Rebuilds an instance from events in journal order.
    pub fn replay(events: impl IntoIterator<Item = SagaEvent>) -> Result<Self> {
        let mut saga = Self::default();
        for event in events {
            saga.apply(event)?;
        }
        Ok(saga)
    }

    /// Applies one event, rejecting events that cannot follow the current
    /// state.
    pub fn apply(&mut self, event: SagaEvent) -> Result<()> {
        match event {
            SagaEvent::SagaStarted(data) => {
                self.expect(SagaState::NotStarted)?;
                self.id = Some(data.saga_id);
                self.saga_name = data.saga_name;
                self.correlation_id = Some(data.correlation_id);
                self.state = SagaState::Running;
            }
            SagaEvent::StepSkipped(data) => {
                self.expect(SagaState::Running)?;
                self.skipped_steps.push(data.step_name);
            }
            SagaEvent::StepStarted(_) => {
                self.expect(SagaState::Running)?;
                self.current_step += 1;
            }
            SagaEvent::StepCompleted(data) => {
                self.expect(SagaState::Running)?;
                self.completed_steps.push(data.step_name);
            }
            SagaEvent::StepFailed(data) => {
                self.expect(SagaState::Running)?;
                self.failure_reason = Some(data.error);
            }
            SagaEvent::CompensationStarted(_) => {
                if !self.state.can_compensate() {
                    return Err(self.invalid(SagaState::Running));
                }
                self.state = SagaState::Compensating;
            }
            SagaEvent::CompensationStepCompleted(data) => {
                self.expect(SagaState::Compensating)?;
                self.compensated_steps.push(data.step_name);
            }
            SagaEvent::CompensationStepFailed(data) => {
                self.expect(SagaState::Compensating)?;
                self.failed_compensations.push(data.step_name);
            }
            SagaEvent::SagaCompleted(_) => {
                self.expect(SagaState::Running)?;
                self.state = SagaState::Completed;
            }
            SagaEvent::SagaFailed(data) => {
                self.expect(SagaState::Compensating)?;
                self.state = SagaState::Failed;
                self.failure_reason = Some(data.reason);
            }
        }
        Ok(())
    }

    fn expect(&self, expected: SagaState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid(expected))
        }
    }

    fn invalid(&self, expected: SagaState) -> SagaError {
        SagaError::InvalidState {
            expected: expected.to_string(),
            actual: self.state,
        }
    }
}

// Query methods
impl SagaInstance {
    pub fn id(&self) -> Option<SagaId> {
        self.id
    }

    pub fn saga_name(&self) -> &str {
        &self.saga_name
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Number of steps that were started.
    pub fn started_steps(&self) -> usize {
        self.current_step
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    pub fn skipped_steps(&self) -> &[String] {
        &self.skipped_steps
    }

    /// Compensated steps in the order they were undone.
    pub fn compensated_steps(&self) -> &[String] {
        &self.compensated_steps
    }

    pub fn failed_compensations(&self) -> &[String] {
        &self.failed_compensations
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Completed steps not yet compensated, most recent first. This is the
    /// unwind still owed by a run that stopped before finishing. Empty once
    /// the run completed.
    pub fn pending_compensations(&self) -> Vec<&str> {
        if self.state == SagaState::Completed {
            return Vec::new();
        }
        self.completed_steps
            .iter()
            .rev()
            .filter(|step| {
                !self.compensated_steps.contains(step) && !self.failed_compensations.contains(step)
            })
            .map(String::as_str)
            .collect()
    }
}
