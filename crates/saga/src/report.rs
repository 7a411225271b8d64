use std::time::Duration;

use common::CorrelationId;

use crate::events::SagaId;
use crate::state::SagaState;

/// How a step's forward action ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The guard declined the step.
    Skipped,
    Completed,
    Failed { reason: String },
    TimedOut { timeout: Duration },
}

/// How a step's compensation ended, if the unwind reached it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationOutcome {
    Compensated,
    Failed { reason: String },
    /// The step declares nothing to undo.
    NotRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: String,
    pub outcome: StepOutcome,
    pub compensation: Option<CompensationOutcome>,
}

/// What happened during one saga run.
#[derive(Debug, Clone)]
pub struct SagaReport {
    pub saga_id: SagaId,
    pub saga_name: String,
    pub correlation_id: CorrelationId,
    pub state: SagaState,
    /// Steps in definition order, up to and including the one that failed.
    pub steps: Vec<StepRecord>,
    /// Names of the steps whose compensation was attempted, in the order it
    /// ran.
    pub compensation_order: Vec<String>,
    /// Lifecycle states the run passed through.
    pub lifecycle: Vec<SagaState>,
    pub duration: Duration,
}

impl SagaReport {
    pub(crate) fn new(saga_id: SagaId, saga_name: &str, correlation_id: CorrelationId) -> Self {
        Self {
            saga_id,
            saga_name: saga_name.to_string(),
            correlation_id,
            state: SagaState::NotStarted,
            steps: Vec::new(),
            compensation_order: Vec::new(),
            lifecycle: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == SagaState::Completed
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Steps whose forward action succeeded, in execution order.
    pub fn executed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Completed)
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn skipped_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Skipped)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// `(step, reason)` for every compensation that failed.
    pub fn compensation_failures(&self) -> Vec<(&str, &str)> {
        self.steps
            .iter()
            .filter_map(|s| match &s.compensation {
                Some(CompensationOutcome::Failed { reason }) => {
                    Some((s.name.as_str(), reason.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    pub(crate) fn record(&mut self, name: &str, outcome: StepOutcome) -> usize {
        self.steps.push(StepRecord {
            name: name.to_string(),
            outcome,
            compensation: None,
        });
        self.steps.len() - 1
    }

    pub(crate) fn set_compensation(&mut self, index: usize, outcome: CompensationOutcome) {
        if let Some(record) = self.steps.get_mut(index) {
            record.compensation = Some(outcome);
        }
    }
}
