//! Saga error types.

use std::time::Duration;

use common::TransactionId;
use fsm::FsmError;
use invocation::InvocationError;
use thiserror::Error;

use crate::report::SagaReport;
use crate::state::SagaState;

/// Errors that end a saga run.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A step failed. Earlier steps have been compensated; the report says how.
    #[error("Saga '{saga}' failed at step '{step}': {source}")]
    StepFailed {
        saga: String,
        step: String,
        #[source]
        source: StepError,
        report: Box<SagaReport>,
    },

    /// A step ran past its deadline and was cancelled.
    #[error("Saga '{saga}' step '{step}' timed out after {timeout:?}")]
    StepTimedOut {
        saga: String,
        step: String,
        timeout: Duration,
        report: Box<SagaReport>,
    },

    /// Saga is in an invalid state for the requested operation.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidState { expected: String, actual: SagaState },

    /// The lifecycle state machine refused a transition.
    #[error("Saga lifecycle error: {0}")]
    Lifecycle(#[from] FsmError),

    /// Two steps of one definition share a name.
    #[error("Saga '{saga}' defines step '{step}' more than once")]
    DuplicateStep { saga: String, step: String },
}

impl SagaError {
    /// The report of the failed run, for step failures and timeouts.
    pub fn report(&self) -> Option<&SagaReport> {
        match self {
            SagaError::StepFailed { report, .. } | SagaError::StepTimedOut { report, .. } => {
                Some(report)
            }
            _ => None,
        }
    }

    /// Name of the step that ended the run.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            SagaError::StepFailed { step, .. } | SagaError::StepTimedOut { step, .. } => {
                Some(step)
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SagaError::StepTimedOut { .. })
    }
}

/// Failure of a single step's execute or compensate.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    /// A value the step reads from the context is absent or has another type.
    #[error("Missing context value '{0}'")]
    MissingContext(String),

    #[error("Timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error(transparent)]
    TwoPhase(#[from] TwoPhaseError),
}

impl StepError {
    pub fn failed(reason: impl Into<String>) -> Self {
        StepError::Failed(reason.into())
    }
}

/// Error reported by a single two-phase-commit participant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ParticipantError(pub String);

impl ParticipantError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// One participant's failure inside a two-phase commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantFailure {
    pub participant: String,
    pub reason: String,
}

/// Two-phase commit failures.
#[derive(Debug, Clone, Error)]
pub enum TwoPhaseError {
    /// At least one participant could not prepare. Every participant was
    /// sent an abort and none was committed.
    #[error("Prepare failed for transaction {transaction_id} at participant '{participant}'")]
    PrepareFailed {
        transaction_id: TransactionId,
        participant: String,
        failures: Vec<ParticipantFailure>,
    },

    /// A participant failed to commit and was sent an abort.
    ///
    /// Participants listed in `committed` stay committed.
    #[error("Commit failed for transaction {transaction_id} at participant '{participant}': {reason}")]
    CommitFailed {
        transaction_id: TransactionId,
        participant: String,
        reason: String,
        committed: Vec<String>,
    },

    #[error("Transaction has no participants")]
    NoParticipants,
}

impl TwoPhaseError {
    /// The participant the coordinator blames for the failure.
    pub fn participant(&self) -> Option<&str> {
        match self {
            TwoPhaseError::PrepareFailed { participant, .. }
            | TwoPhaseError::CommitFailed { participant, .. } => Some(participant),
            TwoPhaseError::NoParticipants => None,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
