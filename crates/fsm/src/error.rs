use thiserror::Error;

use crate::transition::Phase;

/// Errors raised by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsmError {
    /// A transition was selected but one of its phases failed.
    #[error("Transition {from} -> {to} on '{event}' failed during {phase}: {reason}")]
    TransitionFailed {
        from: String,
        to: String,
        event: String,
        phase: Phase,
        reason: String,
    },

    /// No transition is registered for this state and event.
    #[error("No transition from '{state}' on '{event}'")]
    NoTransition { state: String, event: String },

    /// Transitions exist but every guard rejected the event.
    #[error("Every guard rejected '{event}' in state '{state}'")]
    GuardRejected { state: String, event: String },

    #[error("Unknown state: {0}")]
    UnknownState(String),

    #[error("State machine has not been started")]
    NotStarted,

    #[error("State machine has already been started")]
    AlreadyStarted,
}

impl FsmError {
    /// The failing phase, for transition failures.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            FsmError::TransitionFailed { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// Convenience type alias for state machine results.
pub type Result<T> = std::result::Result<T, FsmError>;
