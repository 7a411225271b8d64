//! Saga lifecycle.
//!
//! ```text
//! NotStarted ──► Running ──┬──► Completed
//!                          └──► Compensating ──► Failed
//! ```
//!
//! Each run drives its own [`fsm::StateMachine`] through these states, so an
//! out-of-order move is rejected instead of silently applied.

use fsm::{StateMachine, Transition, UnmatchedPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    #[default]
    NotStarted,

    /// Steps are being executed.
    Running,

    /// A step failed and executed steps are being compensated.
    Compensating,

    /// Every step succeeded (terminal).
    Completed,

    /// Compensation finished after a failure (terminal).
    Failed,
}

impl SagaState {
    const ALL: [SagaState; 5] = [
        SagaState::NotStarted,
        SagaState::Running,
        SagaState::Compensating,
        SagaState::Completed,
        SagaState::Failed,
    ];

    pub fn can_run(&self) -> bool {
        matches!(self, SagaState::NotStarted)
    }

    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "NotStarted",
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::Failed => "Failed",
        }
    }

    /// Parses a name produced by [`as_str`](Self::as_str).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const START: &str = "start";
const COMPLETE: &str = "complete";
const FAIL: &str = "fail";
const COMPENSATED: &str = "compensated";

/// Lifecycle of a single saga run, backed by a state machine.
pub(crate) struct Lifecycle {
    machine: StateMachine<()>,
}

impl Lifecycle {
    pub(crate) async fn new() -> Result<Self> {
        let machine = StateMachine::builder(SagaState::NotStarted.as_str())
            .transition(Transition::new(
                SagaState::NotStarted.as_str(),
                START,
                SagaState::Running.as_str(),
            ))
            .transition(Transition::new(
                SagaState::Running.as_str(),
                COMPLETE,
                SagaState::Completed.as_str(),
            ))
            .transition(Transition::new(
                SagaState::Running.as_str(),
                FAIL,
                SagaState::Compensating.as_str(),
            ))
            .transition(Transition::new(
                SagaState::Compensating.as_str(),
                COMPENSATED,
                SagaState::Failed.as_str(),
            ))
            .unmatched(UnmatchedPolicy::Reject)
            .build(());

        let mut lifecycle = Self { machine };
        lifecycle.machine.start().await?;
        Ok(lifecycle)
    }

    pub(crate) async fn start(&mut self) -> Result<SagaState> {
        self.fire(START).await
    }

    pub(crate) async fn complete(&mut self) -> Result<SagaState> {
        self.fire(COMPLETE).await
    }

    pub(crate) async fn begin_compensation(&mut self) -> Result<SagaState> {
        self.fire(FAIL).await
    }

    pub(crate) async fn finish_compensation(&mut self) -> Result<SagaState> {
        self.fire(COMPENSATED).await
    }

    pub(crate) fn state(&self) -> Result<SagaState> {
        let name = self.machine.current_state();
        SagaState::from_name(name).ok_or_else(|| SagaError::InvalidState {
            expected: "a saga state".to_string(),
            actual: SagaState::default(),
        })
    }

    /// States visited so far, oldest first.
    pub(crate) fn visited(&self) -> Vec<SagaState> {
        self.machine
            .history()
            .iter()
            .filter_map(|entry| SagaState::from_name(&entry.state))
            .collect()
    }

    async fn fire(&mut self, event: &str) -> Result<SagaState> {
        self.machine.trigger(event).await?;
        self.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(SagaState::NotStarted.can_run());
        assert!(!SagaState::Running.can_run());
        assert!(SagaState::Running.can_compensate());
        assert!(!SagaState::Compensating.can_compensate());
        assert!(SagaState::Completed.is_terminal());
        assert!(SagaState::Failed.is_terminal());
        assert!(!SagaState::Compensating.is_terminal());
    }

    #[test]
    fn test_name_round_trip() {
        for state in SagaState::ALL {
            assert_eq!(SagaState::from_name(state.as_str()), Some(state));
            assert_eq!(state.to_string(), state.as_str());
        }
        assert_eq!(SagaState::from_name("Paused"), None);
    }

    #[tokio::test]
    async fn test_lifecycle_success_path() {
        let mut lifecycle = Lifecycle::new().await.unwrap();
        assert_eq!(lifecycle.state().unwrap(), SagaState::NotStarted);
        assert_eq!(lifecycle.start().await.unwrap(), SagaState::Running);
        assert_eq!(lifecycle.complete().await.unwrap(), SagaState::Completed);
        assert_eq!(
            lifecycle.visited(),
            vec![
                SagaState::NotStarted,
                SagaState::Running,
                SagaState::Completed
            ]
        );
    }

    #[tokio::test]
    async fn test_lifecycle_failure_path() {
        let mut lifecycle = Lifecycle::new().await.unwrap();
        lifecycle.start().await.unwrap();
        assert_eq!(
            lifecycle.begin_compensation().await.unwrap(),
            SagaState::Compensating
        );
        assert_eq!(
            lifecycle.finish_compensation().await.unwrap(),
            SagaState::Failed
        );
    }

    #[tokio::test]
    async fn test_lifecycle_rejects_out_of_order_moves() {
        let mut lifecycle = Lifecycle::new().await.unwrap();
        assert!(matches!(
            lifecycle.complete().await,
            Err(SagaError::Lifecycle(_))
        ));

        lifecycle.start().await.unwrap();
        lifecycle.complete().await.unwrap();
        assert!(lifecycle.begin_compensation().await.is_err());
        assert_eq!(lifecycle.state().unwrap(), SagaState::Completed);
    }
}
