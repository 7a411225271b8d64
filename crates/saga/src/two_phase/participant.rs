//! In-memory participant for tests and the demo node.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::TransactionId;

use super::TwoPhaseCommitParticipant;
use crate::error::ParticipantError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantCall {
    Prepare,
    Commit,
    Abort,
}

/// Ordered record of participant calls, shared by several participants so
/// tests can assert on the interleaving.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<(String, ParticipantCall)>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, participant: &str, call: ParticipantCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((participant.to_string(), call));
    }

    /// Every call in the order it was made.
    pub fn entries(&self) -> Vec<(String, ParticipantCall)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_for(&self, participant: &str) -> Vec<ParticipantCall> {
        self.entries()
            .into_iter()
            .filter(|(id, _)| id == participant)
            .map(|(_, call)| call)
            .collect()
    }

    pub fn count(&self, participant: &str, call: ParticipantCall) -> usize {
        self.calls_for(participant)
            .into_iter()
            .filter(|c| *c == call)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

#[derive(Debug, Default)]
struct ParticipantState {
    prepared: HashSet<TransactionId>,
    committed: HashSet<TransactionId>,
    aborted: HashSet<TransactionId>,
    fail_on_prepare: bool,
    fail_on_commit: bool,
    fail_on_abort: bool,
}

/// Participant that tracks transactions in memory.
///
/// Failure switches make the next calls of a phase fail until switched off.
/// Clones share state.
#[derive(Debug, Clone)]
pub struct InMemoryParticipant {
    id: String,
    log: CallLog,
    state: Arc<Mutex<ParticipantState>>,
}

impl InMemoryParticipant {
    pub fn new(id: impl Into<String>, log: CallLog) -> Self {
        Self {
            id: id.into(),
            log,
            state: Arc::default(),
        }
    }

    pub fn set_fail_on_prepare(&self, fail: bool) {
        self.with_state(|s| s.fail_on_prepare = fail);
    }

    pub fn set_fail_on_commit(&self, fail: bool) {
        self.with_state(|s| s.fail_on_commit = fail);
    }

    pub fn set_fail_on_abort(&self, fail: bool) {
        self.with_state(|s| s.fail_on_abort = fail);
    }

    pub fn is_prepared(&self, tx: &TransactionId) -> bool {
        self.with_state(|s| s.prepared.contains(tx))
    }

    pub fn is_committed(&self, tx: &TransactionId) -> bool {
        self.with_state(|s| s.committed.contains(tx))
    }

    pub fn is_aborted(&self, tx: &TransactionId) -> bool {
        self.with_state(|s| s.aborted.contains(tx))
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ParticipantState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

#[async_trait]
impl TwoPhaseCommitParticipant for InMemoryParticipant {
    fn id(&self) -> &str {
        &self.id
    }

    async fn prepare(&self, tx: &TransactionId) -> Result<(), ParticipantError> {
        self.log.push(&self.id, ParticipantCall::Prepare);
        self.with_state(|s| {
            if s.fail_on_prepare {
                return Err(ParticipantError::new(format!("{} cannot prepare", self.id)));
            }
            s.prepared.insert(tx.clone());
            Ok(())
        })
    }

    async fn commit(&self, tx: &TransactionId) -> Result<(), ParticipantError> {
        self.log.push(&self.id, ParticipantCall::Commit);
        self.with_state(|s| {
            if s.fail_on_commit {
                return Err(ParticipantError::new(format!("{} cannot commit", self.id)));
            }
            if !s.prepared.remove(tx) {
                return Err(ParticipantError::new(format!(
                    "{} has not prepared {tx}",
                    self.id
                )));
            }
            s.committed.insert(tx.clone());
            Ok(())
        })
    }

    async fn abort(&self, tx: &TransactionId) -> Result<(), ParticipantError> {
        self.log.push(&self.id, ParticipantCall::Abort);
        self.with_state(|s| {
            if s.fail_on_abort {
                return Err(ParticipantError::new(format!("{} cannot abort", self.id)));
            }
            s.prepared.remove(tx);
            s.aborted.insert(tx.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prepare_then_commit() {
        let log = CallLog::new();
        let p = InMemoryParticipant::new("stock", log.clone());
        let tx = TransactionId::new();

        p.prepare(&tx).await.unwrap();
        assert!(p.is_prepared(&tx));
        p.commit(&tx).await.unwrap();
        assert!(p.is_committed(&tx));
        assert!(!p.is_prepared(&tx));
        assert_eq!(
            log.calls_for("stock"),
            vec![ParticipantCall::Prepare, ParticipantCall::Commit]
        );
    }

    #[tokio::test]
    async fn test_commit_without_prepare_fails() {
        let p = InMemoryParticipant::new("stock", CallLog::new());
        assert!(p.commit(&TransactionId::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_abort_of_unknown_transaction_succeeds() {
        let p = InMemoryParticipant::new("stock", CallLog::new());
        let tx = TransactionId::new();
        p.abort(&tx).await.unwrap();
        assert!(p.is_aborted(&tx));
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let p = InMemoryParticipant::new("pay", CallLog::new());
        let tx = TransactionId::new();

        p.set_fail_on_prepare(true);
        assert!(p.prepare(&tx).await.is_err());
        p.set_fail_on_prepare(false);
        p.prepare(&tx).await.unwrap();

        p.set_fail_on_commit(true);
        assert!(p.commit(&tx).await.is_err());
        assert!(p.is_prepared(&tx));

        p.set_fail_on_abort(true);
        assert!(p.abort(&tx).await.is_err());
    }

    #[tokio::test]
    async fn test_clones_share_state_and_log() {
        let log = CallLog::new();
        let p = InMemoryParticipant::new("a", log.clone());
        let clone = p.clone();
        let tx = TransactionId::new();

        clone.prepare(&tx).await.unwrap();
        assert!(p.is_prepared(&tx));
        assert_eq!(log.entries().len(), 1);
        assert!(!p.log().is_empty());
    }
}
