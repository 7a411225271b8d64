//! Persistence for saga progress.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::aggregate::SagaInstance;
use crate::error::SagaError;
use crate::events::{SagaEvent, SagaId};

#[derive(Debug, Clone, Error)]
#[error("Saga journal error: {0}")]
pub struct JournalError(pub String);

/// Append-only record of what each saga run did.
///
/// The executor writes one event per step boundary. A failed append is
/// logged and the run carries on: the journal observes the saga, it does not
/// gate it.
#[async_trait]
pub trait SagaJournal: Send + Sync {
    async fn append(&self, saga_id: SagaId, event: &SagaEvent) -> Result<(), JournalError>;

    /// All events of one run in append order.
    async fn load(&self, saga_id: SagaId) -> Result<Vec<SagaEvent>, JournalError>;
}

/// Journal that keeps nothing. Used when no journal is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSagaJournal;

#[async_trait]
impl SagaJournal for NoopSagaJournal {
    async fn append(&self, _saga_id: SagaId, _event: &SagaEvent) -> Result<(), JournalError> {
        Ok(())
    }

    async fn load(&self, _saga_id: SagaId) -> Result<Vec<SagaEvent>, JournalError> {
        Ok(Vec::new())
    }
}

/// In-memory journal for tests and single-process use.
#[derive(Clone, Default)]
pub struct InMemorySagaJournal {
    runs: Arc<RwLock<HashMap<SagaId, Vec<SagaEvent>>>>,
    fail_on_append: Arc<AtomicBool>,
}

impl InMemorySagaJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following append fail until switched off.
    pub fn set_fail_on_append(&self, fail: bool) {
        self.fail_on_append.store(fail, Ordering::SeqCst);
    }

    pub async fn saga_ids(&self) -> Vec<SagaId> {
        self.runs.read().await.keys().copied().collect()
    }

    /// Total number of events across all runs.
    pub async fn event_count(&self) -> usize {
        self.runs.read().await.values().map(Vec::len).sum()
    }

    /// Rebuilds the instance for `saga_id` from its events.
    pub async fn instance(&self, saga_id: SagaId) -> Result<SagaInstance, SagaError> {
        let events = self
            .runs
            .read()
            .await
            .get(&saga_id)
            .cloned()
            .unwrap_or_default();
        SagaInstance::replay(events)
    }
}

#[async_trait]
impl SagaJournal for InMemorySagaJournal {
    async fn append(&self, saga_id: SagaId, event: &SagaEvent) -> Result<(), JournalError> {
        if self.fail_on_append.load(Ordering::SeqCst) {
            return Err(JournalError("append rejected".to_string()));
        }
        self.runs
            .write()
            .await
            .entry(saga_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn load(&self, saga_id: SagaId) -> Result<Vec<SagaEvent>, JournalError> {
        Ok(self
            .runs
            .read()
            .await
            .get(&saga_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SagaState;
    use common::CorrelationId;

    #[tokio::test]
    async fn test_append_and_load_keep_order_per_run() {
        let journal = InMemorySagaJournal::new();
        let a = SagaId::new();
        let b = SagaId::new();

        journal
            .append(a, &SagaEvent::saga_started(a, "s", CorrelationId::new()))
            .await
            .unwrap();
        journal
            .append(b, &SagaEvent::saga_started(b, "s", CorrelationId::new()))
            .await
            .unwrap();
        journal
            .append(a, &SagaEvent::step_started("one"))
            .await
            .unwrap();

        let events = journal.load(a).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type(), "StepStarted");
        assert_eq!(journal.load(b).await.unwrap().len(), 1);
        assert_eq!(journal.event_count().await, 3);
        assert_eq!(journal.saga_ids().await.len(), 2);
    }

    #[tokio::test]
    async fn test_instance_replays_run() {
        let journal = InMemorySagaJournal::new();
        let id = SagaId::new();
        for event in [
            SagaEvent::saga_started(id, "s", CorrelationId::new()),
            SagaEvent::step_started("one"),
            SagaEvent::step_completed("one"),
            SagaEvent::saga_completed(),
        ] {
            journal.append(id, &event).await.unwrap();
        }

        let instance = journal.instance(id).await.unwrap();
        assert_eq!(instance.state(), SagaState::Completed);
        assert_eq!(instance.id(), Some(id));
    }

    #[tokio::test]
    async fn test_fail_on_append() {
        let journal = InMemorySagaJournal::new();
        journal.set_fail_on_append(true);
        assert!(
            journal
                .append(SagaId::new(), &SagaEvent::saga_completed())
                .await
                .is_err()
        );
        assert_eq!(journal.event_count().await, 0);
    }

    #[tokio::test]
    async fn test_noop_journal_keeps_nothing() {
        let journal = NoopSagaJournal;
        let id = SagaId::new();
        journal
            .append(id, &SagaEvent::saga_completed())
            .await
            .unwrap();
        assert!(journal.load(id).await.unwrap().is_empty());
    }
}
