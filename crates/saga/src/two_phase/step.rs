use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::TransactionId;

use super::{SequentialCoordinator, TwoPhaseCommitCoordinator, TwoPhaseCommitParticipant};
use crate::context::SagaContext;
use crate::error::StepError;
use crate::step::SagaStep;

type Participants = Vec<Arc<dyn TwoPhaseCommitParticipant>>;
type ParticipantsFn = dyn Fn(&SagaContext) -> Result<Participants, StepError> + Send + Sync;

/// A saga step that runs a two-phase commit.
///
/// Participants are chosen from the context when the step runs, so earlier
/// steps decide which resources take part. The transaction id is stored in
/// the context under [`transaction_key`](Self::transaction_key) before the
/// coordinator is called. If the step is cancelled before the coordinator
/// returns, every participant is sent abort on a background task.
pub struct TwoPhaseCommitStep {
    name: String,
    participants: Arc<ParticipantsFn>,
    coordinator: Arc<dyn TwoPhaseCommitCoordinator>,
    compensation: Option<Arc<dyn SagaStep>>,
    transaction_key: String,
    timeout: Option<Duration>,
}

impl TwoPhaseCommitStep {
    pub fn new<F>(name: impl Into<String>, participants: F) -> Self
    where
        F: Fn(&SagaContext) -> Result<Participants, StepError> + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            transaction_key: format!("{name}.transaction_id"),
            name,
            participants: Arc::new(participants),
            coordinator: Arc::new(SequentialCoordinator),
            compensation: None,
            timeout: None,
        }
    }

    pub fn with_coordinator(mut self, coordinator: Arc<dyn TwoPhaseCommitCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Undoes a committed transaction by executing `step`. The transaction id
    /// is still in the context when it runs.
    pub fn compensate_with(mut self, step: Arc<dyn SagaStep>) -> Self {
        self.compensation = Some(step);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn transaction_key(&self) -> &str {
        &self.transaction_key
    }
}

#[async_trait]
impl SagaStep for TwoPhaseCommitStep {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(
        skip(self, ctx),
        fields(step = %self.name, transaction_id = tracing::field::Empty)
    )]
    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), StepError> {
        let participants = (self.participants)(ctx)?;
        let tx = TransactionId::new();
        tracing::Span::current().record("transaction_id", tx.as_str());
        ctx.insert(self.transaction_key.clone(), tx.clone());

        tracing::debug!(participants = participants.len(), "starting two-phase commit");
        let mut guard = AbortOnDrop::new(tx.clone(), participants);
        let result = self.coordinator.execute(&tx, &guard.participants).await;
        guard.disarm();
        result?;
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

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Sends abort to every participant when the coordinator is dropped before
/// it decided, e.g. because the step timed out mid-protocol.
struct AbortOnDrop {
    tx: TransactionId,
    participants: Participants,
    armed: bool,
}

impl AbortOnDrop {
    fn new(tx: TransactionId, participants: Participants) -> Self {
        Self {
            tx,
            participants,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let tx = self.tx.clone();
        let participants = std::mem::take(&mut self.participants);
        tracing::warn!(
            transaction_id = %tx,
            participants = participants.len(),
            "two-phase commit interrupted, aborting all participants"
        );
        metrics::counter!("two_phase_aborts_total", "phase" => "interrupted").increment(1);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for participant in &participants {
                        if let Err(e) = participant.abort(&tx).await {
                            tracing::warn!(
                                transaction_id = %tx,
                                participant = participant.id(),
                                error = %e,
                                "abort failed"
                            );
                        }
                    }
                });
            }
            Err(_) => tracing::warn!(
                transaction_id = %tx,
                "no runtime to abort interrupted transaction"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ParticipantError, TwoPhaseError};
    use crate::two_phase::{CallLog, InMemoryParticipant, ParticipantCall};
    use common::CorrelationId;

    fn step_over(list: Vec<InMemoryParticipant>) -> TwoPhaseCommitStep {
        TwoPhaseCommitStep::new("commit-all", move |_ctx| {
            Ok(list
                .iter()
                .map(|p| Arc::new(p.clone()) as Arc<dyn TwoPhaseCommitParticipant>)
                .collect())
        })
    }

    #[tokio::test]
    async fn test_stores_transaction_id_and_commits() {
        let log = CallLog::new();
        let a = InMemoryParticipant::new("a", log.clone());
        let step = step_over(vec![a.clone()]);
        let mut ctx = SagaContext::new(CorrelationId::new());

        step.execute(&mut ctx).await.unwrap();

        let tx = ctx.get::<TransactionId>(step.transaction_key()).unwrap();
        assert!(a.is_committed(tx));
        assert_eq!(step.transaction_key(), "commit-all.transaction_id");
    }

    #[tokio::test]
    async fn test_participants_come_from_context() {
        let log = CallLog::new();
        let step = TwoPhaseCommitStep::new("dynamic", {
            let log = log.clone();
            move |ctx: &SagaContext| {
                let ids = ctx
                    .get::<Vec<String>>("resources")
                    .ok_or_else(|| StepError::MissingContext("resources".to_string()))?;
                Ok(ids
                    .iter()
                    .map(|id| {
                        Arc::new(InMemoryParticipant::new(id.clone(), log.clone()))
                            as Arc<dyn TwoPhaseCommitParticipant>
                    })
                    .collect())
            }
        });

        let mut ctx = SagaContext::new(CorrelationId::new());
        assert!(matches!(
            step.execute(&mut ctx).await,
            Err(StepError::MissingContext(_))
        ));
        assert!(log.is_empty());

        ctx.insert("resources", vec!["x".to_string(), "y".to_string()]);
        step.execute(&mut ctx).await.unwrap();
        assert_eq!(log.count("x", ParticipantCall::Commit), 1);
        assert_eq!(log.count("y", ParticipantCall::Commit), 1);
    }

    #[tokio::test]
    async fn test_prepare_failure_surfaces_as_step_error() {
        let log = CallLog::new();
        let a = InMemoryParticipant::new("a", log.clone());
        let b = InMemoryParticipant::new("b", log.clone());
        b.set_fail_on_prepare(true);
        let step = step_over(vec![a, b]);

        let err = step
            .execute(&mut SagaContext::new(CorrelationId::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::TwoPhase(TwoPhaseError::PrepareFailed { .. })
        ));
        assert_eq!(log.count("a", ParticipantCall::Commit), 0);
    }

    /// Prepares forever; counts aborts.
    #[derive(Default)]
    struct Stalled {
        aborts: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl TwoPhaseCommitParticipant for Stalled {
        fn id(&self) -> &str {
            "stalled"
        }

        async fn prepare(&self, _tx: &TransactionId) -> Result<(), ParticipantError> {
            std::future::pending::<Result<(), ParticipantError>>().await
        }

        async fn commit(&self, _tx: &TransactionId) -> Result<(), ParticipantError> {
            Ok(())
        }

        async fn abort(&self, _tx: &TransactionId) -> Result<(), ParticipantError> {
            self.aborts
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_interrupted_commit_aborts_prepared_participants() {
        let log = CallLog::new();
        let fast = InMemoryParticipant::new("fast", log.clone());
        let stalled = Arc::new(Stalled::default());
        let step = TwoPhaseCommitStep::new("stuck", {
            let fast = fast.clone();
            let stalled = stalled.clone();
            move |_ctx: &SagaContext| {
                Ok(vec![
                    Arc::new(fast.clone()) as Arc<dyn TwoPhaseCommitParticipant>,
                    stalled.clone() as Arc<dyn TwoPhaseCommitParticipant>,
                ])
            }
        });
        let mut ctx = SagaContext::new(CorrelationId::new());

        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), step.execute(&mut ctx)).await;
        assert!(timed_out.is_err());

        let tx = ctx.get::<TransactionId>(step.transaction_key()).unwrap().clone();
        for _ in 0..100 {
            if log.count("fast", ParticipantCall::Abort) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            log.calls_for("fast"),
            vec![ParticipantCall::Prepare, ParticipantCall::Abort]
        );
        assert!(fast.is_aborted(&tx));
        assert!(!fast.is_prepared(&tx));
        assert_eq!(stalled.aborts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finished_commit_sends_no_extra_abort() {
        let log = CallLog::new();
        let a = InMemoryParticipant::new("a", log.clone());
        let step = step_over(vec![a]);

        step.execute(&mut SagaContext::new(CorrelationId::new()))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        assert_eq!(log.count("a", ParticipantCall::Abort), 0);
    }

    #[tokio::test]
    async fn test_no_compensation_by_default() {
        let step = step_over(Vec::new());
        assert!(!step.has_compensation());
        assert!(matches!(
            step.execute(&mut SagaContext::new(CorrelationId::new())).await,
            Err(StepError::TwoPhase(TwoPhaseError::NoParticipants))
        ));
    }
}
