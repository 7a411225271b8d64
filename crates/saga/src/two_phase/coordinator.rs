use std::sync::Arc;

use async_trait::async_trait;
use common::TransactionId;
use futures_util::future::join_all;

use super::{TwoPhaseCommitCoordinator, TwoPhaseCommitParticipant};
use crate::error::{ParticipantFailure, TwoPhaseError};

type Participants = [Arc<dyn TwoPhaseCommitParticipant>];

/// Calls every participant one at a time, in the order given.
///
/// Prepare: the first failure aborts every participant, prepared or not, and
/// nothing is committed. Commit: a participant that fails to commit is sent
/// an abort and the transaction fails. Participants committed before it are
/// left committed and receive no further call; a stricter protocol needs a
/// different coordinator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialCoordinator;

#[async_trait]
impl TwoPhaseCommitCoordinator for SequentialCoordinator {
    #[tracing::instrument(
        skip(self, participants),
        fields(transaction_id = %tx, participants = participants.len())
    )]
    async fn execute(
        &self,
        tx: &TransactionId,
        participants: &Participants,
    ) -> Result<(), TwoPhaseError> {
        if participants.is_empty() {
            return Err(TwoPhaseError::NoParticipants);
        }

        for participant in participants {
            if let Err(e) = participant.prepare(tx).await {
                let failure = ParticipantFailure {
                    participant: participant.id().to_string(),
                    reason: e.to_string(),
                };
                return Err(prepare_failed(tx, participants, vec![failure]).await);
            }
        }

        commit_in_order(tx, participants).await
    }
}

/// Prepares every participant concurrently, then commits in order.
///
/// All prepare results are collected before deciding; any failure aborts
/// every participant. Commit follows the same rules as
/// [`SequentialCoordinator`]. Participants must tolerate a concurrent
/// prepare alongside other participants.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelPrepareCoordinator;

#[async_trait]
impl TwoPhaseCommitCoordinator for ParallelPrepareCoordinator {
    #[tracing::instrument(
        skip(self, participants),
        fields(transaction_id = %tx, participants = participants.len())
    )]
    async fn execute(
        &self,
        tx: &TransactionId,
        participants: &Participants,
    ) -> Result<(), TwoPhaseError> {
        if participants.is_empty() {
            return Err(TwoPhaseError::NoParticipants);
        }

        let results = join_all(participants.iter().map(|p| p.prepare(tx))).await;
        let failures: Vec<ParticipantFailure> = participants
            .iter()
            .zip(results)
            .filter_map(|(participant, result)| {
                result.err().map(|e| ParticipantFailure {
                    participant: participant.id().to_string(),
                    reason: e.to_string(),
                })
            })
            .collect();

        if !failures.is_empty() {
            return Err(prepare_failed(tx, participants, failures).await);
        }

        commit_in_order(tx, participants).await
    }
}

async fn prepare_failed(
    tx: &TransactionId,
    participants: &Participants,
    failures: Vec<ParticipantFailure>,
) -> TwoPhaseError {
    tracing::warn!(
        transaction_id = %tx,
        failed = failures.len(),
        "prepare failed, aborting all participants"
    );
    metrics::counter!("two_phase_aborts_total", "phase" => "prepare").increment(1);

    for participant in participants {
        abort(tx, participant.as_ref()).await;
    }

    let participant = failures
        .first()
        .map(|f| f.participant.clone())
        .unwrap_or_default();
    TwoPhaseError::PrepareFailed {
        transaction_id: tx.clone(),
        participant,
        failures,
    }
}

async fn commit_in_order(
    tx: &TransactionId,
    participants: &Participants,
) -> Result<(), TwoPhaseError> {
    let mut committed = Vec::with_capacity(participants.len());

    for participant in participants {
        if let Err(e) = participant.commit(tx).await {
            tracing::warn!(
                transaction_id = %tx,
                participant = participant.id(),
                error = %e,
                committed = committed.len(),
                "commit failed, aborting participant"
            );
            metrics::counter!("two_phase_aborts_total", "phase" => "commit").increment(1);
            abort(tx, participant.as_ref()).await;

            return Err(TwoPhaseError::CommitFailed {
                transaction_id: tx.clone(),
                participant: participant.id().to_string(),
                reason: e.to_string(),
                committed,
            });
        }
        committed.push(participant.id().to_string());
    }

    metrics::counter!("two_phase_commits_total").increment(1);
    tracing::debug!(
        transaction_id = %tx,
        participants = participants.len(),
        "transaction committed"
    );
    Ok(())
}

/// Best-effort abort. A failing abort is logged and otherwise ignored.
async fn abort(tx: &TransactionId, participant: &dyn TwoPhaseCommitParticipant) {
    if let Err(e) = participant.abort(tx).await {
        tracing::warn!(
            transaction_id = %tx,
            participant = participant.id(),
            error = %e,
            "abort failed"
        );
    }
}
