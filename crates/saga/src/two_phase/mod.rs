//! Two-phase commit across participants discovered while a saga runs.
//!
//! Participants implement prepare, commit and abort against their own
//! resource. A coordinator decides between commit and abort; the default
//! [`SequentialCoordinator`] calls participants one at a time in order.

pub mod coordinator;
pub mod participant;
pub mod step;

use std::sync::Arc;

use async_trait::async_trait;
use common::TransactionId;

use crate::error::{ParticipantError, TwoPhaseError};

pub use coordinator::{ParallelPrepareCoordinator, SequentialCoordinator};
pub use participant::{CallLog, InMemoryParticipant, ParticipantCall};
pub use step::TwoPhaseCommitStep;

/// A resource taking part in a two-phase commit.
///
/// `abort` may be called for a transaction the participant never prepared
/// and must then succeed as a no-op.
#[async_trait]
pub trait TwoPhaseCommitParticipant: Send + Sync {
    /// Identifies the participant in errors and logs.
    fn id(&self) -> &str;

    async fn prepare(&self, tx: &TransactionId) -> Result<(), ParticipantError>;

    async fn commit(&self, tx: &TransactionId) -> Result<(), ParticipantError>;

    async fn abort(&self, tx: &TransactionId) -> Result<(), ParticipantError>;
}

/// Drives one transaction to commit or abort.
#[async_trait]
pub trait TwoPhaseCommitCoordinator: Send + Sync {
    async fn execute(
        &self,
        tx: &TransactionId,
        participants: &[Arc<dyn TwoPhaseCommitParticipant>],
    ) -> Result<(), TwoPhaseError>;
}
