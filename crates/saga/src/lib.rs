//! Saga engine with compensating actions and a two-phase-commit step.
//!
//! A saga is an ordered list of [`SagaStep`]s run one after another against
//! a [`SagaContext`]. When a step fails or times out, every step that already
//! executed is compensated, most recent first, and the saga ends in
//! [`SagaState::Failed`]. The failed step itself is never compensated.
//!
//! ```text
//! step 1 ─► step 2 ─► step 3 ✗
//!              │         │
//!   undo 1 ◄─ undo 2 ◄───┘
//! ```
//!
//! [`CommandStep`] sends a command through an
//! [`invocation::CommandInvoker`] and keeps the reply;
//! [`TwoPhaseCommitStep`] runs a prepare/commit round over participants
//! chosen from the context.

pub mod aggregate;
pub mod command_step;
pub mod context;
pub mod definition;
pub mod error;
pub mod events;
pub mod executor;
pub mod journal;
pub mod report;
pub mod state;
pub mod step;
pub mod two_phase;

pub use aggregate::SagaInstance;
pub use command_step::CommandStep;
pub use context::SagaContext;
pub use definition::{SagaDefinition, SagaDefinitionBuilder};
pub use error::{
    ParticipantError, ParticipantFailure, Result, SagaError, StepError, TwoPhaseError,
};
pub use events::{SagaEvent, SagaId};
pub use executor::{SagaConfig, SagaExecutor};
pub use journal::{InMemorySagaJournal, JournalError, NoopSagaJournal, SagaJournal};
pub use report::{CompensationOutcome, SagaReport, StepOutcome, StepRecord};
pub use state::SagaState;
pub use step::SagaStep;
pub use two_phase::{
    CallLog, InMemoryParticipant, ParallelPrepareCoordinator, ParticipantCall,
    SequentialCoordinator, TwoPhaseCommitCoordinator, TwoPhaseCommitParticipant,
    TwoPhaseCommitStep,
};
