//! Generic finite state machine.
//!
//! States are named; transitions are keyed by `(from, event)` and may carry a
//! guard, ordered actions, before/after hooks and a timeout. Several
//! transitions can share a key: the first one whose guard passes, in
//! registration order, is taken.
//!
//! Executing a transition runs, in order:
//!
//! ```text
//! guard ─► before ─► exit(from) ─► actions... ─► enter(to) ─► after
//! ```
//!
//! A failing phase aborts the transition and leaves the current state as it
//! was; a guard that errors, rather than rejecting, fails in the guard phase. Effects an earlier action already had on the machine data are not
//! undone.

pub mod error;
pub mod history;
pub mod machine;
pub mod state;
pub mod transition;

pub use error::{FsmError, Result};
pub use history::{History, HistoryEntry};
pub use machine::{StateMachine, StateMachineBuilder, TriggerOutcome, UnmatchedPolicy};
pub use state::State;
pub use transition::{
    Action, ActionError, Guard, Phase, Transition, TransitionInfo, action_fn, guard_fn,
    try_guard_fn,
};
