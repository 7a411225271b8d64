//! Correlation engine.
//!
//! Turns a fire-and-forget event bus into something that can be awaited: a
//! caller registers a waiter for a correlation id and one or more event types,
//! and the engine resolves it with the first matching event, a timeout, an
//! explicit cancel, or engine shutdown, whichever happens first.
//!
//! Guarantees:
//! - an event with correlation id X never resolves a waiter registered under Y
//! - a waiter receives at most one event; later matches are dropped
//! - delivery never blocks the event source
//! - a subscription per event type is held only while some waiter needs it

pub mod awaiter;
pub mod config;
pub mod error;
mod waiter;

pub use awaiter::{AwaitSpec, EventAwaiter, MultiAwait, PendingAwait};
pub use config::AwaiterConfig;
pub use error::{AwaitError, Result};
pub use waiter::AwaitedEvent;
