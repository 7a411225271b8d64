//! Typed command invocation.
//!
//! This crate turns the fire-and-forget transport into a request/reply
//! protocol:
//! - [`AsyncCommandBus`] publishes a command with the standard headers
//! - [`CommandInvoker`] publishes and waits for the correlated response event
//! - [`CommandRouter`] is the responder side, running a [`CommandHandler`] per
//!   command and publishing its reply with the caller's correlation id

pub mod bus;
pub mod command;
pub mod error;
pub mod invoker;
pub mod router;

pub use bus::AsyncCommandBus;
pub use command::{Command, CommandMetadata, ResponseEvent};
pub use error::{InvocationError, Result};
pub use invoker::{
    CommandInvoker, InvocationHandle, InvocationOutcome, InvokeOptions, InvokerConfig,
};
pub use router::{
    CommandContext, CommandHandler, CommandRouter, DEFAULT_ERROR_EVENT_TYPE, HandlerError, Reply,
};
