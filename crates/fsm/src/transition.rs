use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// What a guard or action is told about the transition it runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionInfo {
    pub from: String,
    pub to: String,
    pub event: String,
}

/// Failure reported by an action or hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ActionError(pub String);

impl ActionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<&str> for ActionError {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

impl From<String> for ActionError {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

/// The step of a transition that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The guard itself failed, as opposed to rejecting the event.
    Guard,
    Before,
    Exit,
    /// Transition action at this index.
    Action(usize),
    Enter,
    After,
    /// The transition's timeout elapsed.
    Timeout,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Guard => f.write_str("guard"),
            Phase::Before => f.write_str("before hook"),
            Phase::Exit => f.write_str("exit action"),
            Phase::Action(i) => write!(f, "action #{i}"),
            Phase::Enter => f.write_str("enter action"),
            Phase::After => f.write_str("after hook"),
            Phase::Timeout => f.write_str("timeout"),
        }
    }
}

/// Decides whether a transition may be taken.
///
/// `Ok(false)` rejects the event; an error fails the transition in
/// [`Phase::Guard`].
#[async_trait]
pub trait Guard<D>: Send + Sync {
    async fn allows(&self, info: &TransitionInfo, data: &D) -> Result<bool, ActionError>;
}

/// A side effect run during a transition or on entering/leaving a state.
#[async_trait]
pub trait Action<D>: Send + Sync {
    async fn run(&self, info: &TransitionInfo, data: &mut D) -> Result<(), ActionError>;
}

struct GuardFn<F>(F);

#[async_trait]
impl<D, F> Guard<D> for GuardFn<F>
where
    D: Send + Sync,
    F: Fn(&TransitionInfo, &D) -> bool + Send + Sync,
{
    async fn allows(&self, info: &TransitionInfo, data: &D) -> Result<bool, ActionError> {
        Ok((self.0)(info, data))
    }
}

struct TryGuardFn<F>(F);

#[async_trait]
impl<D, F> Guard<D> for TryGuardFn<F>
where
    D: Send + Sync,
    F: Fn(&TransitionInfo, &D) -> Result<bool, ActionError> + Send + Sync,
{
    async fn allows(&self, info: &TransitionInfo, data: &D) -> Result<bool, ActionError> {
        (self.0)(info, data)
    }
}

struct ActionFn<F>(F);

#[async_trait]
impl<D, F> Action<D> for ActionFn<F>
where
    D: Send + Sync,
    F: Fn(&TransitionInfo, &mut D) -> Result<(), ActionError> + Send + Sync,
{
    async fn run(&self, info: &TransitionInfo, data: &mut D) -> Result<(), ActionError> {
        (self.0)(info, data)
    }
}

/// Wraps a synchronous predicate as a [`Guard`].
pub fn guard_fn<D, F>(f: F) -> Arc<dyn Guard<D>>
where
    D: Send + Sync + 'static,
    F: Fn(&TransitionInfo, &D) -> bool + Send + Sync + 'static,
{
    Arc::new(GuardFn(f))
}

/// Wraps a synchronous predicate that can fail as a [`Guard`].
pub fn try_guard_fn<D, F>(f: F) -> Arc<dyn Guard<D>>
where
    D: Send + Sync + 'static,
    F: Fn(&TransitionInfo, &D) -> Result<bool, ActionError> + Send + Sync + 'static,
{
    Arc::new(TryGuardFn(f))
}

/// Wraps a synchronous closure as an [`Action`].
pub fn action_fn<D, F>(f: F) -> Arc<dyn Action<D>>
where
    D: Send + Sync + 'static,
    F: Fn(&TransitionInfo, &mut D) -> Result<(), ActionError> + Send + Sync + 'static,
{
    Arc::new(ActionFn(f))
}

/// A guarded move from one state to another on an event.
pub struct Transition<D> {
    pub(crate) from: String,
    pub(crate) event: String,
    pub(crate) to: String,
    pub(crate) guard: Option<Arc<dyn Guard<D>>>,
    pub(crate) actions: Vec<Arc<dyn Action<D>>>,
    pub(crate) before: Option<Arc<dyn Action<D>>>,
    pub(crate) after: Option<Arc<dyn Action<D>>>,
    pub(crate) timeout: Option<Duration>,
}

impl<D> Transition<D> {
    pub fn new(from: impl Into<String>, event: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            event: event.into(),
            to: to.into(),
            guard: None,
            actions: Vec::new(),
            before: None,
            after: None,
            timeout: None,
        }
    }

    /// Only take this transition when `guard` allows it.
    pub fn guard(mut self, guard: Arc<dyn Guard<D>>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Appends an action. Actions run in the order they were added.
    pub fn action(mut self, action: Arc<dyn Action<D>>) -> Self {
        self.actions.push(action);
        self
    }

    pub fn before(mut self, hook: Arc<dyn Action<D>>) -> Self {
        self.before = Some(hook);
        self
    }

    pub fn after(mut self, hook: Arc<dyn Action<D>>) -> Self {
        self.after = Some(hook);
        self
    }

    /// Bounds the execution phases (everything after the guard).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn from_state(&self) -> &str {
        &self.from
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn to_state(&self) -> &str {
        &self.to
    }

    pub(crate) fn info(&self) -> TransitionInfo {
        TransitionInfo {
            from: self.from.clone(),
            to: self.to.clone(),
            event: self.event.clone(),
        }
    }

    pub(crate) async fn allows(
        &self,
        info: &TransitionInfo,
        data: &D,
    ) -> Result<bool, ActionError> {
        match &self.guard {
            Some(guard) => guard.allows(info, data).await,
            None => Ok(true),
        }
    }
}

impl<D> std::fmt::Debug for Transition<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("event", &self.event)
            .field("to", &self.to)
            .field("guarded", &self.guard.is_some())
            .field("actions", &self.actions.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
