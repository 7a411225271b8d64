use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::error::{FsmError, Result};
use crate::history::{History, HistoryEntry};
use crate::state::State;
use crate::transition::{Action, Phase, Transition, TransitionInfo};

/// What to do with an event whose transitions all have rejecting guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnmatchedPolicy {
    /// Keep the event so it can be inspected or retried later.
    #[default]
    Queue,
    /// Fail with [`FsmError::GuardRejected`].
    Reject,
}

/// Result of a successful [`StateMachine::trigger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Transitioned { from: String, to: String },
    /// Every guard rejected the event and it was queued.
    Queued,
}

impl TriggerOutcome {
    pub fn is_transitioned(&self) -> bool {
        matches!(self, TriggerOutcome::Transitioned { .. })
    }
}

type TransitionKey = (String, String);

/// Builder for [`StateMachine`].
pub struct StateMachineBuilder<D> {
    initial: String,
    states: Vec<State<D>>,
    transitions: Vec<Transition<D>>,
    history_limit: i64,
    policy: UnmatchedPolicy,
}

impl<D> StateMachineBuilder<D>
where
    D: Send + Sync,
{
    /// Adds a state with hooks. Declaring a state twice keeps the last one.
    pub fn state(mut self, state: State<D>) -> Self {
        self.states.push(state);
        self
    }

    pub fn transition(mut self, transition: Transition<D>) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Caps the history. Zero or less disables it.
    pub fn history_limit(mut self, limit: i64) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn unmatched(mut self, policy: UnmatchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds the machine around `data`.
    ///
    /// The initial state and every transition endpoint are added as plain
    /// states if they were not declared.
    pub fn build(self, data: D) -> StateMachine<D> {
        let mut order: Vec<String> = Vec::new();
        let mut states: HashMap<String, State<D>> = HashMap::new();

        let mut add = |name: &str, state: Option<State<D>>| {
            if !states.contains_key(name) {
                order.push(name.to_string());
            }
            match state {
                Some(state) => {
                    states.insert(name.to_string(), state);
                }
                None => {
                    states
                        .entry(name.to_string())
                        .or_insert_with(|| State::new(name));
                }
            }
        };

        add(&self.initial, None);
        for state in self.states {
            let name = state.name.clone();
            add(&name, Some(state));
        }
        for t in &self.transitions {
            add(&t.from, None);
            add(&t.to, None);
        }

        let mut transitions: HashMap<TransitionKey, Vec<Transition<D>>> = HashMap::new();
        for t in self.transitions {
            transitions
                .entry((t.from.clone(), t.event.clone()))
                .or_default()
                .push(t);
        }

        StateMachine {
            current: self.initial.clone(),
            initial: self.initial,
            order,
            states,
            transitions,
            history: History::with_limit(self.history_limit),
            queue: VecDeque::new(),
            policy: self.policy,
            started: false,
            data,
        }
    }
}

/// A running state machine owning its data.
///
/// Transitions take `&mut self`, so one machine runs one transition at a time.
pub struct StateMachine<D> {
    initial: String,
    current: String,
    order: Vec<String>,
    states: HashMap<String, State<D>>,
    transitions: HashMap<TransitionKey, Vec<Transition<D>>>,
    history: History,
    queue: VecDeque<String>,
    policy: UnmatchedPolicy,
    started: bool,
    data: D,
}

impl<D> StateMachine<D>
where
    D: Send + Sync,
{
    pub fn builder(initial: impl Into<String>) -> StateMachineBuilder<D> {
        StateMachineBuilder {
            initial: initial.into(),
            states: Vec::new(),
            transitions: Vec::new(),
            history_limit: History::DEFAULT_LIMIT,
            policy: UnmatchedPolicy::default(),
        }
    }

    /// Enters the initial state. Runs its enter action once.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(FsmError::AlreadyStarted);
        }
        let info = TransitionInfo {
            from: self.initial.clone(),
            to: self.initial.clone(),
            event: String::new(),
        };
        if let Some(enter) = self.enter_action(&self.initial) {
            enter
                .run(&info, &mut self.data)
                .await
                .map_err(|e| failure(&info, Phase::Enter, e.to_string()))?;
        }

        self.started = true;
        self.current = self.initial.clone();
        self.history.record(&self.initial, None);
        tracing::debug!(state = %self.initial, "state machine started");
        Ok(())
    }

    /// Fires `event` from the current state.
    pub async fn trigger(&mut self, event: &str) -> Result<TriggerOutcome> {
        if !self.started {
            return Err(FsmError::NotStarted);
        }

        let key = (self.current.clone(), event.to_string());
        let Some(candidates) = self.transitions.get(&key) else {
            return Err(FsmError::NoTransition {
                state: self.current.clone(),
                event: event.to_string(),
            });
        };

        let mut selected = None;
        for (index, transition) in candidates.iter().enumerate() {
            let info = transition.info();
            match transition.allows(&info, &self.data).await {
                Ok(true) => {
                    selected = Some(index);
                    break;
                }
                Ok(false) => {}
                Err(e) => return Err(failure(&info, Phase::Guard, e.to_string())),
            }
        }

        let Some(index) = selected else {
            return match self.policy {
                UnmatchedPolicy::Queue => {
                    tracing::debug!(state = %self.current, %event, "event queued");
                    self.queue.push_back(event.to_string());
                    Ok(TriggerOutcome::Queued)
                }
                UnmatchedPolicy::Reject => Err(FsmError::GuardRejected {
                    state: self.current.clone(),
                    event: event.to_string(),
                }),
            };
        };

        let transition = &candidates[index];
        let info = transition.info();
        let plan = self.plan(transition);
        let timeout = transition.timeout;

        match timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, run_plan(&plan, &info, &mut self.data)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(failure(
                            &info,
                            Phase::Timeout,
                            format!("exceeded {limit:?}"),
                        ));
                    }
                }
            }
            None => run_plan(&plan, &info, &mut self.data).await?,
        }

        self.current = info.to.clone();
        self.history.record(&info.to, Some(event));
        metrics::counter!("fsm_transitions_total").increment(1);
        tracing::debug!(from = %info.from, to = %info.to, %event, "transition taken");

        Ok(TriggerOutcome::Transitioned {
            from: info.from,
            to: info.to,
        })
    }

    /// True if `event` would currently select a transition. Runs guards only;
    /// a failing guard counts as a rejection.
    pub async fn can_transition(&self, event: &str) -> bool {
        if !self.started {
            return false;
        }
        let key = (self.current.clone(), event.to_string());
        let Some(candidates) = self.transitions.get(&key) else {
            return false;
        };
        for transition in candidates {
            if let Ok(true) = transition.allows(&transition.info(), &self.data).await {
                return true;
            }
        }
        false
    }

    /// Returns to the initial state.
    ///
    /// Runs exit(current) and enter(initial), then clears the queue and the
    /// history. The history afterwards holds only the initial entry.
    pub async fn reset(&mut self) -> Result<()> {
        let info = TransitionInfo {
            from: self.current.clone(),
            to: self.initial.clone(),
            event: String::new(),
        };

        if self.started
            && let Some(exit) = self.exit_action(&self.current)
        {
            exit.run(&info, &mut self.data)
                .await
                .map_err(|e| failure(&info, Phase::Exit, e.to_string()))?;
        }
        if let Some(enter) = self.enter_action(&self.initial) {
            enter
                .run(&info, &mut self.data)
                .await
                .map_err(|e| failure(&info, Phase::Enter, e.to_string()))?;
        }

        self.current = self.initial.clone();
        self.started = true;
        self.queue.clear();
        self.history.clear();
        self.history.record(&self.initial, None);
        Ok(())
    }

    /// Moves to `state` without running any action, e.g. when rebuilding a
    /// machine from persisted state.
    pub fn restore(&mut self, state: &str) -> Result<()> {
        if !self.states.contains_key(state) {
            return Err(FsmError::UnknownState(state.to_string()));
        }
        self.current = state.to_string();
        self.started = true;
        Ok(())
    }

    /// Re-fires queued events in arrival order.
    ///
    /// Events whose guards still reject are queued again. Stops at the first
    /// error, putting the events not yet tried back in the queue.
    pub async fn retry_queued(&mut self) -> Result<Vec<TriggerOutcome>> {
        let pending: Vec<String> = self.queue.drain(..).collect();
        let mut outcomes = Vec::with_capacity(pending.len());

        for (i, event) in pending.iter().enumerate() {
            match self.trigger(event).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    self.queue.extend(pending[i + 1..].iter().cloned());
                    return Err(e);
                }
            }
        }
        Ok(outcomes)
    }

    pub fn current_state(&self) -> &str {
        &self.current
    }

    pub fn initial_state(&self) -> &str {
        &self.initial
    }

    pub fn is_in(&self, state: &str) -> bool {
        self.current == state
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// All known state names, in declaration order.
    pub fn states(&self) -> &[String] {
        &self.order
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.entries().cloned().collect()
    }

    pub fn queued_events(&self) -> Vec<String> {
        self.queue.iter().cloned().collect()
    }

    /// Removes and returns every queued event.
    pub fn drain_queued(&mut self) -> Vec<String> {
        self.queue.drain(..).collect()
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    pub fn into_data(self) -> D {
        self.data
    }

    fn enter_action(&self, state: &str) -> Option<Arc<dyn Action<D>>> {
        self.states.get(state).and_then(|s| s.on_enter.clone())
    }

    fn exit_action(&self, state: &str) -> Option<Arc<dyn Action<D>>> {
        self.states.get(state).and_then(|s| s.on_exit.clone())
    }

    /// The execution phases of a transition, in order.
    fn plan(&self, transition: &Transition<D>) -> Vec<(Phase, Arc<dyn Action<D>>)> {
        let mut plan = Vec::with_capacity(transition.actions.len() + 4);
        if let Some(before) = &transition.before {
            plan.push((Phase::Before, before.clone()));
        }
        if let Some(exit) = self.exit_action(&transition.from) {
            plan.push((Phase::Exit, exit));
        }
        for (i, action) in transition.actions.iter().enumerate() {
            plan.push((Phase::Action(i), action.clone()));
        }
        if let Some(enter) = self.enter_action(&transition.to) {
            plan.push((Phase::Enter, enter));
        }
        if let Some(after) = &transition.after {
            plan.push((Phase::After, after.clone()));
        }
        plan
    }
}

async fn run_plan<D: Send + Sync>(
    plan: &[(Phase, Arc<dyn Action<D>>)],
    info: &TransitionInfo,
    data: &mut D,
) -> Result<()> {
    for (phase, action) in plan {
        action
            .run(info, data)
            .await
            .map_err(|e| failure(info, *phase, e.to_string()))?;
    }
    Ok(())
}

fn failure(info: &TransitionInfo, phase: Phase, reason: String) -> FsmError {
    FsmError::TransitionFailed {
        from: info.from.clone(),
        to: info.to.clone(),
        event: info.event.clone(),
        phase,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transition::{ActionError, action_fn, guard_fn, try_guard_fn};

    #[derive(Default)]
    struct Door {
        log: Vec<String>,
        locked: bool,
    }

    fn logging(label: &'static str) -> Arc<dyn Action<Door>> {
        action_fn(move |_info: &TransitionInfo, door: &mut Door| {
            door.log.push(label.to_string());
            Ok(())
        })
    }

    fn door_machine() -> StateMachine<Door> {
        StateMachine::builder("closed")
            .state(
                State::new("closed")
                    .on_enter(logging("enter closed"))
                    .on_exit(logging("exit closed")),
            )
            .state(State::new("open").on_enter(logging("enter open")))
            .transition(
                Transition::new("closed", "open", "open")
                    .guard(guard_fn(|_: &TransitionInfo, door: &Door| !door.locked))
                    .before(logging("before"))
                    .action(logging("action 0"))
                    .action(logging("action 1"))
                    .after(logging("after")),
            )
            .transition(Transition::new("open", "close", "closed"))
            .build(Door::default())
    }

    #[tokio::test]
    async fn test_phases_run_in_order() {
        let mut machine = door_machine();
        machine.start().await.unwrap();
        machine.data_mut().log.clear();

        let outcome = machine.trigger("open").await.unwrap();

        assert_eq!(
            outcome,
            TriggerOutcome::Transitioned {
                from: "closed".to_string(),
                to: "open".to_string()
            }
        );
        assert_eq!(
            machine.data().log,
            vec![
                "before",
                "exit closed",
                "action 0",
                "action 1",
                "enter open",
                "after"
            ]
        );
    }

    #[tokio::test]
    async fn test_trigger_before_start_fails() {
        let mut machine = door_machine();
        assert_eq!(machine.trigger("open").await, Err(FsmError::NotStarted));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut machine = door_machine();
        machine.start().await.unwrap();
        assert_eq!(machine.start().await, Err(FsmError::AlreadyStarted));
        assert_eq!(machine.data().log, vec!["enter closed"]);
    }

    #[tokio::test]
    async fn test_unknown_event_is_no_transition() {
        let mut machine = door_machine();
        machine.start().await.unwrap();
        assert!(matches!(
            machine.trigger("kick").await,
            Err(FsmError::NoTransition { .. })
        ));
        assert!(machine.queued_events().is_empty());
    }

    #[tokio::test]
    async fn test_failing_action_leaves_state_unchanged() {
        let mut machine = StateMachine::builder("a")
            .transition(
                Transition::new("a", "go", "b")
                    .action(action_fn(|_: &TransitionInfo, _: &mut ()| Ok(())))
                    .action(action_fn(|_: &TransitionInfo, _: &mut ()| {
                        Err(ActionError::from("boom"))
                    })),
            )
            .build(());
        machine.start().await.unwrap();

        let err = machine.trigger("go").await.unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Action(1)));
        assert!(machine.is_in("a"));
        assert_eq!(machine.history().len(), 1);
    }

    #[tokio::test]
    async fn test_first_passing_guard_wins() {
        let mut machine = StateMachine::builder("idle")
            .transition(
                Transition::new("idle", "go", "never")
                    .guard(guard_fn(|_: &TransitionInfo, _: &u8| false)),
            )
            .transition(Transition::new("idle", "go", "first"))
            .transition(Transition::new("idle", "go", "second"))
            .build(0u8);
        machine.start().await.unwrap();

        machine.trigger("go").await.unwrap();
        assert_eq!(machine.current_state(), "first");
    }

    #[tokio::test]
    async fn test_rejected_event_is_queued_then_retried() {
        let mut machine = door_machine();
        machine.start().await.unwrap();
        machine.data_mut().locked = true;

        assert_eq!(machine.trigger("open").await.unwrap(), TriggerOutcome::Queued);
        assert_eq!(machine.queued_events(), vec!["open".to_string()]);
        assert!(!machine.can_transition("open").await);

        machine.data_mut().locked = false;
        let outcomes = machine.retry_queued().await.unwrap();
        assert!(outcomes[0].is_transitioned());
        assert!(machine.is_in("open"));
        assert!(machine.queued_events().is_empty());
    }

    #[tokio::test]
    async fn test_reject_policy_reports_guard_rejection() {
        let mut machine = StateMachine::builder("closed")
            .transition(
                Transition::new("closed", "open", "open")
                    .guard(guard_fn(|_: &TransitionInfo, _: &()| false)),
            )
            .unmatched(UnmatchedPolicy::Reject)
            .build(());
        machine.start().await.unwrap();

        assert!(matches!(
            machine.trigger("open").await,
            Err(FsmError::GuardRejected { .. })
        ));
        assert!(machine.queued_events().is_empty());
    }

    #[tokio::test]
    async fn test_failing_guard_reports_guard_phase() {
        let mut machine = StateMachine::builder("closed")
            .transition(Transition::new("closed", "open", "open").guard(try_guard_fn(
                |_: &TransitionInfo, _: &()| Err(ActionError::new("sensor offline")),
            )))
            .build(());
        machine.start().await.unwrap();

        let err = machine.trigger("open").await.unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Guard));
        assert!(err.to_string().contains("sensor offline"));
        assert!(machine.is_in("closed"));
        assert!(machine.queued_events().is_empty());
        assert!(!machine.can_transition("open").await);
    }

    #[tokio::test]
    async fn test_transition_timeout() {
        struct Slow;

        #[async_trait::async_trait]
        impl Action<()> for Slow {
            async fn run(
                &self,
                _: &TransitionInfo,
                _: &mut (),
            ) -> std::result::Result<(), ActionError> {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                Ok(())
            }
        }

        let mut machine = StateMachine::builder("a")
            .transition(
                Transition::new("a", "go", "b")
                    .action(Arc::new(Slow))
                    .timeout(std::time::Duration::from_millis(20)),
            )
            .build(());
        machine.start().await.unwrap();

        let err = machine.trigger("go").await.unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Timeout));
        assert!(machine.is_in("a"));
    }

    #[tokio::test]
    async fn test_reset_returns_to_initial_and_clears_history() {
        let mut machine = door_machine();
        machine.start().await.unwrap();
        machine.trigger("open").await.unwrap();
        machine.data_mut().log.clear();

        machine.reset().await.unwrap();

        assert!(machine.is_in("closed"));
        assert_eq!(machine.data().log, vec!["enter closed"]);
        let history = machine.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, "closed");
    }

    #[tokio::test]
    async fn test_targets_are_auto_added_as_states() {
        let machine = StateMachine::builder("a")
            .transition(Transition::new("a", "go", "b"))
            .transition(Transition::new("b", "go", "c"))
            .build(());
        assert_eq!(machine.states(), &["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_restore_checks_state_exists() {
        let mut machine = door_machine();
        assert_eq!(
            machine.restore("ajar"),
            Err(FsmError::UnknownState("ajar".to_string()))
        );
        machine.restore("open").unwrap();
        assert!(machine.is_in("open"));
        assert!(machine.trigger("close").await.is_ok());
    }
}
