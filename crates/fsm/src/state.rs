use std::sync::Arc;

use crate::transition::Action;

/// A named state with optional enter and exit actions.
pub struct State<D> {
    pub(crate) name: String,
    pub(crate) on_enter: Option<Arc<dyn Action<D>>>,
    pub(crate) on_exit: Option<Arc<dyn Action<D>>>,
}

impl<D> State<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_enter: None,
            on_exit: None,
        }
    }

    pub fn on_enter(mut self, action: Arc<dyn Action<D>>) -> Self {
        self.on_enter = Some(action);
        self
    }

    pub fn on_exit(mut self, action: Arc<dyn Action<D>>) -> Self {
        self.on_exit = Some(action);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<D> std::fmt::Debug for State<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("on_enter", &self.on_enter.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .finish()
    }
}
