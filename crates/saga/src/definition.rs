use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SagaError};
use crate::step::SagaStep;

/// An ordered list of steps under a name. Cheap to clone and reusable across
/// any number of runs.
#[derive(Clone)]
pub struct SagaDefinition {
    name: String,
    steps: Vec<Arc<dyn SagaStep>>,
    timeout: Option<Duration>,
}

impl SagaDefinition {
    pub fn builder(name: impl Into<String>) -> SagaDefinitionBuilder {
        SagaDefinitionBuilder {
            name: name.into(),
            steps: Vec::new(),
            timeout: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Arc<dyn SagaStep>] {
        &self.steps
    }

    /// Per-step timeout for steps that do not declare their own.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for SagaDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaDefinition")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub struct SagaDefinitionBuilder {
    name: String,
    steps: Vec<Arc<dyn SagaStep>>,
    timeout: Option<Duration>,
}

impl SagaDefinitionBuilder {
    /// Appends a step. Steps run in the order they are added.
    pub fn step(self, step: impl SagaStep + 'static) -> Self {
        self.shared_step(Arc::new(step))
    }

    /// Appends a step that is also used elsewhere.
    pub fn shared_step(mut self, step: Arc<dyn SagaStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Step names key the context and the per-step correlation ids, so they
    /// must be unique within a definition.
    pub fn build(self) -> Result<SagaDefinition> {
        let mut seen = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if !seen.insert(step.name()) {
                return Err(SagaError::DuplicateStep {
                    saga: self.name.clone(),
                    step: step.name().to_string(),
                });
            }
        }

        Ok(SagaDefinition {
            name: self.name,
            steps: self.steps,
            timeout: self.timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SagaContext;
    use crate::error::StepError;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl SagaStep for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, _ctx: &mut SagaContext) -> std::result::Result<(), StepError> {
            Ok(())
        }
    }

    #[test]
    fn test_build_keeps_step_order() {
        let definition = SagaDefinition::builder("ordered")
            .step(Named("a"))
            .step(Named("b"))
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap();

        assert_eq!(definition.step_names(), vec!["a", "b"]);
        assert_eq!(definition.timeout(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_build_rejects_duplicate_step_names() {
        let err = SagaDefinition::builder("twice")
            .step(Named("a"))
            .step(Named("b"))
            .step(Named("a"))
            .build()
            .unwrap_err();

        match err {
            SagaError::DuplicateStep { saga, step } => {
                assert_eq!(saga, "twice");
                assert_eq!(step, "a");
            }
            other => panic!("expected DuplicateStep, got {other:?}"),
        }
    }
}
