use std::time::Duration;

use async_trait::async_trait;

use crate::context::SagaContext;
use crate::error::StepError;

/// One unit of work in a saga, with its compensating action.
#[async_trait]
pub trait SagaStep: Send + Sync {
    fn name(&self) -> &str;

    /// Returning false skips the step; the saga moves on to the next one.
    async fn guard(&self, _ctx: &SagaContext) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), StepError>;

    /// Undoes a successful [`execute`](Self::execute). Only called for steps
    /// that executed successfully.
    async fn compensate(&self, _ctx: &mut SagaContext) -> Result<(), StepError> {
        Ok(())
    }

    /// False for steps with nothing to undo; the unwind then skips them.
    fn has_compensation(&self) -> bool {
        true
    }

    /// Hard limit for `execute` and `compensate`. `None` uses the saga's.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}
