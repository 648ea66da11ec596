use async_trait::async_trait;

use super::{Executor, ExecutionContext};
use crate::error::ExecutionError;
use crate::events::task_progress;

/// `manualTask`, `businessRuleTask`, `task`: no real work, just a progress
/// frame and an immediate completion.
pub struct BasicExecutor;

#[async_trait]
impl Executor for BasicExecutor {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        ctx.emit(task_progress(&ctx.node.id, "completed", "", 1.0)).await;
        Ok(())
    }
}
