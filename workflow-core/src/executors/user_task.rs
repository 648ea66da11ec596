use async_trait::async_trait;

use super::{user_task_keys, Executor, ExecutionContext};
use crate::error::ExecutionError;
use crate::events::user_task_created;
use crate::types::Value;

/// Registers an approval task with the observer hub, then blocks on its
/// completion handle. `rejected` is not a hard failure — the decision is
/// written into variables so downstream gateways can branch on it.
pub struct UserTaskExecutor;

#[async_trait]
impl Executor for UserTaskExecutor {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let task_id = ctx.node.id.clone();
        let rx = ctx.hub.register_user_task(&task_id);
        ctx.emit(user_task_created(&task_id, &task_id)).await;

        let decision = tokio::select! {
            result = rx => result.map_err(|_| ExecutionError::Other(format!(
                "user task {task_id} completion channel dropped"
            )))?,
            _ = ctx.cancel.cancelled() => {
                return Err(ExecutionError::Cancelled(task_id));
            }
        };

        let (decision_key, comments_key, completed_by_key) = user_task_keys(&ctx.node.id);
        ctx.variables.insert(decision_key, Value::String(decision.decision.clone()));
        ctx.variables.insert(
            comments_key,
            Value::String(decision.comments.clone().unwrap_or_default()),
        );
        ctx.variables
            .insert(completed_by_key, Value::String(decision.completed_by.clone()));

        // A `rejected` decision is not a hard failure — it is recorded above
        // so downstream gateways can branch on it; the normal outgoing flow
        // is always followed from here.
        Ok(())
    }
}
