use async_trait::async_trait;

use super::{Executor, ExecutionContext};
use crate::error::ExecutionError;

pub struct ScriptTaskExecutor;

#[async_trait]
impl Executor for ScriptTaskExecutor {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let script = ctx.node.prop_str("script").unwrap_or("").to_string();
        let result_var = ctx.node.prop_str("resultVariable").unwrap_or("result").to_string();

        let value = ctx
            .adapters
            .script
            .eval(&script, ctx.variables)
            .map_err(|e| ExecutionError::ScriptFailure(ctx.node.id.clone(), e.to_string()))?;

        ctx.variables.insert(result_var, value);
        Ok(())
    }
}
