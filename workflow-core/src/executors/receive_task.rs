use async_trait::async_trait;
use std::time::Duration;

use super::{Executor, ExecutionContext};
use crate::error::ExecutionError;
use crate::gateway::substitute_bare;

/// Resolves `correlationKey` by `${var}` substitution, then blocks on the
/// message bus for a correlated payload.
pub struct ReceiveTaskExecutor;

#[async_trait]
impl Executor for ReceiveTaskExecutor {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let message_ref = ctx.node.prop_str("messageRef").unwrap_or("").to_string();
        let correlation_template = ctx.node.prop_str("correlationKey").unwrap_or("");
        let correlation_key = substitute_bare(correlation_template, ctx.variables);
        let timeout = ctx
            .node
            .prop_u64("timeoutMs")
            .map(Duration::from_millis);

        let payload = ctx
            .bus
            .wait_for_message(&ctx.node.id, &message_ref, &correlation_key, timeout, &ctx.cancel)
            .await
            .map_err(|e| match e {
                crate::error::BusError::Timeout { .. } => {
                    ExecutionError::MessageTimeout(ctx.node.id.clone())
                }
                crate::error::BusError::Cancelled(..) => {
                    ExecutionError::Cancelled(ctx.node.id.clone())
                }
            })?;

        if let Some(map) = payload.as_map() {
            for (k, v) in map {
                ctx.variables.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }
}
