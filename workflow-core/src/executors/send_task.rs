use async_trait::async_trait;

use super::{Executor, ExecutionContext};
use crate::error::{AdapterError, ExecutionError};
use crate::gateway::substitute_bare;

/// Resolves subject/body/recipient templates and delegates delivery to the
/// email adapter. When `messageRef`/`correlationKey` are set, appends
/// approve/deny links pointing at the public webhook surface.
pub struct SendTaskExecutor;

#[async_trait]
impl Executor for SendTaskExecutor {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let recipient = substitute_bare(ctx.node.prop_str("recipient").unwrap_or(""), ctx.variables);
        let subject = substitute_bare(ctx.node.prop_str("subject").unwrap_or(""), ctx.variables);
        let mut body = substitute_bare(ctx.node.prop_str("body").unwrap_or(""), ctx.variables);

        let message_ref = ctx.node.prop_str("messageRef");
        let correlation_template = ctx.node.prop_str("correlationKey");
        if let (Some(message_ref), Some(correlation_template)) = (message_ref, correlation_template) {
            let correlation_key = substitute_bare(correlation_template, ctx.variables);
            let base = &ctx.config.public_base_url;
            let approve = format!("{base}/webhooks/approve/{message_ref}/{correlation_key}");
            let deny = format!("{base}/webhooks/deny/{message_ref}/{correlation_key}");
            body.push_str(&format!("\n\nApprove: {approve}\nDeny: {deny}\n"));
        }

        ctx.adapters
            .email
            .send_email(&recipient, &subject, &body)
            .await
            .map_err(|e: AdapterError| ExecutionError::Other(e.to_string()))?;
        Ok(())
    }
}
