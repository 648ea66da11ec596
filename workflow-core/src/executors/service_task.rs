use async_trait::async_trait;

use super::{Executor, ExecutionContext};
use crate::error::ExecutionError;
use crate::gateway::substitute_bare;
use crate::types::Value;

/// Two sub-forms per §4.3: `external-topic` publishes an abstract work item
/// and completes as soon as published; `expression` evaluates a templated
/// string and stores it.
pub struct ServiceTaskExecutor;

#[async_trait]
impl Executor for ServiceTaskExecutor {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        match ctx.node.prop_str("implementation").unwrap_or("expression") {
            "external-topic" => {
                let topic = ctx.node.prop_str("topic").unwrap_or(&ctx.node.id).to_string();
                let payload: std::collections::BTreeMap<String, Value> = ctx.variables.clone();
                ctx.bus.publish(
                    &format!("serviceTask:{topic}"),
                    &ctx.instance_id.to_string(),
                    Value::Map(payload),
                );
                Ok(())
            }
            _ => {
                let expr = ctx.node.prop_str("expression").unwrap_or("");
                let result_var = ctx.node.prop_str("resultVariable").unwrap_or("result");
                let rendered = substitute_bare(expr, ctx.variables);
                ctx.variables
                    .insert(result_var.to_string(), Value::String(rendered));
                Ok(())
            }
        }
    }
}
