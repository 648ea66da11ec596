use async_trait::async_trait;
use std::collections::BTreeMap;

use super::{Executor, ExecutionContext};
use crate::error::ExecutionError;
use crate::gateway::substitute_bare;
use crate::types::{Value, VariableScope};

/// Runs a named subgraph to completion via the injected `SubgraphRunner`,
/// applying input/output variable mappings around the call.
pub struct CallActivityExecutor;

#[async_trait]
impl Executor for CallActivityExecutor {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let called_element = ctx
            .node
            .prop_str("calledElement")
            .ok_or_else(|| ExecutionError::Other(format!("{} missing calledElement", ctx.node.id)))?
            .to_string();

        let inherit = ctx.node.prop_bool("inheritVariables", false);
        let mut child_scope: VariableScope = if inherit {
            ctx.variables.clone()
        } else {
            BTreeMap::new()
        };

        if let Some(serde_json::Value::Object(mapping)) = ctx.node.properties.get("inputMapping") {
            for (target, source) in mapping {
                if let Some(expr) = source.as_str() {
                    child_scope.insert(target.clone(), resolve_mapped_value(expr, ctx.variables));
                }
            }
        }

        let result_scope = ctx
            .subgraphs
            .run_subgraph(&called_element, child_scope, ctx.cancel.clone())
            .await
            .map_err(|e| ExecutionError::CallActivityFailed(ctx.node.id.clone(), Box::new(e)))?;

        if let Some(serde_json::Value::Object(mapping)) = ctx.node.properties.get("outputMapping") {
            for (caller_var, child_var) in mapping {
                if let Some(child_var) = child_var.as_str() {
                    if let Some(value) = result_scope.get(child_var) {
                        ctx.variables.insert(caller_var.clone(), value.clone());
                    }
                }
            }
        } else {
            for (k, v) in result_scope {
                ctx.variables.entry(k).or_insert(v);
            }
        }

        Ok(())
    }
}

/// When `expr` is exactly a single `${name}` reference, clones the named
/// variable's original `Value` rather than rendering it to a string, so
/// numeric/boolean values survive into the subgraph's gateway conditions.
fn resolve_mapped_value(expr: &str, scope: &VariableScope) -> Value {
    match bare_reference(expr) {
        Some(name) => scope.get(name).cloned().unwrap_or(Value::Null),
        None => Value::String(substitute_bare(expr, scope)),
    }
}

fn bare_reference(expr: &str) -> Option<&str> {
    let trimmed = expr.trim();
    trimmed.strip_prefix("${").and_then(|rest| rest.strip_suffix('}'))
}
