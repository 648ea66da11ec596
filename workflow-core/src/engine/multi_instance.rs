//! Multi-instance (`isMultiInstance`) and looping (`loopCondition`) activity
//! semantics. Parallel instances get isolated scope copies; sequential
//! instances and loop iterations share one scope across iterations.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::ExecutionError;
use crate::gateway::evaluate_condition;
use crate::graph::Node;
use crate::types::{Value, VariableScope};

use super::boundaries::{run_task_with_boundaries, TaskOutcome};
use super::InstanceState;

pub async fn run_multi_instance(
    state: &Arc<InstanceState>,
    node: &Node,
    scope: &mut VariableScope,
    cancel: &CancellationToken,
) -> Result<TaskOutcome, ExecutionError> {
    let collection_key = node.prop_str("inputCollection").unwrap_or_default();
    let items: Vec<Value> = match scope.get(collection_key) {
        Some(Value::List(items)) => items.clone(),
        _ => vec![Value::Null],
    };
    let item_var = node.prop_str("inputElement").unwrap_or("item").to_string();
    let element_key = node.prop_str("outputElement").unwrap_or("result").to_string();
    let default_collection_key = format!("{}_results", node.id);
    let collection_out_key = node
        .prop_str("outputCollection")
        .unwrap_or(&default_collection_key)
        .to_string();

    if node.prop_bool("isSequential", false) {
        let mut results = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            scope.insert(item_var.clone(), item);
            scope.insert("loopCounter".to_string(), Value::Number(i as f64));
            match run_task_with_boundaries(state, node, scope, cancel.clone()).await? {
                TaskOutcome::Diverted(boundary_id) => return Ok(TaskOutcome::Diverted(boundary_id)),
                TaskOutcome::Completed => {}
            }
            results.push(scope.remove(&element_key).unwrap_or(Value::Null));
        }
        scope.insert(collection_out_key, Value::List(results));
        return Ok(TaskOutcome::Completed);
    }

    let mut handles = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let mut branch_scope = scope.clone();
        branch_scope.insert(item_var.clone(), item);
        branch_scope.insert("loopCounter".to_string(), Value::Number(i as f64));
        let state = state.clone();
        let node = node.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let outcome = run_task_with_boundaries(&state, &node, &mut branch_scope, cancel).await;
            (outcome, branch_scope)
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok((Ok(TaskOutcome::Completed), branch_scope)) => {
                results.push(branch_scope.get(&element_key).cloned().unwrap_or(Value::Null));
            }
            Ok((Ok(TaskOutcome::Diverted(_)), _)) => {}
            Ok((Err(e), _)) => return Err(e),
            Err(_join_err) => {}
        }
    }
    scope.insert(collection_out_key, Value::List(results));
    Ok(TaskOutcome::Completed)
}

/// Re-runs the activity while `loopCondition` evaluates truthy, capped by
/// `loopMaximum` (default 100) to bound a misauthored infinite loop.
pub async fn run_loop(
    state: &Arc<InstanceState>,
    node: &Node,
    scope: &mut VariableScope,
    cancel: &CancellationToken,
) -> Result<TaskOutcome, ExecutionError> {
    let condition = node.prop_str("loopCondition").unwrap_or("false").to_string();
    let max = node.prop_u64("loopMaximum").unwrap_or(100);

    let mut count = 0u64;
    while count < max && evaluate_condition(&condition, scope) {
        scope.insert("loopCounter".to_string(), Value::Number(count as f64));
        match run_task_with_boundaries(state, node, scope, cancel.clone()).await? {
            TaskOutcome::Diverted(boundary_id) => return Ok(TaskOutcome::Diverted(boundary_id)),
            TaskOutcome::Completed => {}
        }
        count += 1;
    }
    Ok(TaskOutcome::Completed)
}
