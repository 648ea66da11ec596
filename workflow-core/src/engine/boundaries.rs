//! Runs one activity node's executor, racing any attached boundary events.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ExecutionError;
use crate::events::{task_cancelled, task_error};
use crate::executors::{boundary_error_keys, parse_timer, ExecutionContext, SubgraphRunner};
use crate::graph::{Node, NodeKind};
use crate::types::{Value, VariableScope};

use super::{traverse_path, InstanceState};

const MAX_BOUNDARY_TIMER_DELAY: Duration = Duration::from_secs(60);

pub enum TaskOutcome {
    /// Task completed normally; continue via the node's own outgoing flows.
    Completed,
    /// An attached boundary event fired; continue via that event's id.
    Diverted(String),
}

pub async fn run_task_with_boundaries(
    state: &Arc<InstanceState>,
    node: &Node,
    scope: &mut VariableScope,
    cancel: CancellationToken,
) -> Result<TaskOutcome, ExecutionError> {
    let Some(executor) = state.registry.get(node.kind).cloned() else {
        return Ok(TaskOutcome::Completed);
    };

    let boundaries = state.graph.boundaries_attached_to(&node.id);
    let error_boundaries: Vec<Node> = boundaries
        .iter()
        .filter(|b| b.kind == NodeKind::ErrorBoundaryEvent)
        .map(|n| (**n).clone())
        .collect();
    let timer_boundary = boundaries
        .iter()
        .find(|b| b.kind == NodeKind::TimerBoundaryEvent)
        .map(|n| (**n).clone());
    let compensation_boundary = boundaries
        .iter()
        .find(|b| b.kind == NodeKind::CompensationBoundaryEvent)
        .map(|n| (**n).clone());

    if let Some(comp) = &compensation_boundary {
        state
            .compensation_stack
            .lock()
            .unwrap()
            .push((comp.id.clone(), node.id.clone()));
    }

    // Snapshot for any non-interrupting boundary's concurrent branch, taken
    // before the executor starts mutating `scope`.
    let initial_scope = if timer_boundary.is_some() || !error_boundaries.is_empty() {
        Some(scope.clone())
    } else {
        None
    };

    let task_cancel = cancel.child_token();
    state.active_handles.insert(node.id.clone(), task_cancel.clone());

    let excluded = state.excluded_for(node);
    let mut ctx = ExecutionContext {
        instance_id: state.instance_id,
        node,
        variables: &mut *scope,
        cancel: task_cancel.clone(),
        hub: state.hub.clone(),
        bus: state.bus.clone(),
        adapters: state.adapters.clone(),
        config: state.config.clone(),
        subgraphs: state.clone() as Arc<dyn SubgraphRunner>,
        excluded_categories: excluded.clone(),
    };

    let run = executor.execute(&mut ctx);

    let branch = if let Some(timer) = &timer_boundary {
        let spec = timer.prop_str("timerDefinition").unwrap_or("PT0S");
        let delay = parse_timer(spec).unwrap_or(Duration::ZERO).min(MAX_BOUNDARY_TIMER_DELAY);
        if timer.prop_bool("cancelActivity", true) {
            tokio::select! {
                r = run => Branch::Task(r),
                _ = tokio::time::sleep(delay) => Branch::Timer,
            }
        } else {
            // Non-interrupting: the timer fires its own branch alongside the
            // task instead of cancelling it; the task keeps running to its
            // own conclusion.
            tokio::pin!(run);
            let mut fired = false;
            loop {
                tokio::select! {
                    r = &mut run => break Branch::Task(r),
                    _ = tokio::time::sleep(delay), if !fired => {
                        fired = true;
                        spawn_boundary_branch(
                            state,
                            &timer.id,
                            initial_scope.clone().expect("timer boundary implies a snapshot"),
                            cancel.clone(),
                        );
                    }
                }
            }
        }
    } else {
        Branch::Task(run.await)
    };

    state.active_handles.remove(&node.id);

    match branch {
        Branch::Task(Ok(())) => Ok(TaskOutcome::Completed),
        Branch::Task(Err(e)) => {
            if e.is_cancellation() {
                state.hub.broadcast(task_cancelled(&node.id, &e.to_string()), &excluded).await;
                return Err(e);
            }
            let (message, kind, retryable) = e.as_task_error();
            match best_error_boundary(&error_boundaries, &kind, &message) {
                Some(boundary) => {
                    let (type_key, message_key) = boundary_error_keys(&boundary.id);
                    scope.insert(type_key, Value::String(kind.clone()));
                    scope.insert(message_key, Value::String(message.clone()));
                    state
                        .hub
                        .broadcast(task_error(&node.id, &message, &kind, false), &excluded)
                        .await;
                    if boundary.prop_bool("cancelActivity", true) {
                        task_cancel.cancel();
                        Ok(TaskOutcome::Diverted(boundary.id.clone()))
                    } else {
                        // Non-interrupting: the catch handler runs alongside
                        // the node's own outgoing flow, not instead of it.
                        spawn_boundary_branch(
                            state,
                            &boundary.id,
                            initial_scope.clone().expect("error boundary implies a snapshot"),
                            cancel.clone(),
                        );
                        Ok(TaskOutcome::Completed)
                    }
                }
                None => {
                    state
                        .hub
                        .broadcast(task_error(&node.id, &message, &kind, retryable), &excluded)
                        .await;
                    Err(e)
                }
            }
        }
        Branch::Timer => {
            task_cancel.cancel();
            let boundary = timer_boundary.expect("timer branch only reachable with a timer boundary");
            Ok(TaskOutcome::Diverted(boundary.id))
        }
    }
}

/// Picks the best-matching declared error boundary: one whose `errorCode`
/// equals the failure's kind or appears as a substring of its message, with
/// a catch-all boundary (empty/missing `errorCode`) as the fallback.
fn best_error_boundary<'a>(boundaries: &'a [Node], kind: &str, message: &str) -> Option<&'a Node> {
    boundaries
        .iter()
        .find(|b| {
            let code = b.prop_str("errorCode").unwrap_or("").trim();
            !code.is_empty() && (code == kind || message.contains(code))
        })
        .or_else(|| boundaries.iter().find(|b| b.prop_str("errorCode").unwrap_or("").trim().is_empty()))
}

/// Fires a non-interrupting boundary's flow as a detached branch, sharing a
/// snapshot of the scope as of the moment the boundary matched.
fn spawn_boundary_branch(state: &Arc<InstanceState>, boundary_id: &str, scope: VariableScope, cancel: CancellationToken) {
    let state = state.clone();
    let boundary_id = boundary_id.to_string();
    tokio::spawn(async move {
        let _ = traverse_path(state, boundary_id.clone(), scope, cancel, format!("nonint:{boundary_id}")).await;
    });
}

enum Branch {
    Task(Result<(), ExecutionError>),
    Timer,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn boundary_with_code(id: &str, code: &str) -> Node {
        let mut properties = BTreeMap::new();
        if !code.is_empty() {
            properties.insert("errorCode".to_string(), serde_json::json!(code));
        }
        Node {
            id: id.to_string(),
            kind: NodeKind::ErrorBoundaryEvent,
            display_name: id.to_string(),
            attached_to_ref: Some("task".to_string()),
            properties,
        }
    }

    #[test]
    fn prefers_exact_code_match_over_catch_all() {
        let boundaries = vec![boundary_with_code("catchAll", ""), boundary_with_code("catchInsufficient", "InsufficientFunds")];
        let picked = best_error_boundary(&boundaries, "InsufficientFunds", "account overdrawn").unwrap();
        assert_eq!(picked.id, "catchInsufficient");
    }

    #[test]
    fn matches_code_as_message_substring() {
        let boundaries = vec![boundary_with_code("catchTimeout", "Timeout")];
        let picked = best_error_boundary(&boundaries, "Other", "request hit a Timeout waiting for upstream").unwrap();
        assert_eq!(picked.id, "catchTimeout");
    }

    #[test]
    fn falls_back_to_catch_all_when_nothing_matches() {
        let boundaries = vec![boundary_with_code("catchSpecific", "SomethingElse"), boundary_with_code("catchAll", "")];
        let picked = best_error_boundary(&boundaries, "InsufficientFunds", "account overdrawn").unwrap();
        assert_eq!(picked.id, "catchAll");
    }

    #[test]
    fn no_match_when_only_specific_boundaries_present() {
        let boundaries = vec![boundary_with_code("catchSpecific", "SomethingElse")];
        assert!(best_error_boundary(&boundaries, "InsufficientFunds", "account overdrawn").is_none());
    }
}
