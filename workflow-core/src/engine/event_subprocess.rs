//! Event sub-processes: nested start events (timer/message/signal/escalation)
//! that race the main flow, plus reactive error-sub-process consultation on
//! an otherwise-unhandled task failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::ExecutionError;
use crate::events::{element_activated, element_completed};
use crate::executors::parse_timer;
use crate::graph::{Node, NodeKind};
use crate::types::VariableScope;

use super::{traverse_path, InstanceState};

const MAX_EVENT_TIMER_DELAY: Duration = Duration::from_secs(60);
const MESSAGE_FLAG_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Spawns one background task per declared timer/message/signal/escalation
/// start. `errorStartEvent` is not polled here — it is consulted reactively
/// from `try_handle_error_subprocess` when a task fails unhandled.
pub fn spawn_event_subprocess_monitors(state: Arc<InstanceState>) -> Vec<JoinHandle<()>> {
    state
        .graph
        .event_subprocess_starts()
        .into_iter()
        .filter(|n| n.kind != NodeKind::ErrorStartEvent)
        .cloned()
        .map(|node| {
            let state = state.clone();
            tokio::spawn(async move {
                match node.kind {
                    NodeKind::TimerStartEvent => {
                        let spec = node.prop_str("timerDefinition").unwrap_or("PT0S");
                        let delay = parse_timer(spec).unwrap_or(Duration::ZERO).min(MAX_EVENT_TIMER_DELAY);
                        tokio::time::sleep(delay).await;
                    }
                    NodeKind::MessageStartEvent | NodeKind::SignalStartEvent | NodeKind::EscalationStartEvent => {
                        let message_ref = node.prop_str("messageRef").unwrap_or(&node.id).to_string();
                        let flag = format!("message_{message_ref}_received");
                        if !poll_for_flag(&state, &flag).await {
                            return;
                        }
                    }
                    _ => return,
                }
                trigger(&state, &node).await;
            })
        })
        .collect()
}

/// Polls `state.shared_vars` for a convention-named flag variable until it
/// reads truthy, or the instance is cancelled. Returns `false` on
/// cancellation.
async fn poll_for_flag(state: &Arc<InstanceState>, flag: &str) -> bool {
    loop {
        if state.root_cancel.is_cancelled() {
            return false;
        }
        if let Some(v) = state.shared_vars.get(flag) {
            if v.is_truthy_fallback() {
                return true;
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(MESSAGE_FLAG_POLL_INTERVAL) => {}
            _ = state.root_cancel.cancelled() => return false,
        }
    }
}

/// Consults declared `errorStartEvent`s for one whose `errorCode` matches
/// (by kind equality or substring on the message) or is unset (catch-all),
/// preferring a specific match over a catch-all. Returns the triggered
/// node's id on a match.
pub async fn try_handle_error_subprocess(state: &Arc<InstanceState>, error: &ExecutionError) -> Option<String> {
    let (message, kind, _) = error.as_task_error();
    let starts: Vec<Node> = state
        .graph
        .event_subprocess_starts()
        .into_iter()
        .filter(|n| n.kind == NodeKind::ErrorStartEvent)
        .cloned()
        .collect();

    let candidate = starts
        .iter()
        .find(|n| matches_error_code(n, &kind, &message))
        .or_else(|| starts.iter().find(|n| is_catch_all(n)))
        .cloned()?;

    trigger(state, &candidate).await;
    Some(candidate.id.clone())
}

fn is_catch_all(node: &Node) -> bool {
    node.prop_str("errorCode").unwrap_or("").trim().is_empty()
}

fn matches_error_code(node: &Node, kind: &str, message: &str) -> bool {
    match node.prop_str("errorCode").map(str::trim) {
        None => false,
        Some(code) if code.is_empty() => false,
        Some(code) => code == kind || message.contains(code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn start_with_code(code: &str) -> Node {
        let mut properties = BTreeMap::new();
        if !code.is_empty() {
            properties.insert("errorCode".to_string(), serde_json::json!(code));
        }
        Node {
            id: "errStart".to_string(),
            kind: NodeKind::ErrorStartEvent,
            display_name: "errStart".to_string(),
            attached_to_ref: None,
            properties,
        }
    }

    #[test]
    fn empty_error_code_is_catch_all_not_a_match() {
        let node = start_with_code("");
        assert!(is_catch_all(&node));
        assert!(!matches_error_code(&node, "AnyKind", "any message"));
    }

    #[test]
    fn specific_error_code_matches_kind_or_message_substring() {
        let node = start_with_code("InsufficientFunds");
        assert!(!is_catch_all(&node));
        assert!(matches_error_code(&node, "InsufficientFunds", "whatever"));
        assert!(matches_error_code(&node, "Other", "account has InsufficientFunds remaining"));
        assert!(!matches_error_code(&node, "Other", "unrelated failure"));
    }
}

async fn trigger(state: &Arc<InstanceState>, node: &Node) {
    let interrupting = node.prop_bool("isInterrupting", true);
    let excluded = state.excluded_for(node);

    state
        .hub
        .broadcast(element_activated(&node.id, "eventSubProcessStart", &node.display_name), &excluded)
        .await;
    state.hub.broadcast(element_completed(&node.id, 0), &excluded).await;

    let snapshot: Vec<_> = if interrupting {
        state.active_handles.iter().map(|e| e.value().clone()).collect()
    } else {
        Vec::new()
    };

    let scope: VariableScope = state
        .shared_vars
        .iter()
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect();
    let _ = traverse_path(state.clone(), node.id.clone(), scope, state.root_cancel.clone(), format!("evtsub:{}", node.id))
        .await;

    if interrupting {
        for token in snapshot {
            token.cancel();
        }
    }
}
