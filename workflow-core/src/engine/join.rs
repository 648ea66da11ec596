//! Join coordination for gateways with more than one incoming flow.

use std::collections::HashSet;
use std::sync::Arc;

use crate::events::task_cancelled;
use crate::graph::{Graph, Node, NodeKind};

use super::InstanceState;

pub enum JoinOutcome {
    /// Not the last arrival at a parallel join, or beaten to an inclusive
    /// join — this path's scope is subsumed by the one that proceeds.
    Stop,
    /// Safe to evaluate this gateway's outgoing flows.
    Proceed,
}

/// Coordinates arrivals at a join-like gateway (fan-in > 1). Parallel
/// gateways wait for every branch from the matching fork (§4.6); inclusive
/// gateways let the first arrival through and sweep-cancel the rest.
pub async fn handle_join(state: &Arc<InstanceState>, node: &Node, path_id: &str) -> JoinOutcome {
    match node.kind {
        NodeKind::ParallelGateway => {
            let expected = state
                .graph
                .matching_fork(&node.id)
                .map(|fork| state.graph.outgoing(&fork.id).len())
                .unwrap_or(1);

            let mut arrived = state.join_arrivals.entry(node.id.clone()).or_insert_with(HashSet::new);
            arrived.insert(path_id.to_string());
            let done = arrived.len() >= expected;
            drop(arrived);

            if done {
                state.join_arrivals.remove(&node.id);
                JoinOutcome::Proceed
            } else {
                JoinOutcome::Stop
            }
        }
        NodeKind::InclusiveGateway => {
            let is_first = state.inclusive_winner.insert(node.id.clone(), ()).is_none();
            if is_first {
                sweep_competing_paths(state, &node.id).await;
                JoinOutcome::Proceed
            } else {
                JoinOutcome::Stop
            }
        }
        _ => JoinOutcome::Proceed,
    }
}

/// Cancels tasks still in flight on sibling branches between the inclusive
/// join's matching fork and the join itself, broadcasting `task.cancelled`
/// before signalling each token so observers never see a stray completion
/// after the cancellation notice (§5). Tasks outside that fork/join region —
/// unrelated parallel branches, other gateways, other instances' activity —
/// are left running.
async fn sweep_competing_paths(state: &Arc<InstanceState>, winning_join: &str) {
    let scope = sibling_scope(&state.graph, winning_join);
    if scope.is_empty() {
        return;
    }

    let active: Vec<(String, tokio_util::sync::CancellationToken)> = state
        .active_handles
        .iter()
        .filter(|e| scope.contains(e.key()))
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect();

    for (node_id, token) in active {
        if token.is_cancelled() {
            continue;
        }
        state
            .hub
            .broadcast(
                task_cancelled(&node_id, &format!("superseded by inclusive join {winning_join}")),
                &HashSet::new(),
            )
            .await;
        token.cancel();
    }
}

/// The set of node ids reachable forward from `join_id`'s matching fork,
/// without crossing the join — i.e. every node on any branch between the
/// fork and the join, winning or losing.
fn sibling_scope(graph: &Graph, join_id: &str) -> HashSet<String> {
    let mut scope = HashSet::new();
    let Some(fork) = graph.matching_fork(join_id) else {
        return scope;
    };

    let mut visited = HashSet::new();
    visited.insert(fork.id.clone());
    let mut stack = vec![fork.id.clone()];
    while let Some(id) = stack.pop() {
        if id == join_id {
            continue;
        }
        for flow in graph.outgoing(&id) {
            if visited.insert(flow.to.clone()) {
                scope.insert(flow.to.clone());
                stack.push(flow.to.clone());
            }
        }
    }
    scope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use std::collections::BTreeMap;

    fn node(id: &str, kind: NodeKind) -> Node {
        Node {
            id: id.to_string(),
            kind,
            display_name: id.to_string(),
            attached_to_ref: None,
            properties: BTreeMap::new(),
        }
    }

    fn flow(from: &str, to: &str) -> crate::graph::Flow {
        crate::graph::Flow {
            id: format!("{from}-{to}"),
            from: from.to_string(),
            to: to.to_string(),
            name: None,
            condition: None,
        }
    }

    #[test]
    fn sibling_scope_covers_both_branches_but_not_beyond_the_join() {
        let nodes = vec![
            node("start", NodeKind::StartEvent),
            node("split", NodeKind::InclusiveGateway),
            node("fast", NodeKind::Task),
            node("slow", NodeKind::Task),
            node("join", NodeKind::InclusiveGateway),
            node("after", NodeKind::Task),
            node("end", NodeKind::EndEvent),
        ];
        let flows = vec![
            flow("start", "split"),
            flow("split", "fast"),
            flow("split", "slow"),
            flow("fast", "join"),
            flow("slow", "join"),
            flow("join", "after"),
            flow("after", "end"),
        ];
        let graph = Graph::new("p".into(), "p".into(), nodes, flows, BTreeMap::new(), BTreeMap::new()).unwrap();

        let scope = sibling_scope(&graph, "join");
        assert!(scope.contains("fast"));
        assert!(scope.contains("slow"));
        assert!(!scope.contains("split"));
        assert!(!scope.contains("after"));
        assert!(!scope.contains("end"));
    }

    #[test]
    fn sibling_scope_empty_when_no_matching_fork() {
        let nodes = vec![node("start", NodeKind::StartEvent), node("join", NodeKind::InclusiveGateway)];
        let graph = Graph::new("p".into(), "p".into(), nodes, vec![], BTreeMap::new(), BTreeMap::new()).unwrap();
        assert!(sibling_scope(&graph, "join").is_empty());
    }
}
