//! Graph Model (C1) — an immutable, in-memory representation of one
//! workflow process: its nodes, its flows, and any nested subprocess
//! definitions. Pure query surface; no mutation after construction.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;

use crate::error::GraphParseError;

/// The closed set of node kinds the engine knows how to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    // Events
    StartEvent,
    EndEvent,
    IntermediateEvent,
    TimerIntermediateCatchEvent,
    ErrorBoundaryEvent,
    TimerBoundaryEvent,
    CompensationBoundaryEvent,
    CompensationIntermediateThrowEvent,
    ErrorStartEvent,
    TimerStartEvent,
    MessageStartEvent,
    SignalStartEvent,
    EscalationStartEvent,
    CompensationStartEvent,

    // Activities
    Task,
    UserTask,
    ServiceTask,
    ScriptTask,
    SendTask,
    ReceiveTask,
    ManualTask,
    BusinessRuleTask,
    AgenticTask,
    SubProcess,
    EventSubProcess,
    CallActivity,

    // Gateways
    ExclusiveGateway,
    ParallelGateway,
    InclusiveGateway,
}

impl NodeKind {
    pub fn is_gateway(self) -> bool {
        matches!(
            self,
            NodeKind::ExclusiveGateway | NodeKind::ParallelGateway | NodeKind::InclusiveGateway
        )
    }

    pub fn is_boundary(self) -> bool {
        matches!(
            self,
            NodeKind::ErrorBoundaryEvent
                | NodeKind::TimerBoundaryEvent
                | NodeKind::CompensationBoundaryEvent
        )
    }

    pub fn is_event_subprocess_start(self) -> bool {
        matches!(
            self,
            NodeKind::ErrorStartEvent
                | NodeKind::TimerStartEvent
                | NodeKind::MessageStartEvent
                | NodeKind::SignalStartEvent
                | NodeKind::EscalationStartEvent
                | NodeKind::CompensationStartEvent
        )
    }

    pub fn is_end(self) -> bool {
        matches!(self, NodeKind::EndEvent)
    }
}

/// One graph vertex: an event, a task, a gateway, or a subprocess container.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub display_name: String,
    /// For boundary events: the task id this event is attached to.
    #[serde(default)]
    pub attached_to_ref: Option<String>,
    /// Free-form map scoped to the kind (authoring-time properties).
    #[serde(default)]
    pub properties: BTreeMap<String, Json>,
}

impl Node {
    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    pub fn prop_bool(&self, key: &str, default: bool) -> bool {
        self.properties
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    pub fn prop_u64(&self, key: &str) -> Option<u64> {
        self.properties.get(key).and_then(|v| v.as_u64())
    }

    pub fn prop_f64(&self, key: &str, default: f64) -> f64 {
        self.properties
            .get(key)
            .and_then(|v| v.as_f64())
            .unwrap_or(default)
    }
}

/// A directed edge between two nodes, optionally guarded by a condition
/// expression in gateway-evaluator syntax (`${var}` substitution + a
/// sandboxed comparison).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

/// An immutable deserialized description of one process, plus any named
/// reusable subgraphs it references via `callActivity` nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Graph {
    pub process_id: String,
    pub process_name: String,
    nodes: BTreeMap<String, Node>,
    flows: Vec<Flow>,
    pub subprocess_definitions: BTreeMap<String, Graph>,
    /// Inline child graphs for `subProcess` / `eventSubProcess` nodes,
    /// keyed by the containing node's id.
    pub inline_subgraphs: BTreeMap<String, Graph>,

    #[serde(skip)]
    adjacency: Option<Adjacency>,
}

#[derive(Clone, Debug)]
struct Adjacency {
    pg: DiGraph<String, String>,
    index_of: BTreeMap<String, NodeIndex>,
}

impl Graph {
    pub fn new(
        process_id: String,
        process_name: String,
        nodes: Vec<Node>,
        flows: Vec<Flow>,
        subprocess_definitions: BTreeMap<String, Graph>,
        inline_subgraphs: BTreeMap<String, Graph>,
    ) -> Result<Self, GraphParseError> {
        let mut node_map = BTreeMap::new();
        for n in nodes {
            if node_map.insert(n.id.clone(), n).is_some() {
                return Err(GraphParseError::DuplicateNode(
                    node_map.keys().last().cloned().unwrap_or_default(),
                ));
            }
        }
        for f in &flows {
            if !node_map.contains_key(&f.from) {
                return Err(GraphParseError::DanglingFlow(f.id.clone(), f.from.clone()));
            }
            if !node_map.contains_key(&f.to) {
                return Err(GraphParseError::DanglingFlow(f.id.clone(), f.to.clone()));
            }
        }
        if !node_map
            .values()
            .any(|n| n.kind == NodeKind::StartEvent)
        {
            return Err(GraphParseError::NoStartEvent(process_id));
        }

        let mut pg = DiGraph::new();
        let mut index_of = BTreeMap::new();
        for id in node_map.keys() {
            index_of.insert(id.clone(), pg.add_node(id.clone()));
        }
        for f in &flows {
            pg.add_edge(index_of[&f.from], index_of[&f.to], f.id.clone());
        }

        Ok(Self {
            process_id,
            process_name,
            nodes: node_map,
            flows,
            subprocess_definitions,
            inline_subgraphs,
            adjacency: Some(Adjacency { pg, index_of }),
        })
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn get_start_event(&self) -> Option<&Node> {
        self.nodes.values().find(|n| n.kind == NodeKind::StartEvent)
    }

    /// Start events of nested event sub-processes (siblings of the main start).
    pub fn event_subprocess_starts(&self) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| n.kind.is_event_subprocess_start())
            .collect()
    }

    pub fn outgoing(&self, node_id: &str) -> Vec<&Flow> {
        self.flows.iter().filter(|f| f.from == node_id).collect()
    }

    pub fn incoming(&self, node_id: &str) -> Vec<&Flow> {
        self.flows.iter().filter(|f| f.to == node_id).collect()
    }

    pub fn boundaries_attached_to(&self, node_id: &str) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| n.attached_to_ref.as_deref() == Some(node_id))
            .collect()
    }

    pub fn subprocess(&self, name: &str) -> Option<&Graph> {
        self.subprocess_definitions.get(name)
    }

    pub fn inline_subgraph(&self, node_id: &str) -> Option<&Graph> {
        self.inline_subgraphs.get(node_id)
    }

    /// Walk upstream from `join_node_id` to find the matching fork: the
    /// nearest parallel gateway with more than one outgoing flow whose
    /// forward reachable set includes this join on every branch. When more
    /// than one candidate exists, prefer the largest fan-out / shallowest
    /// depth, per spec §4.6.
    pub fn matching_fork(&self, join_node_id: &str) -> Option<&Node> {
        let adj = self.adjacency.as_ref()?;
        let join_idx = *adj.index_of.get(join_node_id)?;

        // BFS upstream, tracking depth, collecting parallel/inclusive gateway
        // candidates with >1 outgoing flow.
        let mut best: Option<(usize, usize, &Node)> = None;
        let mut visited = std::collections::HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back((join_idx, 0usize));
        visited.insert(join_idx);

        while let Some((idx, depth)) = queue.pop_front() {
            for pred in adj.pg.neighbors_directed(idx, Direction::Incoming) {
                if visited.insert(pred) {
                    let id = &adj.pg[pred];
                    if let Some(node) = self.nodes.get(id) {
                        if node.kind.is_gateway() && self.outgoing(&node.id).len() > 1 {
                            let fan_out = self.outgoing(&node.id).len();
                            match &best {
                                None => best = Some((fan_out, depth, node)),
                                Some((best_fan, best_depth, _)) => {
                                    if fan_out > *best_fan || (fan_out == *best_fan && depth < *best_depth) {
                                        best = Some((fan_out, depth, node));
                                    }
                                }
                            }
                        }
                    }
                    queue.push_back((pred, depth + 1));
                }
            }
        }
        best.map(|(_, _, n)| n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, kind: NodeKind) -> Node {
        Node {
            id: id.to_string(),
            kind,
            display_name: id.to_string(),
            attached_to_ref: None,
            properties: BTreeMap::new(),
        }
    }

    fn flow(from: &str, to: &str) -> Flow {
        Flow {
            id: format!("{from}-{to}"),
            from: from.to_string(),
            to: to.to_string(),
            name: None,
            condition: None,
        }
    }

    #[test]
    fn rejects_graph_without_start() {
        let nodes = vec![node("end", NodeKind::EndEvent)];
        let err = Graph::new(
            "p".into(),
            "p".into(),
            nodes,
            vec![],
            BTreeMap::new(),
            BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, GraphParseError::NoStartEvent(_)));
    }

    #[test]
    fn adjacency_queries() {
        let nodes = vec![
            node("start", NodeKind::StartEvent),
            node("t", NodeKind::Task),
            node("end", NodeKind::EndEvent),
        ];
        let flows = vec![flow("start", "t"), flow("t", "end")];
        let g = Graph::new(
            "p".into(),
            "p".into(),
            nodes,
            flows,
            BTreeMap::new(),
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(g.outgoing("start").len(), 1);
        assert_eq!(g.incoming("end").len(), 1);
        assert_eq!(g.get_start_event().unwrap().id, "start");
    }

    #[test]
    fn matching_fork_prefers_shallower_candidate_on_equal_fan_out() {
        // Two equal-fan-out gateways both reach "join": forkShallow two hops
        // away, forkDeep four hops away. The nearer one must win.
        let nodes = vec![
            node("start", NodeKind::StartEvent),
            node("forkDeep", NodeKind::ParallelGateway),
            node("mid", NodeKind::Task),
            node("s", NodeKind::Task),
            node("s2", NodeKind::Task),
            node("forkShallow", NodeKind::ParallelGateway),
            node("x", NodeKind::Task),
            node("q", NodeKind::Task),
            node("r", NodeKind::Task),
            node("join", NodeKind::ParallelGateway),
            node("end", NodeKind::EndEvent),
        ];
        let flows = vec![
            flow("start", "forkDeep"),
            flow("forkDeep", "mid"),
            flow("forkDeep", "s"),
            flow("mid", "forkShallow"),
            flow("forkShallow", "x"),
            flow("forkShallow", "q"),
            flow("s", "s2"),
            flow("s2", "r"),
            flow("x", "join"),
            flow("q", "join"),
            flow("r", "join"),
            flow("join", "end"),
        ];
        let g = Graph::new("p".into(), "p".into(), nodes, flows, BTreeMap::new(), BTreeMap::new()).unwrap();
        assert_eq!(g.matching_fork("join").unwrap().id, "forkShallow");
    }
}
