//! Execution Engine (C6): depth-first traversal from the start event,
//! gateway merge semantics, boundary-event races, event sub-processes,
//! compensation, and multi-instance/loop activities.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapters::Adapters;
use crate::config::EngineConfig;
use crate::correlation::MessageBus;
use crate::error::ExecutionError;
use crate::events::broadcast::ObserverHub;
use crate::events::{
    element_activated, element_completed, gateway_evaluating, gateway_path_taken, workflow_completed,
    workflow_started,
};
use crate::executors::{excluded_categories, ExecutorRegistry, SubgraphRunner};
use crate::gateway::evaluate_gateway;
use crate::graph::{Flow, Graph, Node, NodeKind};
use crate::instance::{Instance, InstanceOutcome};
use crate::types::{now_ms, Timestamp, Value, VariableScope, INSTANCE_ID_VAR};

mod boundaries;
mod event_subprocess;
mod join;
mod multi_instance;

/// Per-instance shared state threaded through every traversal task. All
/// fields are cheap to clone behind `Arc`/concurrent maps so branches
/// spawned for a fan-out see the same bookkeeping.
pub struct InstanceState {
    pub instance_id: Uuid,
    pub graph: Arc<Graph>,
    pub hub: Arc<ObserverHub>,
    pub bus: Arc<MessageBus>,
    pub adapters: Arc<Adapters>,
    pub config: Arc<EngineConfig>,
    pub registry: Arc<ExecutorRegistry>,
    pub join_arrivals: DashMap<String, HashSet<String>>,
    pub inclusive_winner: DashMap<String, ()>,
    pub active_handles: DashMap<String, CancellationToken>,
    pub compensation_stack: StdMutex<Vec<(String, String)>>,
    pub root_cancel: CancellationToken,
    /// Mirror of the live traversal scope, refreshed on every `traverse_path`
    /// step, so event-subprocess monitors can read `${var}` state without
    /// owning a path's scope themselves.
    pub shared_vars: DashMap<String, Value>,
}

impl InstanceState {
    fn excluded_for(&self, node: &Node) -> HashSet<crate::events::EventCategory> {
        excluded_categories(node)
    }
}

#[async_trait]
impl SubgraphRunner for InstanceState {
    async fn run_subgraph(
        &self,
        subgraph_name: &str,
        scope: VariableScope,
        cancel: CancellationToken,
    ) -> Result<VariableScope, ExecutionError> {
        let sub = self
            .graph
            .subprocess(subgraph_name)
            .ok_or_else(|| ExecutionError::Other(format!("unknown subprocess: {subgraph_name}")))?;
        let child_graph = Arc::new(sub.clone());
        let start = child_graph
            .get_start_event()
            .ok_or_else(|| ExecutionError::Other(format!("{subgraph_name} has no start event")))?
            .id
            .clone();

        let child_state = Arc::new(InstanceState {
            instance_id: self.instance_id,
            graph: child_graph,
            hub: self.hub.clone(),
            bus: self.bus.clone(),
            adapters: self.adapters.clone(),
            config: self.config.clone(),
            registry: self.registry.clone(),
            join_arrivals: DashMap::new(),
            inclusive_winner: DashMap::new(),
            active_handles: DashMap::new(),
            compensation_stack: StdMutex::new(Vec::new()),
            root_cancel: cancel.clone(),
            shared_vars: DashMap::new(),
        });

        let result = traverse_path(child_state, start, scope, cancel, "0".to_string()).await?;
        result.ok_or_else(|| ExecutionError::Other(format!("{subgraph_name} produced no result")))
    }
}

struct InstanceHandle {
    cancel: CancellationToken,
    workflow_name: String,
    start_time: Timestamp,
    status: StdMutex<String>,
    context_keys: StdMutex<Vec<String>>,
}

/// Process-wide facade: one per server, owns the message bus, the observer
/// hub, the adapter bundle, and the table of live instances.
#[derive(Clone)]
pub struct Engine {
    bus: Arc<MessageBus>,
    hub: Arc<ObserverHub>,
    adapters: Arc<Adapters>,
    config: Arc<EngineConfig>,
    registry: Arc<ExecutorRegistry>,
    instances: Arc<DashMap<Uuid, InstanceHandle>>,
}

impl Engine {
    pub fn new(
        bus: Arc<MessageBus>,
        hub: Arc<ObserverHub>,
        adapters: Arc<Adapters>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            bus,
            hub,
            adapters,
            config,
            registry: Arc::new(ExecutorRegistry::standard()),
            instances: Arc::new(DashMap::new()),
        }
    }

    /// Starts a new instance in the background and returns its id
    /// immediately, matching `POST /workflows/execute`'s contract.
    pub fn start_instance(&self, graph: Arc<Graph>, mut context: VariableScope) -> Uuid {
        let instance_id = Uuid::now_v7();
        context.insert(INSTANCE_ID_VAR.to_string(), Value::String(instance_id.to_string()));

        let handle = InstanceHandle {
            cancel: CancellationToken::new(),
            workflow_name: graph.process_name.clone(),
            start_time: now_ms(),
            status: StdMutex::new("running".to_string()),
            context_keys: StdMutex::new(context.keys().cloned().collect()),
        };
        let cancel = handle.cancel.clone();
        self.instances.insert(instance_id, handle);

        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive_instance(instance_id, graph, context, cancel).await;
        });
        instance_id
    }

    /// Looks up a live instance's status snapshot.
    pub fn status(&self, instance_id: Uuid) -> Option<Instance> {
        self.instances.get(&instance_id).map(|h| Instance {
            instance_id,
            workflow_name: h.workflow_name.clone(),
            status: h.status.lock().unwrap().clone(),
            start_time: h.start_time,
            context_keys: h.context_keys.lock().unwrap().clone(),
        })
    }

    pub fn active_instances(&self) -> Vec<Instance> {
        self.instances
            .iter()
            .map(|entry| Instance {
                instance_id: *entry.key(),
                workflow_name: entry.value().workflow_name.clone(),
                status: entry.value().status.lock().unwrap().clone(),
                start_time: entry.value().start_time,
                context_keys: entry.value().context_keys.lock().unwrap().clone(),
            })
            .collect()
    }

    /// Forces cancellation of a running instance.
    pub fn cancel_instance(&self, instance_id: Uuid) -> bool {
        match self.instances.get(&instance_id) {
            Some(h) => {
                h.cancel.cancel();
                true
            }
            None => false,
        }
    }

    async fn drive_instance(
        &self,
        instance_id: Uuid,
        graph: Arc<Graph>,
        scope: VariableScope,
        cancel: CancellationToken,
    ) {
        let start = now_ms();
        self.hub
            .broadcast(workflow_started(instance_id, &graph.process_name), &HashSet::new())
            .await;

        let state = Arc::new(InstanceState {
            instance_id,
            graph: graph.clone(),
            hub: self.hub.clone(),
            bus: self.bus.clone(),
            adapters: self.adapters.clone(),
            config: self.config.clone(),
            registry: self.registry.clone(),
            join_arrivals: DashMap::new(),
            inclusive_winner: DashMap::new(),
            active_handles: DashMap::new(),
            compensation_stack: StdMutex::new(Vec::new()),
            root_cancel: cancel.clone(),
            shared_vars: DashMap::new(),
        });

        let monitors = event_subprocess::spawn_event_subprocess_monitors(state.clone());

        let start_node = match graph.get_start_event() {
            Some(n) => n.id.clone(),
            None => {
                self.finish(instance_id, start, InstanceOutcome::Failed("no start event".into()))
                    .await;
                for m in monitors {
                    m.abort();
                }
                return;
            }
        };

        let outcome = match traverse_path(state.clone(), start_node, scope, cancel, "0".to_string()).await {
            Ok(_) => InstanceOutcome::Success,
            Err(e) if e.is_cancellation() => InstanceOutcome::Cancelled,
            Err(ExecutionError::EventSubProcessHandled(_)) => InstanceOutcome::Success,
            Err(e) => InstanceOutcome::Failed(e.to_string()),
        };

        for m in monitors {
            m.abort();
        }
        self.finish(instance_id, start, outcome).await;
    }

    async fn finish(&self, instance_id: Uuid, start: Timestamp, outcome: InstanceOutcome) {
        if let Some(h) = self.instances.get(&instance_id) {
            *h.status.lock().unwrap() = outcome.as_str().to_string();
        }
        self.hub
            .broadcast(
                workflow_completed(instance_id, outcome.as_str(), now_ms() - start),
                &HashSet::new(),
            )
            .await;
    }
}

/// Follows the graph from `node_id` to completion, handling sequential
/// flow, fan-out, and gateway evaluation.
///
/// Returns `Some(scope)` with the scope the winning path ended with, or
/// `None` when this call was one of several branches converging on a join
/// and lost — its result is subsumed by whichever branch proceeded past
/// the join (§5 single-writer-per-path discipline).
pub(crate) fn traverse_path(
    state: Arc<InstanceState>,
    node_id: String,
    mut scope: VariableScope,
    cancel: CancellationToken,
    path_id: String,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<VariableScope>, ExecutionError>> + Send>> {
    Box::pin(async move {
        let mut current = node_id;
        loop {
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled(current));
            }

            for (k, v) in scope.iter() {
                state.shared_vars.insert(k.clone(), v.clone());
            }

            let node = state
                .graph
                .node(&current)
                .cloned()
                .ok_or_else(|| ExecutionError::Other(format!("unknown node {current}")))?;
            let excluded = state.excluded_for(&node);

            state
                .hub
                .broadcast(element_activated(&node.id, kind_label(node.kind), &node.display_name), &excluded)
                .await;

            if node.kind.is_end() {
                state.hub.broadcast(element_completed(&node.id, 0), &excluded).await;
                return Ok(Some(scope));
            }

            let next_ids: Vec<String> = if node.kind.is_gateway() {
                if state.graph.incoming(&node.id).len() > 1 {
                    match join::handle_join(&state, &node, &path_id).await {
                        join::JoinOutcome::Stop => return Ok(None),
                        join::JoinOutcome::Proceed => {}
                    }
                }
                state.hub.broadcast(gateway_evaluating(&node.id), &excluded).await;
                let outgoing: Vec<&Flow> = state.graph.outgoing(&node.id);
                let fired = evaluate_gateway(&node, &outgoing, &scope)?;
                for f in &fired {
                    state
                        .hub
                        .broadcast(
                            gateway_path_taken(&node.id, f.condition.as_deref().unwrap_or(""), &f.to),
                            &excluded,
                        )
                        .await;
                }
                state.hub.broadcast(element_completed(&node.id, 0), &excluded).await;
                fired.into_iter().map(|f| f.to.clone()).collect()
            } else if node.kind == NodeKind::CompensationIntermediateThrowEvent {
                run_compensation_sweep(&state, &mut scope, &cancel).await?;
                state.hub.broadcast(element_completed(&node.id, 0), &excluded).await;
                state.graph.outgoing(&node.id).into_iter().map(|f| f.to.clone()).collect()
            } else if node.kind.is_boundary() {
                // Reached only via a `Diverted` outcome below; the event
                // itself already fired, so just continue downstream.
                state.hub.broadcast(element_completed(&node.id, 0), &excluded).await;
                state.graph.outgoing(&node.id).into_iter().map(|f| f.to.clone()).collect()
            } else if node.kind == NodeKind::SubProcess && state.graph.inline_subgraph(&node.id).is_some() {
                scope = run_inline_subprocess(&state, &node, scope, &cancel).await?;
                state.hub.broadcast(element_completed(&node.id, 0), &excluded).await;
                state.graph.outgoing(&node.id).into_iter().map(|f| f.to.clone()).collect()
            } else {
                let start = now_ms();
                let result = if node.prop_bool("isMultiInstance", false) {
                    multi_instance::run_multi_instance(&state, &node, &mut scope, &cancel).await
                } else if node.prop_str("loopCondition").is_some() {
                    multi_instance::run_loop(&state, &node, &mut scope, &cancel).await
                } else {
                    boundaries::run_task_with_boundaries(&state, &node, &mut scope, cancel.clone()).await
                };

                let outcome = match result {
                    Ok(o) => o,
                    Err(e) => {
                        if e.is_cancellation() {
                            return Err(e);
                        }
                        if let Some(handled) = event_subprocess::try_handle_error_subprocess(&state, &e).await {
                            return Err(ExecutionError::EventSubProcessHandled(handled));
                        }
                        return Err(e);
                    }
                };

                match outcome {
                    boundaries::TaskOutcome::Completed => {
                        state
                            .hub
                            .broadcast(element_completed(&node.id, now_ms() - start), &excluded)
                            .await;
                        state.graph.outgoing(&node.id).into_iter().map(|f| f.to.clone()).collect()
                    }
                    boundaries::TaskOutcome::Diverted(boundary_id) => vec![boundary_id],
                }
            };

            match next_ids.len() {
                0 => return Ok(Some(scope)),
                1 => {
                    current = next_ids.into_iter().next().unwrap();
                }
                _ => {
                    let mut handles = Vec::with_capacity(next_ids.len());
                    for (i, next) in next_ids.into_iter().enumerate() {
                        let branch_state = state.clone();
                        let branch_scope = scope.clone();
                        let branch_cancel = cancel.clone();
                        let branch_path = format!("{path_id}/{i}");
                        handles.push(tokio::spawn(async move {
                            traverse_path(branch_state, next, branch_scope, branch_cancel, branch_path).await
                        }));
                    }
                    let results = join_all(handles).await;
                    let mut winner = None;
                    let mut hard_err = None;
                    for r in results {
                        match r {
                            Ok(Ok(Some(s))) => winner = Some(s),
                            Ok(Ok(None)) => {}
                            Ok(Err(e)) if e.is_cancellation() => {}
                            Ok(Err(e)) => hard_err = Some(e),
                            Err(_join_err) => {}
                        }
                    }
                    if let Some(e) = hard_err {
                        return Err(e);
                    }
                    return Ok(winner.or(Some(scope)));
                }
            }
        }
    })
}

async fn run_compensation_sweep(
    state: &Arc<InstanceState>,
    scope: &mut VariableScope,
    cancel: &CancellationToken,
) -> Result<(), ExecutionError> {
    let entries: Vec<(String, String)> = {
        let mut stack = state.compensation_stack.lock().unwrap();
        std::mem::take(&mut *stack)
    };
    for (boundary_id, _task_id) in entries.into_iter().rev() {
        let Some(node) = state.graph.node(&boundary_id).cloned() else { continue };
        let excluded = state.excluded_for(&node);
        state
            .hub
            .broadcast(element_activated(&node.id, "compensationBoundaryEvent", &node.display_name), &excluded)
            .await;
        state.hub.broadcast(element_completed(&node.id, 0), &excluded).await;
        for flow in state.graph.outgoing(&node.id) {
            traverse_path(state.clone(), flow.to.clone(), scope.clone(), cancel.clone(), format!("comp:{}", node.id))
                .await?;
        }
    }
    Ok(())
}

/// Runs an embedded `subProcess`'s inline body to completion, sharing the
/// caller's scope (unlike `callActivity`, which isolates it per node
/// property). The container's own outgoing flows fire only after the
/// nested start-to-end traversal finishes.
async fn run_inline_subprocess(
    state: &Arc<InstanceState>,
    node: &Node,
    scope: VariableScope,
    cancel: &CancellationToken,
) -> Result<VariableScope, ExecutionError> {
    let child_graph = Arc::new(state.graph.inline_subgraph(&node.id).cloned().unwrap());
    let start = child_graph
        .get_start_event()
        .ok_or_else(|| ExecutionError::Other(format!("{} has no start event", node.id)))?
        .id
        .clone();

    let child_state = Arc::new(InstanceState {
        instance_id: state.instance_id,
        graph: child_graph,
        hub: state.hub.clone(),
        bus: state.bus.clone(),
        adapters: state.adapters.clone(),
        config: state.config.clone(),
        registry: state.registry.clone(),
        join_arrivals: DashMap::new(),
        inclusive_winner: DashMap::new(),
        active_handles: DashMap::new(),
        compensation_stack: StdMutex::new(Vec::new()),
        root_cancel: cancel.clone(),
        shared_vars: state.shared_vars.clone(),
    });

    let result = traverse_path(child_state, start, scope, cancel.clone(), format!("sub:{}", node.id)).await?;
    Ok(result.unwrap_or_default())
}

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::StartEvent => "startEvent",
        NodeKind::EndEvent => "endEvent",
        NodeKind::IntermediateEvent => "intermediateEvent",
        NodeKind::TimerIntermediateCatchEvent => "timerIntermediateCatchEvent",
        NodeKind::ErrorBoundaryEvent => "errorBoundaryEvent",
        NodeKind::TimerBoundaryEvent => "timerBoundaryEvent",
        NodeKind::CompensationBoundaryEvent => "compensationBoundaryEvent",
        NodeKind::CompensationIntermediateThrowEvent => "compensationIntermediateThrowEvent",
        NodeKind::ErrorStartEvent => "errorStartEvent",
        NodeKind::TimerStartEvent => "timerStartEvent",
        NodeKind::MessageStartEvent => "messageStartEvent",
        NodeKind::SignalStartEvent => "signalStartEvent",
        NodeKind::EscalationStartEvent => "escalationStartEvent",
        NodeKind::CompensationStartEvent => "compensationStartEvent",
        NodeKind::Task => "task",
        NodeKind::UserTask => "userTask",
        NodeKind::ServiceTask => "serviceTask",
        NodeKind::ScriptTask => "scriptTask",
        NodeKind::SendTask => "sendTask",
        NodeKind::ReceiveTask => "receiveTask",
        NodeKind::ManualTask => "manualTask",
        NodeKind::BusinessRuleTask => "businessRuleTask",
        NodeKind::AgenticTask => "agenticTask",
        NodeKind::SubProcess => "subProcess",
        NodeKind::EventSubProcess => "eventSubProcess",
        NodeKind::CallActivity => "callActivity",
        NodeKind::ExclusiveGateway => "exclusiveGateway",
        NodeKind::ParallelGateway => "parallelGateway",
        NodeKind::InclusiveGateway => "inclusiveGateway",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Adapters;
    use crate::correlation::MessageBus;
    use crate::events::broadcast::ObserverHub;
    use crate::events::store_memory::MemoryEventStore;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn node(id: &str, kind: NodeKind) -> Node {
        Node {
            id: id.to_string(),
            kind,
            display_name: id.to_string(),
            attached_to_ref: None,
            properties: BTreeMap::new(),
        }
    }

    fn node_with(id: &str, kind: NodeKind, props: &[(&str, serde_json::Value)]) -> Node {
        let mut n = node(id, kind);
        for (k, v) in props {
            n.properties.insert(k.to_string(), v.clone());
        }
        n
    }

    fn boundary(id: &str, kind: NodeKind, attached_to: &str, props: &[(&str, serde_json::Value)]) -> Node {
        let mut n = node_with(id, kind, props);
        n.attached_to_ref = Some(attached_to.to_string());
        n
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

    fn build_engine() -> Engine {
        let bus = Arc::new(MessageBus::new());
        let hub = Arc::new(ObserverHub::new(Arc::new(MemoryEventStore::new())));
        let adapters = Arc::new(Adapters::mock());
        let config = Arc::new(EngineConfig::default());
        Engine::new(bus, hub, adapters, config)
    }

    async fn run_to_completion(engine: &Engine, id: Uuid) -> Instance {
        for _ in 0..300 {
            if let Some(inst) = engine.status(id) {
                if inst.status != "running" {
                    return inst;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("instance {id} did not finish in time");
    }

    /// Scenario 2: a parallel split must wait for every branch — including a
    /// slower one racing a timer — before the join proceeds.
    #[tokio::test]
    async fn parallel_join_waits_for_both_branches() {
        let nodes = vec![
            node("start", NodeKind::StartEvent),
            node("split", NodeKind::ParallelGateway),
            node("fast", NodeKind::Task),
            node_with(
                "slow",
                NodeKind::TimerIntermediateCatchEvent,
                &[("timerDefinition", serde_json::json!("PT0.05S"))],
            ),
            node("join", NodeKind::ParallelGateway),
            node("end", NodeKind::EndEvent),
        ];
        let flows = vec![
            flow("start", "split"),
            flow("split", "fast"),
            flow("split", "slow"),
            flow("fast", "join"),
            flow("slow", "join"),
            flow("join", "end"),
        ];
        let graph = Arc::new(
            Graph::new("p".into(), "parallel-join".into(), nodes, flows, BTreeMap::new(), BTreeMap::new()).unwrap(),
        );

        let engine = build_engine();
        let id = engine.start_instance(graph, VariableScope::new());
        let inst = run_to_completion(&engine, id).await;
        assert_eq!(inst.status, "success");
    }

    /// Scenario 3: an inclusive join lets the first arrival through and
    /// cancels the still-running sibling instead of waiting on it or killing
    /// unrelated work.
    #[tokio::test]
    async fn inclusive_join_cancels_losing_branch() {
        let nodes = vec![
            node("start", NodeKind::StartEvent),
            node("split", NodeKind::InclusiveGateway),
            node("fast", NodeKind::Task),
            node_with(
                "slow",
                NodeKind::TimerIntermediateCatchEvent,
                &[("timerDefinition", serde_json::json!("PT1S"))],
            ),
            node("join", NodeKind::InclusiveGateway),
            node("end", NodeKind::EndEvent),
        ];
        let flows = vec![
            flow("start", "split"),
            flow("split", "fast"),
            flow("split", "slow"),
            flow("fast", "join"),
            flow("slow", "join"),
            flow("join", "end"),
        ];
        let graph = Arc::new(
            Graph::new("p".into(), "inclusive-race".into(), nodes, flows, BTreeMap::new(), BTreeMap::new()).unwrap(),
        );

        let engine = build_engine();
        let id = engine.start_instance(graph, VariableScope::new());
        let inst = run_to_completion(&engine, id).await;
        assert_eq!(inst.status, "success");
    }

    /// Scenario 4: an interrupting timer boundary on a never-completing user
    /// task must divert the flow instead of waiting for the task forever.
    #[tokio::test]
    async fn interrupting_timer_boundary_diverts_flow() {
        let nodes = vec![
            node("start", NodeKind::StartEvent),
            node("approve", NodeKind::UserTask),
            boundary(
                "timeout",
                NodeKind::TimerBoundaryEvent,
                "approve",
                &[("timerDefinition", serde_json::json!("PT0.05S"))],
            ),
            node("never", NodeKind::EndEvent),
            node("timed_out", NodeKind::EndEvent),
        ];
        let flows = vec![
            flow("start", "approve"),
            flow("approve", "never"),
            flow("timeout", "timed_out"),
        ];
        let graph = Arc::new(
            Graph::new("p".into(), "timer-boundary".into(), nodes, flows, BTreeMap::new(), BTreeMap::new()).unwrap(),
        );

        let engine = build_engine();
        let id = engine.start_instance(graph, VariableScope::new());
        let inst = run_to_completion(&engine, id).await;
        assert_eq!(inst.status, "success");
    }

    /// Scenario 7: compensation runs in LIFO order — the most recently
    /// completed activity's handler fires first.
    #[tokio::test]
    async fn compensation_sweep_runs_in_lifo_order() {
        let nodes = vec![
            node("start", NodeKind::StartEvent),
            node("taskA", NodeKind::Task),
            boundary("compA", NodeKind::CompensationBoundaryEvent, "taskA", &[]),
            node("compLogA", NodeKind::Task),
            node("taskB", NodeKind::Task),
            boundary("compB", NodeKind::CompensationBoundaryEvent, "taskB", &[]),
            node("compLogB", NodeKind::Task),
            node("throw", NodeKind::CompensationIntermediateThrowEvent),
            node("end", NodeKind::EndEvent),
        ];
        let flows = vec![
            flow("start", "taskA"),
            flow("taskA", "taskB"),
            flow("taskB", "throw"),
            flow("throw", "end"),
            flow("compA", "compLogA"),
            flow("compB", "compLogB"),
        ];
        let graph = Arc::new(
            Graph::new("p".into(), "compensation-lifo".into(), nodes, flows, BTreeMap::new(), BTreeMap::new()).unwrap(),
        );

        let bus = Arc::new(MessageBus::new());
        let hub = Arc::new(ObserverHub::new(Arc::new(MemoryEventStore::new())));
        let (_observer_id, mut rx) = hub.register();
        let adapters = Arc::new(Adapters::mock());
        let config = Arc::new(EngineConfig::default());
        let engine = Engine::new(bus, hub, adapters, config);

        let id = engine.start_instance(graph, VariableScope::new());
        let inst = run_to_completion(&engine, id).await;
        assert_eq!(inst.status, "success");

        let mut order = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if envelope.event_type == "element.activated" {
                if let Some(el) = envelope.element_id.as_deref() {
                    if el == "compLogA" || el == "compLogB" {
                        order.push(el.to_string());
                    }
                }
            }
        }
        assert_eq!(order, vec!["compLogB", "compLogA"]);
    }

    /// A sequential multi-instance activity must set `loopCounter` per
    /// iteration and honor custom `outputElement`/`outputCollection` names
    /// instead of the old hardcoded `result`/`{id}_results` pair.
    #[tokio::test]
    async fn sequential_multi_instance_sets_loop_counter_and_custom_output_keys() {
        let loop_node = node_with(
            "loopTask",
            NodeKind::Task,
            &[
                ("isMultiInstance", serde_json::json!(true)),
                ("isSequential", serde_json::json!(true)),
                ("inputCollection", serde_json::json!("items")),
                ("inputElement", serde_json::json!("item")),
                ("outputElement", serde_json::json!("doubled")),
                ("outputCollection", serde_json::json!("doubledList")),
            ],
        );
        let nodes = vec![node("start", NodeKind::StartEvent), loop_node.clone()];
        let graph = Arc::new(Graph::new("p".into(), "multi-instance".into(), nodes, vec![], BTreeMap::new(), BTreeMap::new()).unwrap());

        let state = Arc::new(InstanceState {
            instance_id: Uuid::now_v7(),
            graph,
            hub: Arc::new(ObserverHub::new(Arc::new(MemoryEventStore::new()))),
            bus: Arc::new(MessageBus::new()),
            adapters: Arc::new(Adapters::mock()),
            config: Arc::new(EngineConfig::default()),
            registry: Arc::new(ExecutorRegistry::standard()),
            join_arrivals: DashMap::new(),
            inclusive_winner: DashMap::new(),
            active_handles: DashMap::new(),
            compensation_stack: StdMutex::new(Vec::new()),
            root_cancel: CancellationToken::new(),
            shared_vars: DashMap::new(),
        });

        let mut scope = VariableScope::new();
        scope.insert(
            "items".to_string(),
            Value::List(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]),
        );
        let cancel = CancellationToken::new();

        let outcome = multi_instance::run_multi_instance(&state, &loop_node, &mut scope, &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, boundaries::TaskOutcome::Completed));
        assert_eq!(scope.get("loopCounter"), Some(&Value::Number(2.0)));
        assert_eq!(
            scope.get("doubledList"),
            Some(&Value::List(vec![Value::Null, Value::Null, Value::Null]))
        );
        assert!(scope.get("loopTask_results").is_none());
    }
}
