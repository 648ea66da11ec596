//! Task Executor Registry (C3). A mapping from node kind to the executor
//! that drives it, sharing one context shape across all kinds.

mod agentic_task;
mod basic;
mod call_activity;
mod receive_task;
mod script_task;
mod send_task;
mod service_task;
mod timer;
mod user_task;

pub use timer::parse_timer;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapters::Adapters;
use crate::config::EngineConfig;
use crate::correlation::MessageBus;
use crate::error::ExecutionError;
use crate::events::broadcast::ObserverHub;
use crate::events::EventCategory;
use crate::graph::{Node, NodeKind};
use crate::types::VariableScope;

/// Hook back into the engine so `callActivity` can run a named subgraph
/// without `executors` depending on `engine` at the module level.
#[async_trait]
pub trait SubgraphRunner: Send + Sync {
    async fn run_subgraph(
        &self,
        subgraph_name: &str,
        scope: VariableScope,
        cancel: CancellationToken,
    ) -> Result<VariableScope, ExecutionError>;
}

/// Everything a single node execution needs. Owns the mutable borrow of the
/// path's variable scope for the duration of the call (single-writer
/// discipline, §5).
pub struct ExecutionContext<'a> {
    pub instance_id: Uuid,
    pub node: &'a Node,
    pub variables: &'a mut VariableScope,
    pub cancel: CancellationToken,
    pub hub: Arc<ObserverHub>,
    pub bus: Arc<MessageBus>,
    pub adapters: Arc<Adapters>,
    pub config: Arc<EngineConfig>,
    pub subgraphs: Arc<dyn SubgraphRunner>,
    pub excluded_categories: HashSet<EventCategory>,
}

impl<'a> ExecutionContext<'a> {
    pub async fn emit(&self, envelope: crate::events::EventEnvelope) {
        self.hub.broadcast(envelope, &self.excluded_categories).await;
    }
}

/// Reads the node's `excludedEventCategories` property (a list of category
/// names) into the set a broadcast checks against.
pub fn excluded_categories(node: &Node) -> HashSet<EventCategory> {
    let Some(serde_json::Value::Array(items)) = node.properties.get("excludedEventCategories")
    else {
        return HashSet::new();
    };
    items
        .iter()
        .filter_map(|v| v.as_str())
        .filter_map(|s| match s {
            "messaging" => Some(EventCategory::Messaging),
            "tool" => Some(EventCategory::Tool),
            "state" => Some(EventCategory::State),
            "lifecycle" => Some(EventCategory::Lifecycle),
            "special" => Some(EventCategory::Special),
            _ => None,
        })
        .collect()
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError>;
}

/// Maps every closed-set activity `NodeKind` to its executor. Gateways and
/// events are handled directly by the engine, not through this registry.
pub struct ExecutorRegistry {
    executors: BTreeMap<NodeKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn standard() -> Self {
        let mut executors: BTreeMap<NodeKind, Arc<dyn Executor>> = BTreeMap::new();
        executors.insert(NodeKind::UserTask, Arc::new(user_task::UserTaskExecutor));
        executors.insert(NodeKind::ReceiveTask, Arc::new(receive_task::ReceiveTaskExecutor));
        executors.insert(NodeKind::SendTask, Arc::new(send_task::SendTaskExecutor));
        executors.insert(NodeKind::ScriptTask, Arc::new(script_task::ScriptTaskExecutor));
        executors.insert(NodeKind::ServiceTask, Arc::new(service_task::ServiceTaskExecutor));
        executors.insert(NodeKind::AgenticTask, Arc::new(agentic_task::AgenticTaskExecutor));
        executors.insert(
            NodeKind::TimerIntermediateCatchEvent,
            Arc::new(timer::TimerExecutor),
        );
        executors.insert(NodeKind::CallActivity, Arc::new(call_activity::CallActivityExecutor));
        executors.insert(NodeKind::ManualTask, Arc::new(basic::BasicExecutor));
        executors.insert(NodeKind::BusinessRuleTask, Arc::new(basic::BasicExecutor));
        executors.insert(NodeKind::Task, Arc::new(basic::BasicExecutor));
        Self { executors }
    }

    pub fn get(&self, kind: NodeKind) -> Option<&Arc<dyn Executor>> {
        self.executors.get(&kind)
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Deterministic key under which a completed user task stores its outcome,
/// shared by `user_task.rs` and anything reading the decision later.
pub fn user_task_keys(node_id: &str) -> (String, String, String) {
    (
        format!("{node_id}_decision"),
        format!("{node_id}_comments"),
        format!("{node_id}_completedBy"),
    )
}

/// Deterministic keys a caught error boundary writes into variables.
pub fn boundary_error_keys(boundary_id: &str) -> (String, String) {
    (
        format!("{boundary_id}_errorType"),
        format!("{boundary_id}_errorMessage"),
    )
}
