//! Workflow execution engine core: graph model, gateway evaluation, task
//! executors, message correlation, event broadcasting, and the traversal
//! engine that ties them together.

pub mod adapters;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod events;
pub mod executors;
pub mod expr;
pub mod gateway;
pub mod graph;
pub mod instance;
pub mod segmenter;
pub mod types;

pub use correlation::MessageBus;
pub use engine::Engine;
pub use error::{AdapterError, BusError, ExecutionError, GraphParseError, InstanceError, StoreError};
pub use events::broadcast::ObserverHub;
pub use graph::{Flow, Graph, Node, NodeKind};
pub use instance::{Instance, InstanceOutcome};
pub use types::{Value, VariableScope};
