//! External Adapters (C8). Narrow, pluggable interfaces between the engine
//! and the outside world: sending mail, invoking tools, calling a model,
//! and running a sandboxed script. Each has a deterministic mock
//! implementation so the engine is fully testable without live services.

pub mod email;
pub mod llm;
pub mod script_sandbox;
pub mod tool;

pub use email::{EmailAdapter, MockEmailAdapter};
pub use llm::{LlmAdapter, LlmStreamDelta, MockLlmAdapter};
pub use script_sandbox::{RhaiScriptSandbox, ScriptSandbox};
pub use tool::{MockToolAdapter, ToolAdapter};

use std::sync::Arc;

/// The adapter bundle an `ExecutionContext` carries. Swappable as a unit so
/// tests and demos can substitute mocks for every external dependency.
#[derive(Clone)]
pub struct Adapters {
    pub email: Arc<dyn EmailAdapter>,
    pub tool: Arc<dyn ToolAdapter>,
    pub llm: Arc<dyn LlmAdapter>,
    pub script: Arc<dyn ScriptSandbox>,
}

impl Adapters {
    pub fn mock() -> Self {
        Self {
            email: Arc::new(MockEmailAdapter::default()),
            tool: Arc::new(MockToolAdapter::default()),
            llm: Arc::new(MockLlmAdapter::default()),
            script: Arc::new(RhaiScriptSandbox::new()),
        }
    }
}
