//! Tool invocation for `agenticTask`. Tools are named, take and return JSON,
//! and are looked up by name at call time.

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::error::AdapterError;

#[async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn invoke(&self, tool_name: &str, args: Json) -> Result<Json, AdapterError>;
}

/// Echoes the arguments back under a `tool` key; enough to exercise the
/// tool.start/tool.end event pair without a real integration.
#[derive(Default)]
pub struct MockToolAdapter;

#[async_trait]
impl ToolAdapter for MockToolAdapter {
    async fn invoke(&self, tool_name: &str, args: Json) -> Result<Json, AdapterError> {
        tracing::debug!(tool_name, "mock tool invoked");
        Ok(serde_json::json!({ "tool": tool_name, "echo": args }))
    }
}
