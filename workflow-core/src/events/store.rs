//! Persistence trait for the durable audit trail and replay surface (§3
//! EventStore). The live broadcaster in `broadcast.rs` and the engine both
//! operate exclusively through this trait, so either backend can stand in
//! (`MemoryEventStore` for tests/demo, `PostgresEventStore` for production).

use async_trait::async_trait;
use serde_json::Value as Json;
use uuid::Uuid;

use super::EventEnvelope;
use crate::error::StoreError;
use crate::types::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Streaming,
    Complete,
    Cancelled,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MessageRow {
    pub message_id: Uuid,
    pub thread_id: Uuid,
    pub role: String,
    pub content: String,
    pub status: MessageStatus,
    pub cancellation_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ThinkingRow {
    pub thread_id: Uuid,
    pub message: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionStatus {
    Running,
    Complete,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolExecutionRow {
    pub thread_id: Uuid,
    pub tool_name: String,
    pub args: Json,
    pub result: Option<Json>,
    pub status: ToolExecutionStatus,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
}

/// Everything needed to replay one element's history in timestamp order.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ThreadHistory {
    pub thinking: Vec<ThinkingRow>,
    pub tool_executions: Vec<ToolExecutionRow>,
    pub messages: Vec<MessageRow>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Resolve (creating if absent) the thread id for an element.
    async fn thread_for_element(&self, element_id: &str) -> Result<Uuid, StoreError>;

    /// Append a raw event to the audit log. Every event tagged with an
    /// `elementId` lands here regardless of its projection below.
    async fn append_raw_event(&self, envelope: &EventEnvelope) -> Result<u64, StoreError>;

    async fn read_raw_events(&self, element_id: &str) -> Result<Vec<EventEnvelope>, StoreError>;

    // ── messages projection ──

    async fn start_message(
        &self,
        element_id: &str,
        message_id: Uuid,
        role: &str,
    ) -> Result<(), StoreError>;

    /// Cumulative content update for a streaming message.
    async fn set_message_content(&self, message_id: Uuid, content: &str) -> Result<(), StoreError>;

    async fn complete_message(&self, message_id: Uuid) -> Result<(), StoreError>;

    async fn cancel_message(&self, message_id: Uuid, reason: &str) -> Result<(), StoreError>;

    /// Insert a complete message row in one step (the sentence-chunk path).
    async fn insert_complete_message(
        &self,
        element_id: &str,
        message_id: Uuid,
        role: &str,
        content: &str,
    ) -> Result<(), StoreError>;

    // ── thinking projection ──

    async fn append_thinking(&self, element_id: &str, message: &str) -> Result<(), StoreError>;

    // ── tool executions projection ──

    async fn start_tool_execution(
        &self,
        element_id: &str,
        tool_name: &str,
        args: Json,
    ) -> Result<(), StoreError>;

    /// Close the latest running row with a matching tool name.
    async fn complete_tool_execution(
        &self,
        element_id: &str,
        tool_name: &str,
        result: Json,
    ) -> Result<(), StoreError>;

    // ── replay ──

    async fn load_thread_history(&self, element_id: &str) -> Result<ThreadHistory, StoreError>;
}
