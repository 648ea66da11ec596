use async_trait::async_trait;
use serde_json::Value as Json;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{
    EventStore, MessageRow, MessageStatus, ThinkingRow, ThreadHistory, ToolExecutionRow,
    ToolExecutionStatus,
};
use super::EventEnvelope;
use crate::error::StoreError;
use crate::types::now_ms;

struct Inner {
    threads: HashMap<String, Uuid>,
    raw_events: HashMap<String, Vec<EventEnvelope>>,
    messages: HashMap<Uuid, MessageRow>,
    thinking: HashMap<Uuid, Vec<ThinkingRow>>,
    tool_executions: HashMap<Uuid, Vec<ToolExecutionRow>>,
}

/// In-memory implementation of `EventStore`, the default backend and the
/// one used by tests.
pub struct MemoryEventStore {
    inner: RwLock<Inner>,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                threads: HashMap::new(),
                raw_events: HashMap::new(),
                messages: HashMap::new(),
                thinking: HashMap::new(),
                tool_executions: HashMap::new(),
            }),
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn thread_for_element(&self, element_id: &str) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(id) = inner.threads.get(element_id) {
            return Ok(*id);
        }
        let id = Uuid::now_v7();
        inner.threads.insert(element_id.to_string(), id);
        Ok(id)
    }

    async fn append_raw_event(&self, envelope: &EventEnvelope) -> Result<u64, StoreError> {
        let Some(element_id) = &envelope.element_id else {
            return Ok(0);
        };
        let mut inner = self.inner.write().await;
        let log = inner.raw_events.entry(element_id.clone()).or_default();
        log.push(envelope.clone());
        Ok(log.len() as u64)
    }

    async fn read_raw_events(&self, element_id: &str) -> Result<Vec<EventEnvelope>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.raw_events.get(element_id).cloned().unwrap_or_default())
    }

    async fn start_message(
        &self,
        element_id: &str,
        message_id: Uuid,
        role: &str,
    ) -> Result<(), StoreError> {
        let thread_id = self.thread_for_element(element_id).await?;
        let mut inner = self.inner.write().await;
        let now = now_ms();
        inner.messages.insert(
            message_id,
            MessageRow {
                message_id,
                thread_id,
                role: role.to_string(),
                content: String::new(),
                status: MessageStatus::Streaming,
                cancellation_reason: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn set_message_content(&self, message_id: Uuid, content: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| StoreError::Backend(format!("unknown message {message_id}")))?;
        row.content = content.to_string();
        row.updated_at = now_ms();
        Ok(())
    }

    async fn complete_message(&self, message_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| StoreError::Backend(format!("unknown message {message_id}")))?;
        row.status = MessageStatus::Complete;
        row.updated_at = now_ms();
        Ok(())
    }

    async fn cancel_message(&self, message_id: Uuid, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| StoreError::Backend(format!("unknown message {message_id}")))?;
        row.status = MessageStatus::Cancelled;
        row.cancellation_reason = Some(reason.to_string());
        row.updated_at = now_ms();
        Ok(())
    }

    async fn insert_complete_message(
        &self,
        element_id: &str,
        message_id: Uuid,
        role: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let thread_id = self.thread_for_element(element_id).await?;
        let mut inner = self.inner.write().await;
        let now = now_ms();
        inner.messages.insert(
            message_id,
            MessageRow {
                message_id,
                thread_id,
                role: role.to_string(),
                content: content.to_string(),
                status: MessageStatus::Complete,
                cancellation_reason: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn append_thinking(&self, element_id: &str, message: &str) -> Result<(), StoreError> {
        let thread_id = self.thread_for_element(element_id).await?;
        let mut inner = self.inner.write().await;
        inner.thinking.entry(thread_id).or_default().push(ThinkingRow {
            thread_id,
            message: message.to_string(),
            timestamp: now_ms(),
        });
        Ok(())
    }

    async fn start_tool_execution(
        &self,
        element_id: &str,
        tool_name: &str,
        args: Json,
    ) -> Result<(), StoreError> {
        let thread_id = self.thread_for_element(element_id).await?;
        let mut inner = self.inner.write().await;
        inner
            .tool_executions
            .entry(thread_id)
            .or_default()
            .push(ToolExecutionRow {
                thread_id,
                tool_name: tool_name.to_string(),
                args,
                result: None,
                status: ToolExecutionStatus::Running,
                start_time: now_ms(),
                end_time: None,
            });
        Ok(())
    }

    async fn complete_tool_execution(
        &self,
        element_id: &str,
        tool_name: &str,
        result: Json,
    ) -> Result<(), StoreError> {
        let thread_id = self.thread_for_element(element_id).await?;
        let mut inner = self.inner.write().await;
        if let Some(rows) = inner.tool_executions.get_mut(&thread_id) {
            if let Some(row) = rows
                .iter_mut()
                .rev()
                .find(|r| r.tool_name == tool_name && r.status == ToolExecutionStatus::Running)
            {
                row.status = ToolExecutionStatus::Complete;
                row.result = Some(result);
                row.end_time = Some(now_ms());
            }
        }
        Ok(())
    }

    async fn load_thread_history(&self, element_id: &str) -> Result<ThreadHistory, StoreError> {
        let thread_id = self.thread_for_element(element_id).await?;
        let inner = self.inner.read().await;
        let thinking = inner.thinking.get(&thread_id).cloned().unwrap_or_default();
        let tool_executions = inner
            .tool_executions
            .get(&thread_id)
            .cloned()
            .unwrap_or_default();
        let messages = inner
            .messages
            .values()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect();
        Ok(ThreadHistory {
            thinking,
            tool_executions,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn thread_resolution_is_stable() {
        let store = MemoryEventStore::new();
        let a = store.thread_for_element("node-1").await.unwrap();
        let b = store.thread_for_element("node-1").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn message_lifecycle_tracks_status() {
        let store = MemoryEventStore::new();
        let mid = Uuid::now_v7();
        store.start_message("node-1", mid, "assistant").await.unwrap();
        store.set_message_content(mid, "partial").await.unwrap();
        store.complete_message(mid).await.unwrap();
        let history = store.load_thread_history("node-1").await.unwrap();
        assert_eq!(history.messages.len(), 1);
        assert_eq!(history.messages[0].status, MessageStatus::Complete);
        assert_eq!(history.messages[0].content, "partial");
    }

    #[tokio::test]
    async fn tool_execution_closes_latest_running_row() {
        let store = MemoryEventStore::new();
        store
            .start_tool_execution("node-1", "search", Json::Null)
            .await
            .unwrap();
        store
            .complete_tool_execution("node-1", "search", Json::Bool(true))
            .await
            .unwrap();
        let history = store.load_thread_history("node-1").await.unwrap();
        assert_eq!(history.tool_executions.len(), 1);
        assert_eq!(
            history.tool_executions[0].status,
            ToolExecutionStatus::Complete
        );
    }
}
