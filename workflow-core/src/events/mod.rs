//! Event Broadcasting & Replay Store (C5). Two surfaces share one schema:
//! live fan-out to connected observers, and durable replay for late
//! joiners. See `broadcast` for the former, `store`/`store_memory`/
//! `store_postgres` for the latter.

pub mod broadcast;
pub mod store;
pub mod store_memory;
#[cfg(feature = "postgres")]
pub mod store_postgres;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use uuid::Uuid;

use crate::types::{now_ms, Timestamp};

/// The fixed event-type catalogue (§6), grouped by category. Category
/// membership decides whether a node's declared exclusions drop the event
/// before fan-out; unknown types are always published.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Messaging,
    Tool,
    State,
    Lifecycle,
    Special,
}

pub fn category_of(event_type: &str) -> Option<EventCategory> {
    use EventCategory::*;
    Some(match event_type {
        "text.message.start" | "text.message.content" | "text.message.end"
        | "text.message.chunk" => Messaging,
        "task.tool.start" | "task.tool.end" | "agent.tool_use" => Tool,
        "messages.snapshot" | "state.snapshot" | "state.delta" => State,
        "workflow.started" | "workflow.completed" | "element.activated"
        | "element.completed" | "task.progress" | "task.error" | "task.cancelled"
        | "task.cancellable" | "task.cancelling" | "task.cancel.failed"
        | "gateway.evaluating" | "gateway.path_taken" => Lifecycle,
        "task.thinking" | "userTask.created" | "ping" | "pong" | "replay.request"
        | "clear.history" => Special,
        _ => return None,
    })
}

/// A typed event envelope pushed to observers: `{type, elementId?,
/// timestamp, ...kindFields}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub fields: Map<String, Json>,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, element_id: Option<String>) -> Self {
        Self {
            event_type: event_type.into(),
            element_id,
            timestamp: now_ms(),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.to_string(), v);
        }
        self
    }

    pub fn category(&self) -> Option<EventCategory> {
        category_of(&self.event_type)
    }
}

// ─── Convenience constructors for the well-known event types ──────────────

pub fn element_activated(id: &str, kind: &str, name: &str) -> EventEnvelope {
    EventEnvelope::new("element.activated", Some(id.to_string()))
        .with("id", id)
        .with("kind", kind)
        .with("name", name)
}

pub fn element_completed(id: &str, duration_ms: i64) -> EventEnvelope {
    EventEnvelope::new("element.completed", Some(id.to_string()))
        .with("id", id)
        .with("duration", duration_ms)
}

pub fn task_progress(id: &str, status: &str, message: &str, fraction: f64) -> EventEnvelope {
    EventEnvelope::new("task.progress", Some(id.to_string()))
        .with("status", status)
        .with("message", message)
        .with("fraction", fraction)
}

pub fn task_error(id: &str, message: &str, error_type: &str, retryable: bool) -> EventEnvelope {
    EventEnvelope::new("task.error", Some(id.to_string()))
        .with("error", serde_json::json!({ "message": message, "type": error_type }))
        .with("retryable", retryable)
}

pub fn task_cancelled(id: &str, reason: &str) -> EventEnvelope {
    EventEnvelope::new("task.cancelled", Some(id.to_string())).with("reason", reason)
}

pub fn task_cancellable(id: &str) -> EventEnvelope {
    EventEnvelope::new("task.cancellable", Some(id.to_string()))
}

pub fn task_cancelling(id: &str) -> EventEnvelope {
    EventEnvelope::new("task.cancelling", Some(id.to_string()))
}

pub fn task_cancel_failed(id: &str, reason: &str) -> EventEnvelope {
    EventEnvelope::new("task.cancel.failed", Some(id.to_string())).with("reason", reason)
}

pub fn gateway_evaluating(id: &str) -> EventEnvelope {
    EventEnvelope::new("gateway.evaluating", Some(id.to_string()))
}

pub fn gateway_path_taken(id: &str, condition: &str, to: &str) -> EventEnvelope {
    EventEnvelope::new("gateway.path_taken", Some(id.to_string()))
        .with("condition", condition)
        .with("to", to)
}

pub fn workflow_started(instance_id: Uuid, workflow_name: &str) -> EventEnvelope {
    EventEnvelope::new("workflow.started", None)
        .with("instanceId", instance_id.to_string())
        .with("workflowName", workflow_name)
}

pub fn workflow_completed(instance_id: Uuid, outcome: &str, duration_ms: i64) -> EventEnvelope {
    EventEnvelope::new("workflow.completed", None)
        .with("instanceId", instance_id.to_string())
        .with("outcome", outcome)
        .with("duration", duration_ms)
}

pub fn task_thinking(id: &str, message: &str) -> EventEnvelope {
    EventEnvelope::new("task.thinking", Some(id.to_string())).with("message", message)
}

pub fn tool_start(id: &str, tool_name: &str, args: &Json) -> EventEnvelope {
    EventEnvelope::new("task.tool.start", Some(id.to_string()))
        .with("toolName", tool_name)
        .with("args", args.clone())
}

pub fn tool_end(id: &str, tool_name: &str, result: &Json) -> EventEnvelope {
    EventEnvelope::new("task.tool.end", Some(id.to_string()))
        .with("toolName", tool_name)
        .with("result", result.clone())
}

pub fn text_message_start(id: &str, message_id: Uuid) -> EventEnvelope {
    EventEnvelope::new("text.message.start", Some(id.to_string()))
        .with("messageId", message_id.to_string())
}

pub fn text_message_content(id: &str, message_id: Uuid, content: &str) -> EventEnvelope {
    EventEnvelope::new("text.message.content", Some(id.to_string()))
        .with("messageId", message_id.to_string())
        .with("content", content)
}

pub fn text_message_end(id: &str, message_id: Uuid) -> EventEnvelope {
    EventEnvelope::new("text.message.end", Some(id.to_string()))
        .with("messageId", message_id.to_string())
}

pub fn text_message_chunk(id: &str, message_id: Uuid, text: &str) -> EventEnvelope {
    EventEnvelope::new("text.message.chunk", Some(id.to_string()))
        .with("messageId", message_id.to_string())
        .with("text", text)
}

pub fn user_task_created(id: &str, task_id: &str) -> EventEnvelope {
    EventEnvelope::new("userTask.created", Some(id.to_string())).with("taskId", task_id)
}
