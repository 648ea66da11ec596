//! Live fan-out and replay orchestration on top of an `EventStore`.
//!
//! Fan-out is lock-free: a broadcast iterates a snapshot copy of the
//! observer set; a failed push marks the observer dead and it is removed
//! after the loop (§9 design notes).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::store::EventStore;
use super::{category_of, task_cancel_failed, task_cancelled, EventCategory, EventEnvelope};

/// The decision a client posts back for a pending `userTask`.
#[derive(Debug, Clone)]
pub struct UserTaskDecision {
    pub decision: String,
    pub comments: Option<String>,
    pub completed_by: String,
}

/// Inter-event delay during replay, preserving visual cadence for the
/// requesting observer (§4.5). Configurable for tests.
pub const DEFAULT_REPLAY_DELAY: Duration = Duration::from_millis(50);

struct Observer {
    tx: mpsc::Sender<EventEnvelope>,
}

/// Per-node runtime cancellation bookkeeping plus the observer registry.
pub struct ObserverHub {
    store: Arc<dyn EventStore>,
    observers: DashMap<Uuid, Observer>,
    cancellable: DashMap<String, CancellationToken>,
    cancelled: DashSet<String>,
    user_tasks: DashMap<String, oneshot::Sender<UserTaskDecision>>,
    replay_delay: Duration,
}

impl ObserverHub {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            observers: DashMap::new(),
            cancellable: DashMap::new(),
            cancelled: DashSet::new(),
            user_tasks: DashMap::new(),
            replay_delay: DEFAULT_REPLAY_DELAY,
        }
    }

    pub fn with_replay_delay(mut self, delay: Duration) -> Self {
        self.replay_delay = delay;
        self
    }

    /// Register a new observer; returns its id and the receiving end of its
    /// outbound channel.
    pub fn register(&self) -> (Uuid, mpsc::Receiver<EventEnvelope>) {
        let id = Uuid::now_v7();
        let (tx, rx) = mpsc::channel(256);
        self.observers.insert(id, Observer { tx });
        (id, rx)
    }

    pub fn unregister(&self, observer_id: Uuid) {
        self.observers.remove(&observer_id);
    }

    /// Broadcast to every live observer, dropping any whose channel has
    /// closed or is over capacity. `excluded` is the set of categories the
    /// owning node's properties opted out of; unknown event types are
    /// always published regardless of exclusions.
    pub async fn broadcast(&self, envelope: EventEnvelope, excluded: &HashSet<EventCategory>) {
        if let Some(cat) = category_of(&envelope.event_type) {
            if excluded.contains(&cat) {
                return;
            }
        }

        if envelope.element_id.is_some() {
            let _ = self.store.append_raw_event(&envelope).await;
            self.project(&envelope).await;
        }

        let dead: Vec<Uuid> = self
            .observers
            .iter()
            .filter_map(|entry| {
                let (id, obs) = (*entry.key(), entry.value());
                match obs.tx.try_send(envelope.clone()) {
                    Ok(()) => None,
                    Err(_) => Some(id),
                }
            })
            .collect();
        for id in dead {
            self.observers.remove(&id);
        }
    }

    /// Send an envelope to exactly one observer (used by replay).
    async fn send_to(&self, observer_id: Uuid, envelope: EventEnvelope) {
        if let Some(obs) = self.observers.get(&observer_id) {
            if obs.tx.send(envelope).await.is_err() {
                drop(obs);
                self.observers.remove(&observer_id);
            }
        }
    }

    /// Project a raw event into the messages/thinking/tool_executions tables
    /// per the mapping in §4.5.
    async fn project(&self, envelope: &EventEnvelope) {
        let Some(element_id) = envelope.element_id.clone() else {
            return;
        };
        let store = &self.store;
        let get_str = |k: &str| envelope.fields.get(k).and_then(|v| v.as_str()).map(str::to_string);
        let message_id = || get_str("messageId").and_then(|s| Uuid::parse_str(&s).ok());

        match envelope.event_type.as_str() {
            "text.message.start" => {
                if let Some(mid) = message_id() {
                    let _ = store.start_message(&element_id, mid, "assistant").await;
                }
            }
            "text.message.content" => {
                if let (Some(mid), Some(content)) = (message_id(), get_str("content")) {
                    let _ = store.set_message_content(mid, &content).await;
                }
            }
            "text.message.end" => {
                if let Some(mid) = message_id() {
                    let _ = store.complete_message(mid).await;
                }
            }
            "text.message.chunk" => {
                if let (Some(mid), Some(text)) = (message_id(), get_str("text")) {
                    let _ = store
                        .insert_complete_message(&element_id, mid, "assistant", &text)
                        .await;
                }
            }
            "task.thinking" => {
                if let Some(message) = get_str("message") {
                    let _ = store.append_thinking(&element_id, &message).await;
                }
            }
            "task.tool.start" => {
                if let Some(name) = get_str("toolName") {
                    let args = envelope
                        .fields
                        .get("args")
                        .cloned()
                        .unwrap_or(serde_json::Value::Null);
                    let _ = store.start_tool_execution(&element_id, &name, args).await;
                }
            }
            "task.tool.end" => {
                if let Some(name) = get_str("toolName") {
                    let result = envelope
                        .fields
                        .get("result")
                        .cloned()
                        .unwrap_or(serde_json::Value::Null);
                    let _ = store
                        .complete_tool_execution(&element_id, &name, result)
                        .await;
                }
            }
            _ => {}
        }
    }

    /// Replay protocol: load history for `element_id`, sort by timestamp,
    /// re-emit as `task.thinking`/`task.tool.start`/`task.tool.end`/
    /// `text.message.chunk` to exactly the requesting observer, with a
    /// small inter-event delay.
    pub async fn replay(&self, observer_id: Uuid, element_id: &str) {
        let history = match self.store.load_thread_history(element_id).await {
            Ok(h) => h,
            Err(_) => return,
        };

        #[derive(Clone)]
        enum Item {
            Thinking(String, i64),
            ToolStart(String, serde_json::Value, i64),
            ToolEnd(String, serde_json::Value, i64),
            MessageChunk(Uuid, String, i64),
        }

        let mut items = Vec::new();
        for t in &history.thinking {
            items.push(Item::Thinking(t.message.clone(), t.timestamp));
        }
        for t in &history.tool_executions {
            items.push(Item::ToolStart(
                t.tool_name.clone(),
                t.args.clone(),
                t.start_time,
            ));
            if let Some(end) = t.end_time {
                items.push(Item::ToolEnd(
                    t.tool_name.clone(),
                    t.result.clone().unwrap_or(serde_json::Value::Null),
                    end,
                ));
            }
        }
        for m in &history.messages {
            items.push(Item::MessageChunk(m.message_id, m.content.clone(), m.created_at));
        }

        items.sort_by_key(|i| match i {
            Item::Thinking(_, ts)
            | Item::ToolStart(_, _, ts)
            | Item::ToolEnd(_, _, ts)
            | Item::MessageChunk(_, _, ts) => *ts,
        });

        for item in items {
            let envelope = match item {
                Item::Thinking(msg, _) => super::task_thinking(element_id, &msg),
                Item::ToolStart(name, args, _) => super::tool_start(element_id, &name, &args),
                Item::ToolEnd(name, result, _) => super::tool_end(element_id, &name, &result),
                Item::MessageChunk(mid, text, _) => {
                    super::text_message_chunk(element_id, mid, &text)
                }
            };
            self.send_to(observer_id, envelope).await;
            tokio::time::sleep(self.replay_delay).await;
        }
    }

    // ── user task completion ──

    /// Register a pending approval task, returning the receiver the
    /// `userTask` executor blocks on until a client posts back a decision.
    pub fn register_user_task(&self, task_id: &str) -> oneshot::Receiver<UserTaskDecision> {
        let (tx, rx) = oneshot::channel();
        self.user_tasks.insert(task_id.to_string(), tx);
        rx
    }

    /// Deliver a `userTask.complete` frame. Returns an error if no task with
    /// this id is pending.
    pub fn complete_user_task(&self, task_id: &str, decision: UserTaskDecision) -> Result<(), ()> {
        match self.user_tasks.remove(task_id) {
            Some((_, tx)) => tx.send(decision).map_err(|_| ()),
            None => Err(()),
        }
    }

    // ── cancellation support ──

    /// Mark a node cancellable, returning the token executors should poll.
    pub fn mark_cancellable(&self, element_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancellable.insert(element_id.to_string(), token.clone());
        self.cancelled.remove(element_id);
        token
    }

    pub fn clear_cancellable(&self, element_id: &str) {
        self.cancellable.remove(element_id);
    }

    /// Handle a `task.cancel.request`. Fails if the node is not cancellable
    /// or has already been cancelled/completed.
    pub async fn request_cancel(
        &self,
        element_id: &str,
        reason: &str,
        excluded: &HashSet<EventCategory>,
    ) -> Result<(), ()> {
        if self.cancelled.contains(element_id) {
            self.broadcast(task_cancel_failed(element_id, "already cancelled"), excluded)
                .await;
            return Err(());
        }
        let Some(token) = self.cancellable.get(element_id).map(|t| t.clone()) else {
            self.broadcast(task_cancel_failed(element_id, "not cancellable"), excluded)
                .await;
            return Err(());
        };
        self.cancelled.insert(element_id.to_string());
        self.cancellable.remove(element_id);
        // User-facing cancel event precedes the cooperative signal, so
        // observers never see the executor's own final progress first.
        self.broadcast(task_cancelled(element_id, reason), excluded).await;
        token.cancel();
        Ok(())
    }

    pub fn is_cancelled(&self, element_id: &str) -> bool {
        self.cancelled.contains(element_id)
    }
}
