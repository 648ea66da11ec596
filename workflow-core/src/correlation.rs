//! Message Correlation Bus (C4). A process-wide rendezvous between external
//! publishers and receive-nodes, keyed by `(messageRef, correlationKey)`.
//! Guarded by a single synchronous mutex — no suspension point is ever
//! reached while the lock is held (§5).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::BusError;
use crate::types::Value;

type Key = (String, String);

struct Waiter {
    id: u64,
    task_id: String,
    tx: Option<oneshot::Sender<Value>>,
}

#[derive(Default)]
struct Inner {
    /// Messages delivered but not yet consumed, keyed by exact (ref, key).
    queued: HashMap<Key, VecDeque<Value>>,
    /// Waiters registered for an exact (ref, key) pair.
    waiters: HashMap<Key, VecDeque<Waiter>>,
    /// Waiters registered with an empty messageRef filter — match any ref
    /// sharing the correlationKey.
    wildcard_waiters: HashMap<String, VecDeque<Waiter>>,
}

/// Snapshot row for introspection endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueuedMessageRow {
    pub message_ref: String,
    pub correlation_key: String,
    pub count: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WaiterRow {
    pub message_ref: String,
    pub correlation_key: String,
    pub task_id: String,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BusStats {
    pub queued_messages: usize,
    pub waiters: usize,
}

pub struct MessageBus {
    inner: Mutex<Inner>,
    next_waiter_id: AtomicU64,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_waiter_id: AtomicU64::new(1),
        }
    }

    /// Publish a message. Returns whether it was delivered synchronously to
    /// a waiter (`true`) or enqueued for a future wait (`false`).
    pub fn publish(&self, message_ref: &str, correlation_key: &str, payload: Value) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let key: Key = (message_ref.to_string(), correlation_key.to_string());

        if let Some(queue) = inner.waiters.get_mut(&key) {
            while let Some(mut w) = queue.pop_front() {
                if let Some(tx) = w.tx.take() {
                    if queue.is_empty() {
                        inner.waiters.remove(&key);
                    }
                    let _ = tx.send(payload);
                    return true;
                }
            }
            inner.waiters.remove(&key);
        }

        if let Some(queue) = inner.wildcard_waiters.get_mut(correlation_key) {
            while let Some(mut w) = queue.pop_front() {
                if let Some(tx) = w.tx.take() {
                    if queue.is_empty() {
                        inner.wildcard_waiters.remove(correlation_key);
                    }
                    let _ = tx.send(payload);
                    return true;
                }
            }
            inner.wildcard_waiters.remove(correlation_key);
        }

        inner.queued.entry(key).or_default().push_back(payload);
        false
    }

    /// Wait for a message. `message_ref` empty means "any message ref
    /// sharing this correlation key". Cancellation-safe: dropping the
    /// returned future removes the waiter registration.
    pub async fn wait_for_message(
        &self,
        task_id: &str,
        message_ref: &str,
        correlation_key: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Value, BusError> {
        // Fast path: a message is already queued.
        if let Some(payload) = self.try_take_queued(message_ref, correlation_key) {
            return Ok(payload);
        }

        let (tx, rx) = oneshot::channel();
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut inner = self.inner.lock().unwrap();
            let waiter = Waiter {
                id,
                task_id: task_id.to_string(),
                tx: Some(tx),
            };
            if message_ref.is_empty() {
                inner
                    .wildcard_waiters
                    .entry(correlation_key.to_string())
                    .or_default()
                    .push_back(waiter);
            } else {
                inner
                    .waiters
                    .entry((message_ref.to_string(), correlation_key.to_string()))
                    .or_default()
                    .push_back(waiter);
            }
        }

        let result = match timeout {
            Some(d) => {
                tokio::select! {
                    r = rx => r.map_err(|_| BusError::Cancelled(message_ref.to_string(), correlation_key.to_string())),
                    _ = tokio::time::sleep(d) => Err(BusError::Timeout {
                        message_ref: message_ref.to_string(),
                        correlation_key: correlation_key.to_string(),
                    }),
                    _ = cancel.cancelled() => Err(BusError::Cancelled(message_ref.to_string(), correlation_key.to_string())),
                }
            }
            None => {
                tokio::select! {
                    r = rx => r.map_err(|_| BusError::Cancelled(message_ref.to_string(), correlation_key.to_string())),
                    _ = cancel.cancelled() => Err(BusError::Cancelled(message_ref.to_string(), correlation_key.to_string())),
                }
            }
        };

        if result.is_err() {
            self.remove_waiter(message_ref, correlation_key, id);
        }
        result
    }

    fn try_take_queued(&self, message_ref: &str, correlation_key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().unwrap();
        if message_ref.is_empty() {
            let candidate_key = inner
                .queued
                .keys()
                .find(|(_, ck)| ck == correlation_key)
                .cloned();
            if let Some(key) = candidate_key {
                let queue = inner.queued.get_mut(&key).unwrap();
                let v = queue.pop_front();
                if queue.is_empty() {
                    inner.queued.remove(&key);
                }
                return v;
            }
            None
        } else {
            let key = (message_ref.to_string(), correlation_key.to_string());
            let queue = inner.queued.get_mut(&key)?;
            let v = queue.pop_front();
            if queue.is_empty() {
                inner.queued.remove(&key);
            }
            v
        }
    }

    fn remove_waiter(&self, message_ref: &str, correlation_key: &str, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if message_ref.is_empty() {
            if let Some(q) = inner.wildcard_waiters.get_mut(correlation_key) {
                q.retain(|w| w.id != id);
                if q.is_empty() {
                    inner.wildcard_waiters.remove(correlation_key);
                }
            }
        } else {
            let key = (message_ref.to_string(), correlation_key.to_string());
            if let Some(q) = inner.waiters.get_mut(&key) {
                q.retain(|w| w.id != id);
                if q.is_empty() {
                    inner.waiters.remove(&key);
                }
            }
        }
    }

    pub fn list_queued_messages(&self) -> Vec<QueuedMessageRow> {
        let inner = self.inner.lock().unwrap();
        inner
            .queued
            .iter()
            .map(|((mref, ck), q)| QueuedMessageRow {
                message_ref: mref.clone(),
                correlation_key: ck.clone(),
                count: q.len(),
            })
            .collect()
    }

    pub fn list_waiters(&self) -> Vec<WaiterRow> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<WaiterRow> = inner
            .waiters
            .iter()
            .flat_map(|((mref, ck), q)| {
                q.iter().map(move |w| WaiterRow {
                    message_ref: mref.clone(),
                    correlation_key: ck.clone(),
                    task_id: w.task_id.clone(),
                })
            })
            .collect();
        rows.extend(inner.wildcard_waiters.iter().flat_map(|(ck, q)| {
            q.iter().map(move |w| WaiterRow {
                message_ref: String::new(),
                correlation_key: ck.clone(),
                task_id: w.task_id.clone(),
            })
        }));
        rows
    }

    /// Clear all queued messages for a correlation key (and its wildcard
    /// entries). Used by `DELETE /webhooks/queue/{correlationKey}`.
    pub fn clear_messages(&self, correlation_key: &str) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let keys: Vec<Key> = inner
            .queued
            .keys()
            .filter(|(_, ck)| ck == correlation_key)
            .cloned()
            .collect();
        let mut removed = 0;
        for k in keys {
            if let Some(q) = inner.queued.remove(&k) {
                removed += q.len();
            }
        }
        removed
    }

    pub fn stats(&self) -> BusStats {
        let inner = self.inner.lock().unwrap();
        BusStats {
            queued_messages: inner.queued.values().map(|q| q.len()).sum(),
            waiters: inner.waiters.values().map(|q| q.len()).sum::<usize>()
                + inner.wildcard_waiters.values().map(|q| q.len()).sum::<usize>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_delivery_per_key() {
        let bus = MessageBus::new();
        bus.publish("m", "k", Value::Number(1.0));
        bus.publish("m", "k", Value::Number(2.0));

        let cancel = CancellationToken::new();
        let first = bus
            .wait_for_message("t1", "m", "k", None, &cancel)
            .await
            .unwrap();
        let second = bus
            .wait_for_message("t2", "m", "k", None, &cancel)
            .await
            .unwrap();
        assert_eq!(first, Value::Number(1.0));
        assert_eq!(second, Value::Number(2.0));
    }

    #[tokio::test]
    async fn publish_with_waiter_present_delivers_synchronously() {
        let bus = std::sync::Arc::new(MessageBus::new());
        let cancel = CancellationToken::new();
        let bus2 = bus.clone();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            bus2.wait_for_message("t1", "m", "k", None, &cancel2).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let delivered = bus.publish("m", "k", Value::Bool(true));
        assert!(delivered);
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[tokio::test]
    async fn wait_times_out_and_removes_waiter() {
        let bus = MessageBus::new();
        let cancel = CancellationToken::new();
        let err = bus
            .wait_for_message("t1", "m", "k", Some(Duration::from_millis(10)), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout { .. }));
        assert_eq!(bus.stats().waiters, 0);
    }
}
