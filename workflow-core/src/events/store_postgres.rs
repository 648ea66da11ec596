//! PostgreSQL-backed `EventStore`. Schema lives in `migrations/`; writes are
//! mutually exclusive via the pool, reads for replay may proceed
//! concurrently with writes (§5).

use async_trait::async_trait;
use serde_json::Value as Json;
use uuid::Uuid;

use super::store::{
    EventStore, MessageRow, MessageStatus, ThinkingRow, ThreadHistory, ToolExecutionRow,
    ToolExecutionStatus,
};
use super::EventEnvelope;
use crate::error::StoreError;

pub struct PostgresEventStore {
    pool: sqlx::PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;
        Ok(())
    }
}

fn status_from_str(s: &str) -> MessageStatus {
    match s {
        "complete" => MessageStatus::Complete,
        "cancelled" => MessageStatus::Cancelled,
        _ => MessageStatus::Streaming,
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn thread_for_element(&self, element_id: &str) -> Result<Uuid, StoreError> {
        if let Some(row) = sqlx::query_as::<_, (Uuid,)>(
            "SELECT thread_id FROM threads WHERE element_id = $1",
        )
        .bind(element_id)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(row.0);
        }
        let id = Uuid::now_v7();
        sqlx::query("INSERT INTO threads (thread_id, element_id) VALUES ($1, $2) ON CONFLICT (element_id) DO NOTHING")
            .bind(id)
            .bind(element_id)
            .execute(&self.pool)
            .await?;
        // Another writer may have raced us; re-read to get the canonical id.
        let row: (Uuid,) = sqlx::query_as("SELECT thread_id FROM threads WHERE element_id = $1")
            .bind(element_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    async fn append_raw_event(&self, envelope: &EventEnvelope) -> Result<u64, StoreError> {
        let Some(element_id) = &envelope.element_id else {
            return Ok(0);
        };
        let blob = serde_json::to_value(envelope)?;
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO events (element_id, event_type, blob, timestamp)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(element_id)
        .bind(&envelope.event_type)
        .bind(blob)
        .bind(envelope.timestamp)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 as u64)
    }

    async fn read_raw_events(&self, element_id: &str) -> Result<Vec<EventEnvelope>, StoreError> {
        let rows: Vec<(Json,)> =
            sqlx::query_as("SELECT blob FROM events WHERE element_id = $1 ORDER BY timestamp")
                .bind(element_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(blob,)| serde_json::from_value(blob).map_err(StoreError::from))
            .collect()
    }

    async fn start_message(
        &self,
        element_id: &str,
        message_id: Uuid,
        role: &str,
    ) -> Result<(), StoreError> {
        let thread_id = self.thread_for_element(element_id).await?;
        sqlx::query(
            r#"
            INSERT INTO messages (message_id, thread_id, role, content, status)
            VALUES ($1, $2, $3, '', 'streaming')
            "#,
        )
        .bind(message_id)
        .bind(thread_id)
        .bind(role)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_message_content(&self, message_id: Uuid, content: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE messages SET content = $1, updated_at = now() WHERE message_id = $2")
            .bind(content)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete_message(&self, message_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE messages SET status = 'complete', updated_at = now() WHERE message_id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cancel_message(&self, message_id: Uuid, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE messages SET status = 'cancelled', cancellation_reason = $1, updated_at = now() WHERE message_id = $2",
        )
        .bind(reason)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            r#"
            INSERT INTO messages (message_id, thread_id, role, content, status)
            VALUES ($1, $2, $3, $4, 'complete')
            "#,
        )
        .bind(message_id)
        .bind(thread_id)
        .bind(role)
        .bind(content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_thinking(&self, element_id: &str, message: &str) -> Result<(), StoreError> {
        let thread_id = self.thread_for_element(element_id).await?;
        sqlx::query("INSERT INTO thinking_events (thread_id, message) VALUES ($1, $2)")
            .bind(thread_id)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn start_tool_execution(
        &self,
        element_id: &str,
        tool_name: &str,
        args: Json,
    ) -> Result<(), StoreError> {
        let thread_id = self.thread_for_element(element_id).await?;
        sqlx::query(
            r#"
            INSERT INTO tool_executions (thread_id, tool_name, args, status, start_time)
            VALUES ($1, $2, $3, 'running', now())
            "#,
        )
        .bind(thread_id)
        .bind(tool_name)
        .bind(args)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_tool_execution(
        &self,
        element_id: &str,
        tool_name: &str,
        result: Json,
    ) -> Result<(), StoreError> {
        let thread_id = self.thread_for_element(element_id).await?;
        sqlx::query(
            r#"
            UPDATE tool_executions SET status = 'complete', result = $1, end_time = now()
            WHERE id = (
                SELECT id FROM tool_executions
                WHERE thread_id = $2 AND tool_name = $3 AND status = 'running'
                ORDER BY start_time DESC
                LIMIT 1
            )
            "#,
        )
        .bind(result)
        .bind(thread_id)
        .bind(tool_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_thread_history(&self, element_id: &str) -> Result<ThreadHistory, StoreError> {
        let thread_id = self.thread_for_element(element_id).await?;

        let thinking_rows: Vec<(String, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
            "SELECT message, timestamp FROM thinking_events WHERE thread_id = $1 ORDER BY timestamp",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        let thinking = thinking_rows
            .into_iter()
            .map(|(message, ts)| ThinkingRow {
                thread_id,
                message,
                timestamp: ts.timestamp_millis(),
            })
            .collect();

        #[allow(clippy::type_complexity)]
        let tool_rows: Vec<(
            String,
            Json,
            Option<Json>,
            String,
            chrono::DateTime<chrono::Utc>,
            Option<chrono::DateTime<chrono::Utc>>,
        )> = sqlx::query_as(
            r#"
            SELECT tool_name, args, result, status, start_time, end_time
            FROM tool_executions WHERE thread_id = $1 ORDER BY start_time
            "#,
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        let tool_executions = tool_rows
            .into_iter()
            .map(|(tool_name, args, result, status, start, end)| ToolExecutionRow {
                thread_id,
                tool_name,
                args,
                result,
                status: if status == "complete" {
                    ToolExecutionStatus::Complete
                } else {
                    ToolExecutionStatus::Running
                },
                start_time: start.timestamp_millis(),
                end_time: end.map(|e| e.timestamp_millis()),
            })
            .collect();

        #[allow(clippy::type_complexity)]
        let message_rows: Vec<(
            Uuid,
            String,
            String,
            String,
            Option<String>,
            chrono::DateTime<chrono::Utc>,
            chrono::DateTime<chrono::Utc>,
        )> = sqlx::query_as(
            r#"
            SELECT message_id, role, content, status, cancellation_reason, created_at, updated_at
            FROM messages WHERE thread_id = $1 ORDER BY created_at
            "#,
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        let messages = message_rows
            .into_iter()
            .map(
                |(message_id, role, content, status, cancellation_reason, created_at, updated_at)| {
                    MessageRow {
                        message_id,
                        thread_id,
                        role,
                        content,
                        status: status_from_str(&status),
                        cancellation_reason,
                        created_at: created_at.timestamp_millis(),
                        updated_at: updated_at.timestamp_millis(),
                    }
                },
            )
            .collect();

        Ok(ThreadHistory {
            thinking,
            tool_executions,
            messages,
        })
    }
}
