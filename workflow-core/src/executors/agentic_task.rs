use async_trait::async_trait;
use futures::StreamExt;
use uuid::Uuid;

use super::{Executor, ExecutionContext};
use crate::error::ExecutionError;
use crate::events::{task_cancelled, task_cancelling, task_thinking, tool_end, tool_start};
use crate::segmenter::SentenceSegmenter;
use crate::types::Value;

/// Orchestrates a typed inference with optional tool calls (§4.3.1).
pub struct AgenticTaskExecutor;

#[async_trait]
impl Executor for AgenticTaskExecutor {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let node_id = ctx.node.id.clone();
        let cancel_token = ctx.hub.mark_cancellable(&node_id);
        ctx.emit(task_thinking(&node_id, "starting")).await;

        let result = self.run_with_retries(ctx, &cancel_token).await;
        ctx.hub.clear_cancellable(&node_id);
        result
    }
}

impl AgenticTaskExecutor {
    async fn run_with_retries(
        &self,
        ctx: &mut ExecutionContext<'_>,
        cancel_token: &tokio_util::sync::CancellationToken,
    ) -> Result<(), ExecutionError> {
        let max_retries = ctx.node.prop_u64("maxRetries").unwrap_or(0);
        let confidence_threshold = ctx.node.prop_f64("confidenceThreshold", 0.0);

        self.invoke_tools(ctx, cancel_token).await?;

        let mut attempt = 0;
        loop {
            let outcome = self.stream_completion(ctx, cancel_token).await?;
            if let AgenticOutcome::Cancelled = outcome {
                return Err(ExecutionError::Cancelled(ctx.node.id.clone()));
            }
            let confidence = ctx.adapters.llm.last_confidence();
            if confidence >= confidence_threshold || attempt >= max_retries {
                return Ok(());
            }
            attempt += 1;
        }
    }

    async fn invoke_tools(
        &self,
        ctx: &mut ExecutionContext<'_>,
        cancel_token: &tokio_util::sync::CancellationToken,
    ) -> Result<(), ExecutionError> {
        let Some(serde_json::Value::Array(tools)) = ctx.node.properties.get("tools").cloned()
        else {
            return Ok(());
        };

        for tool in tools {
            if cancel_token.is_cancelled() || ctx.cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled(ctx.node.id.clone()));
            }
            let Some(tool_name) = tool.as_str() else { continue };
            let args = serde_json::json!({});
            ctx.emit(tool_start(&ctx.node.id, tool_name, &args)).await;
            let result = ctx
                .adapters
                .tool
                .invoke(tool_name, args)
                .await
                .map_err(|e| ExecutionError::ToolFailure(tool_name.to_string(), e.to_string()))?;
            ctx.emit(tool_end(&ctx.node.id, tool_name, &result)).await;
        }
        Ok(())
    }

    async fn stream_completion(
        &self,
        ctx: &mut ExecutionContext<'_>,
        cancel_token: &tokio_util::sync::CancellationToken,
    ) -> Result<AgenticOutcome, ExecutionError> {
        let system_prompt = ctx.node.prop_str("systemPrompt").unwrap_or("").to_string();
        let user_prompt = ctx.node.prop_str("prompt").unwrap_or("").to_string();

        let mut stream = ctx
            .adapters
            .llm
            .stream_completion(&system_prompt, &user_prompt)
            .await
            .map_err(|e| ExecutionError::Other(e.to_string()))?;

        let mut segmenter = SentenceSegmenter::new();
        let mut partial = String::new();
        let mut token_count = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    ctx.emit(task_cancelling(&ctx.node.id)).await;
                    ctx.emit(task_cancelled(&ctx.node.id, "user cancel request").with_partial(&partial, token_count)).await;
                    return Ok(AgenticOutcome::Cancelled);
                }
                _ = ctx.cancel.cancelled() => {
                    ctx.emit(task_cancelling(&ctx.node.id)).await;
                    ctx.emit(task_cancelled(&ctx.node.id, "boundary cancellation").with_partial(&partial, token_count)).await;
                    return Ok(AgenticOutcome::Cancelled);
                }
                delta = stream.next() => {
                    let Some(delta) = delta else { break };
                    token_count += 1;
                    partial.push_str(&delta.token);
                    for sentence in segmenter.push(&delta.token) {
                        self.emit_sentence(ctx, &sentence).await;
                    }
                }
            }
        }

        if let Some(tail) = segmenter.finish() {
            self.emit_sentence(ctx, &tail).await;
        }

        Ok(AgenticOutcome::Completed)
    }

    async fn emit_sentence(&self, ctx: &mut ExecutionContext<'_>, sentence: &str) {
        let message_id = Uuid::now_v7();
        ctx.emit(crate::events::text_message_chunk(&ctx.node.id, message_id, sentence))
            .await;
    }
}

enum AgenticOutcome {
    Completed,
    Cancelled,
}

trait WithPartial {
    fn with_partial(self, partial: &str, token_count: u64) -> Self;
}

impl WithPartial for crate::events::EventEnvelope {
    fn with_partial(self, partial: &str, token_count: u64) -> Self {
        self.with("partialResult", Value::String(partial.to_string()))
            .with("tokenCount", token_count)
    }
}
