//! Streaming model calls for `agenticTask` (§4.3.1). Deltas arrive as plain
//! text tokens; the executor feeds them through the sentence segmenter.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};

use crate::error::AdapterError;

#[derive(Debug, Clone)]
pub struct LlmStreamDelta {
    pub token: String,
}

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Start a streaming completion. The returned stream yields one delta
    /// per token/chunk and ends when the model is done.
    async fn stream_completion(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<BoxStream<'static, LlmStreamDelta>, AdapterError>;

    /// A self-reported confidence for the last completion, consulted by the
    /// retry policy in §4.3.1 step 5. Mock always returns 1.0.
    fn last_confidence(&self) -> f64 {
        1.0
    }
}

/// Deterministic canned-response adapter: splits a fixed reply into
/// word-sized deltas so the segmenter has real boundaries to find.
pub struct MockLlmAdapter {
    reply: String,
}

impl Default for MockLlmAdapter {
    fn default() -> Self {
        Self::new("Understood. The request has been processed. Thank you for waiting.")
    }
}

impl MockLlmAdapter {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

#[async_trait]
impl LlmAdapter for MockLlmAdapter {
    async fn stream_completion(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<BoxStream<'static, LlmStreamDelta>, AdapterError> {
        let tokens: Vec<LlmStreamDelta> = self
            .reply
            .split_inclusive(' ')
            .map(|t| LlmStreamDelta { token: t.to_string() })
            .collect();
        Ok(Box::pin(stream::iter(tokens)))
    }
}
