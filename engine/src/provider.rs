//! The LLM provider interface consumed by the ReAct loop.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::message::{Message, TokenUsage, ToolCall};
use crate::tool::ToolDefinition;

/// Why a completion call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolUse,
    Length,
    Error,
}

/// One non-streaming completion result.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

/// One chunk of a streamed completion. `error` carries a message on
/// failure; the provider must close the channel when the stream ends, even
/// on error.
#[derive(Debug, Clone, Default)]
pub struct CompletionChunk {
    pub text_delta: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<FinishReason>,
    pub error: Option<String>,
}

/// Consumed: a large-language-model backend. Concrete HTTP clients (OpenAI,
/// Anthropic, Ollama, ...) are out of scope; only this interface is core.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Completion, String>;

    /// Streams a completion. The returned receiver is closed by the
    /// provider when the stream ends.
    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> mpsc::Receiver<CompletionChunk>;

    fn context_window_size(&self) -> usize;
    fn model_name(&self) -> &str;
}
