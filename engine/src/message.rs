//! Core conversation data types shared by the tool registry, the ReAct loop,
//! and the router.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single opaque tool invocation requested by the model in one assistant
/// turn. `id` is unique within that turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw arguments as reported by the provider (object or string-encoded).
    pub arguments: Value,
}

/// The result of executing one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    #[must_use]
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    #[must_use]
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// One tool call plus its result, as accumulated by the parallel executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub call: ToolCall,
    pub output: ToolOutput,
    pub duration: Duration,
    pub panicked: bool,
}

/// A message in the conversation history. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Set on tool-role messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on assistant-role messages that requested tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set on tool-role messages.
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
            is_error: false,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
            is_error: false,
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            is_error: false,
        }
    }

    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, output: &ToolOutput) -> Self {
        Self {
            role: Role::Tool,
            content: output.content.clone(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
            is_error: output.is_error,
        }
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// Cumulative, additive token usage. `total` is tracked independently of
/// `prompt + completion` because providers may report a total that includes
/// cached or reasoning tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenUsage {
    #[must_use]
    pub const fn new(prompt: u64, completion: u64, total: u64) -> Self {
        Self {
            prompt,
            completion,
            total,
        }
    }

    pub fn add(&mut self, other: Self) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
    }
}

impl std::ops::Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            prompt: self.prompt + rhs.prompt,
            completion: self.completion + rhs.completion,
            total: self.total + rhs.total,
        }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.add(rhs);
    }
}

/// Why a `Run` terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Complete,
    MaxIterations,
    LoopDetected,
    TokenBudget,
    Timeout,
    Error,
}

/// Guardrail configuration for one run of the ReAct loop. Zero fields fall
/// back to their defaults at construction (see [`LoopConfig::new`]).
#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub max_iterations: usize,
    /// 0 means unlimited.
    pub token_budget: u64,
    pub timeout: Duration,
    pub repetition_threshold: usize,
}

impl LoopConfig {
    pub const DEFAULT_MAX_ITERATIONS: usize = 10;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
    pub const DEFAULT_REPETITION_THRESHOLD: usize = 3;

    /// Normalizes zero-valued fields to their defaults.
    #[must_use]
    pub fn new(
        max_iterations: usize,
        token_budget: u64,
        timeout: Duration,
        repetition_threshold: usize,
    ) -> Self {
        Self {
            max_iterations: if max_iterations == 0 {
                Self::DEFAULT_MAX_ITERATIONS
            } else {
                max_iterations
            },
            token_budget,
            timeout: if timeout.is_zero() {
                Self::DEFAULT_TIMEOUT
            } else {
                timeout
            },
            repetition_threshold: if repetition_threshold == 0 {
                Self::DEFAULT_REPETITION_THRESHOLD
            } else {
                repetition_threshold
            },
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::new(0, 0, Duration::ZERO, 0)
    }
}

/// Input to one `Run`/`RunStream` call.
#[derive(Debug, Clone)]
pub struct Request {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tools: Vec<crate::tool::ToolDefinition>,
    pub config: LoopConfig,
}

/// Terminal output of one `Run` call.
#[derive(Debug, Clone)]
pub struct Response {
    pub content: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: TokenUsage,
    pub iterations: usize,
    pub stop_reason: StopReason,
    /// Set alongside any `stop_reason` other than `complete`.
    pub error: Option<String>,
}

/// One event emitted on the streaming channel.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Text(String),
    ToolStart(ToolCallRecord),
    ToolEnd(ToolCallRecord),
    Usage(TokenUsage),
    Done(Response),
    Error(String),
}
