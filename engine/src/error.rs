//! Error types for the engine.

use thiserror::Error;

/// Top-level error type for all engine-observable failures.
///
/// Tool-level failures are deliberately absent from this enum: per the
/// propagation policy, a failing tool call never produces an `EngineError`,
/// it becomes an `is_error` tool message reinjected into the conversation.
#[derive(Debug, Error)]
pub enum EngineError {
    // --- Validation ---
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("json nesting too deep: {depth} (max {max})")]
    JsonTooDeep { depth: usize, max: usize },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid cron schedule: {0}")]
    InvalidSchedule(String),
    #[error("duplicate cron job: {0}")]
    DuplicateJob(String),

    // --- Policy ---
    #[error("denied")]
    Denied,
    #[error("approval timed out")]
    ApprovalTimeout,
    #[error("no approver configured")]
    NoApprover,

    // --- Rate limit ---
    #[error("rate limited: {0}")]
    RateLimited(RateLimitKind),

    // --- Loop termination ---
    #[error("token budget exceeded")]
    TokenBudgetExceeded,
    #[error("max iterations reached")]
    MaxIterationsReached,
    #[error("loop detected")]
    LoopDetected,

    // --- Lookup ---
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("agent not found: {0}")]
    AgentNotFound(String),
    #[error("no matching agent")]
    NoMatchingAgent,
    #[error("sub-agent not found: {0}")]
    SubAgentNotFound(String),

    // --- Lifecycle ---
    #[error("sub-agent not running")]
    NotRunning,
    #[error("already finished")]
    AlreadyFinished,
    #[error("max concurrent sub-agents reached")]
    MaxConcurrent,
    #[error("recursive sub-agent spawn rejected")]
    RecursiveSpawn,
    #[error("cross-session sub-agent spawn rejected")]
    CrossSession,
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    // --- Registration ---
    #[error("duplicate tool: {0}")]
    DuplicateTool(String),
    #[error("tool name must not be empty")]
    EmptyToolName,
    #[error("tool must declare at least one scope")]
    NoScopes,
    #[error("more than one default agent configured")]
    DuplicateDefault,
    #[error("tool {0} appears in conflicting allow/ask/deny lists")]
    ToolInConflictingLists(String),

    // --- Transport / Provider / IO, propagated transparently ---
    #[error("provider error: {0}")]
    Provider(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // --- Cancellation always wins and propagates unwrapped ---
    #[error("cancelled")]
    Cancelled,
    #[error("timed out")]
    Timeout,
}

/// Rate-limited resource kinds: message, tool-call, tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKind {
    Message,
    ToolCall,
    Tokens,
}

impl std::fmt::Display for RateLimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message => write!(f, "message"),
            Self::ToolCall => write!(f, "tool-call"),
            Self::Tokens => write!(f, "tokens"),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
