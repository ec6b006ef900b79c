//! Prelude module for convenient imports.
//!
//! ```rust
//! use engine::prelude::*;
//! ```

pub use crate::audit::{AuditEvent, AuditRecord, AuditSink, MaskingRedactor, NoopRedactor, Redactor};
pub use crate::channel::{ChannelTransport, ChatKind, InboundMessage};
pub use crate::config::{BotConfig, ConfigError, ConfigIssue, IssueLevel};
pub use crate::cron::{CompactionHook, CronScheduler, CronTask};
pub use crate::error::{EngineError, RateLimitKind, Result};
pub use crate::executor::ParallelToolExecutor;
pub use crate::guard::{LoopDetector, TokenTracker};
pub use crate::message::{LoopConfig, Message, Request, Response, Role, StopReason, TokenUsage};
pub use crate::policy::approval::{ApprovalRequest, ApprovalRequester, ApprovalResponse};
pub use crate::policy::{ApprovalLevel, ContextPolicy, PolicyConfig, PolicyContext};
pub use crate::provider::{Completion, CompletionChunk, FinishReason, Provider};
pub use crate::ratelimit::{RateLimiter, TokenBucketLimiter, Unlimited};
pub use crate::react::{Cancellation, Runner};
pub use crate::router::resolve::{AgentConfig, AgentFactory, AgentRegistry, RoutingPredicate};
pub use crate::router::session::{Session, SessionKey, SessionStore};
pub use crate::router::{Router, RouterConfig};
pub use crate::store::{Fact, FactExtractor, HistoryRow, HistoryStore, MemoryStore};
pub use crate::subagent::{SubAgentManager, SubAgentSnapshot, SubAgentStatus};
pub use crate::tool::registry::{RegistryConfig, ToolRegistry};
pub use crate::tool::{Scope, Tool, ToolDefinition};
