//! Audit event types and the redaction seam consumed when serializing them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// One produced audit record. Types mirror the external interface contract:
/// message, tool_call, tool_result, approval, auth_success, auth_failure,
/// config_change, session_create, session_delete, rate_limit.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    Message { session_key: String, content: String },
    ToolCall { name: String, args: String },
    ToolResult { name: String, content: String, is_error: bool },
    Approval { tool_name: String, approved: bool, reason: String },
    AuthSuccess { principal: String },
    AuthFailure { principal: String, reason: String },
    ConfigChange { summary: String },
    SessionCreate { session_key: String },
    SessionDelete { session_key: String },
    RateLimit { kind: String },
}

impl AuditEvent {
    /// Passes every free-text field through `redactor`. Structural fields
    /// (names, kinds, flags, session keys) are left as-is; only the values
    /// that can carry user- or model-authored text are redacted.
    #[must_use]
    pub fn redact(self, redactor: &dyn Redactor) -> Self {
        match self {
            Self::Message { session_key, content } => Self::Message {
                session_key,
                content: redactor.redact(&content),
            },
            Self::ToolCall { name, args } => Self::ToolCall {
                name,
                args: redactor.redact(&args),
            },
            Self::ToolResult { name, content, is_error } => Self::ToolResult {
                name,
                content: redactor.redact(&content),
                is_error,
            },
            Self::Approval { tool_name, approved, reason } => Self::Approval {
                tool_name,
                approved,
                reason: redactor.redact(&reason),
            },
            Self::AuthSuccess { .. } | Self::SessionCreate { .. } | Self::SessionDelete { .. } | Self::RateLimit { .. } => {
                self
            }
            Self::AuthFailure { principal, reason } => Self::AuthFailure {
                principal,
                reason: redactor.redact(&reason),
            },
            Self::ConfigChange { summary } => Self::ConfigChange {
                summary: redactor.redact(&summary),
            },
        }
    }
}

/// A UTC-timestamped, redacted, serialized audit record: one JSON object
/// per line.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditRecord {
    /// Stamps `event` with the current time after running it through
    /// `redactor`. This is the only path that should reach a real
    /// [`AuditSink`]: callers never construct a record from an
    /// un-redacted event directly.
    #[must_use]
    pub fn new(event: AuditEvent, redactor: &dyn Redactor) -> Self {
        Self {
            timestamp: Utc::now(),
            event: event.redact(redactor),
        }
    }
}

/// Consumed sink for produced audit records. A no-op or a line-appending
/// file sink are the only concrete implementations the engine ships
/// (see [`crate::mock`]); anything durable is out of scope.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Passes string fields through a redactor before serialization. The
/// concrete credential-aware implementation is out of scope; the engine
/// only guarantees the seam and a no-op default.
pub trait Redactor: Send + Sync {
    fn redact(&self, value: &str) -> String;
}

/// Default redactor: identity function. Idempotent trivially.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRedactor;

impl Redactor for NoopRedactor {
    fn redact(&self, value: &str) -> String {
        value.to_string()
    }
}

/// Masks anything that looks like `key=value` or `key: value` secrets.
/// Grounded in the same "pluggable sink at a well-defined seam" shape as
/// the rest of the audit pipeline; a real implementation would plug in
/// here without changing callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskingRedactor;

impl Redactor for MaskingRedactor {
    fn redact(&self, value: &str) -> String {
        const NEEDLES: [&str; 3] = ["password", "token", "secret"];
        let lower = value.to_lowercase();
        if NEEDLES.iter().any(|n| lower.contains(n)) {
            "[redacted]".to_string()
        } else {
            value.to_string()
        }
    }
}

/// Truncates `content` to at most `max_bytes` bytes at a valid UTF-8
/// boundary (arguments truncated to at most 4096 bytes).
#[must_use]
pub fn truncate_utf8(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    content[..end].to_string()
}

/// Truncates a JSON value's string form, same boundary rule.
#[must_use]
pub fn truncate_json(value: &Value, max_bytes: usize) -> String {
    truncate_utf8(&value.to_string(), max_bytes)
}
