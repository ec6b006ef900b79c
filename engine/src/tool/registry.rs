//! Name-indexed tool collection orchestrating policy resolution, rate
//! limiting, the approval flow, execution, and audit emission for a single
//! call.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::audit::{truncate_json, AuditEvent, AuditRecord, AuditSink, NoopRedactor, Redactor};
use crate::error::{EngineError, Result};
use crate::message::{ToolCall, ToolOutput};
use crate::policy::approval::{ApprovalRequest, ApprovalRequester, PendingApproval};
use crate::policy::elevated::ElevatedState;
use crate::policy::{ApprovalLevel, PolicyConfig, PolicyContext};
use crate::ratelimit::RateLimiter;
use crate::tool::{Tool, ToolDefinition};

const AUDIT_TRUNCATE_BYTES: usize = 4096;

/// Configuration for one [`ToolRegistry`] instance. Built once by the agent
/// factory per agent and shared by every call through that
/// registry.
#[derive(Default)]
pub struct RegistryConfig {
    pub policy: PolicyConfig,
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub audit: Option<Arc<dyn AuditSink>>,
    pub redactor: Option<Arc<dyn Redactor>>,
    pub approver: Option<Arc<dyn ApprovalRequester>>,
    pub approval_timeout: Duration,
}

/// Safe for concurrent `get`/`execute`; `register` serializes with a writer
/// lock.
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
    elevated: ElevatedState,
    approval: PendingApproval,
    config: RegistryConfig,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            elevated: ElevatedState::new(),
            approval: PendingApproval::new(),
            config,
        }
    }

    #[must_use]
    pub fn elevated(&self) -> &ElevatedState {
        &self.elevated
    }

    /// Requires a non-empty (trimmed) name and at least one declared scope;
    /// fails with `duplicate-tool` if the name is already registered.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().trim().to_string();
        if name.is_empty() {
            return Err(EngineError::EmptyToolName);
        }
        if tool.scopes().is_empty() {
            return Err(EngineError::NoScopes);
        }
        let tools = self.tools.get_mut();
        if tools.contains_key(&name) {
            return Err(EngineError::DuplicateTool(name));
        }
        tools.insert(name, tool);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))
    }

    /// Deterministic (sorted by name) since `tools` is a `BTreeMap`.
    pub async fn names(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    pub async fn schemas(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .await
            .values()
            .map(|t| t.definition())
            .collect()
    }

    async fn audit(&self, event: AuditEvent) {
        if let Some(sink) = &self.config.audit {
            let redactor: &dyn Redactor = self.config.redactor.as_deref().unwrap_or(&NoopRedactor);
            sink.record(AuditRecord::new(event, redactor)).await;
        }
    }

    /// Runs the full `execute` algorithm for one call. Never
    /// returns an `Err`: every failure mode becomes an `is_error` output so
    /// the model can observe and adapt.
    pub async fn execute(&self, context: PolicyContext, call: &ToolCall, env: &Value) -> ToolOutput {
        let tool = match self.get(&call.name).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::error(e.to_string()),
        };

        if let Some(limiter) = &self.config.rate_limiter
            && !limiter.consume(&call.name)
        {
            self.audit(AuditEvent::RateLimit {
                kind: "tool_call".to_string(),
            })
            .await;
            return ToolOutput::error(EngineError::RateLimited(crate::error::RateLimitKind::ToolCall).to_string());
        }

        self.audit(AuditEvent::ToolCall {
            name: call.name.clone(),
            args: truncate_json(&call.arguments, AUDIT_TRUNCATE_BYTES),
        })
        .await;

        let level = self.config.policy.resolve(context, &call.name, tool.default_policy());
        let level = self.elevated.apply(level).await;

        let output = match level {
            ApprovalLevel::Deny => ToolOutput::error(EngineError::Denied.to_string()),
            ApprovalLevel::Allow => self.dispatch(&tool, call, env).await,
            ApprovalLevel::Ask => {
                let Some(approver) = self.config.approver.clone() else {
                    return self.finish(&call.name, ToolOutput::error(EngineError::NoApprover.to_string()))
                        .await;
                };
                let request = ApprovalRequest {
                    tool_name: call.name.clone(),
                    args: call.arguments.clone(),
                };
                let (response, err) = self
                    .approval
                    .begin(approver, request, self.config.approval_timeout)
                    .await;
                self.audit(AuditEvent::Approval {
                    tool_name: call.name.clone(),
                    approved: response.approved,
                    reason: response.reason.clone(),
                })
                .await;
                match err {
                    Some(e @ EngineError::ApprovalTimeout) => ToolOutput::error(e.to_string()),
                    Some(_) | None if !response.approved => {
                        ToolOutput::error(EngineError::Denied.to_string())
                    }
                    _ => self.dispatch(&tool, call, env).await,
                }
            }
        };

        self.finish(&call.name, output).await
    }

    async fn dispatch(&self, tool: &Arc<dyn Tool>, call: &ToolCall, env: &Value) -> ToolOutput {
        match tool.execute(call.arguments.clone(), env).await {
            Ok(content) => ToolOutput::ok(content),
            Err(message) => ToolOutput::error(message),
        }
    }

    async fn finish(&self, name: &str, output: ToolOutput) -> ToolOutput {
        self.audit(AuditEvent::ToolResult {
            name: name.to_string(),
            content: truncate_json(&Value::String(output.content.clone()), AUDIT_TRUNCATE_BYTES),
            is_error: output.is_error,
        })
        .await;
        output
    }
}
