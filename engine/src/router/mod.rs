//! Per-message pipeline: validate, rate-limit, resolve a session and an
//! agent, run the ReAct loop, dispatch the reply, persist, and audit.

pub mod resolve;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::audit::{AuditEvent, AuditRecord, AuditSink, NoopRedactor, Redactor};
use crate::channel::{ChannelTransport, ChatKind, InboundMessage};
use crate::error::{EngineError, Result};
use crate::executor::ParallelToolExecutor;
use crate::message::{Message, Request};
use crate::policy::PolicyContext;
use crate::provider::Provider;
use crate::ratelimit::RateLimiter;
use crate::react::{loop_::Runner, Cancellation};

use resolve::{AgentConfig, AgentFactory};
use session::{SessionKey, SessionStore};

/// Validation limits applied before any other work happens.
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    pub max_message_bytes: usize,
    pub max_json_depth: usize,
    pub history_window: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 32 * 1024,
            max_json_depth: 32,
            history_window: 50,
        }
    }
}

/// Nesting depth of a JSON value: a scalar is depth 0, each array/object
/// level adds one. An empty array or object counts as depth 1.
fn json_depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        Value::Object(fields) => 1 + fields.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// If `text` parses as JSON, returns its nesting depth. Plain-text message
/// bodies (the common case) are not JSON and trivially pass.
fn json_depth_of_message(text: &str) -> Option<usize> {
    serde_json::from_str::<Value>(text).ok().as_ref().map(json_depth)
}

fn policy_context(kind: ChatKind) -> PolicyContext {
    match kind {
        ChatKind::Dm => PolicyContext::Dm,
        ChatKind::Group => PolicyContext::Group,
    }
}

/// Owns sessions, the agent factory, and the per-channel transports used to
/// dispatch replies. One instance serves every configured channel.
pub struct Router {
    config: RouterConfig,
    sessions: SessionStore,
    factory: AgentFactory,
    providers: HashMap<String, Arc<dyn Provider>>,
    transports: HashMap<String, Arc<dyn ChannelTransport>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    audit: Option<Arc<dyn AuditSink>>,
    redactor: Option<Arc<dyn Redactor>>,
}

impl Router {
    #[must_use]
    pub fn new(
        config: RouterConfig,
        factory: AgentFactory,
        providers: HashMap<String, Arc<dyn Provider>>,
        transports: HashMap<String, Arc<dyn ChannelTransport>>,
    ) -> Self {
        Self {
            config,
            sessions: SessionStore::new(),
            factory,
            providers,
            transports,
            rate_limiter: None,
            audit: None,
            redactor: None,
        }
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    #[must_use]
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    #[must_use]
    pub fn with_redactor(mut self, redactor: Arc<dyn Redactor>) -> Self {
        self.redactor = Some(redactor);
        self
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    async fn audit(&self, event: AuditEvent) {
        if let Some(sink) = &self.audit {
            let redactor: &dyn Redactor = self.redactor.as_deref().unwrap_or(&NoopRedactor);
            sink.record(AuditRecord::new(event, redactor)).await;
        }
    }

    /// Runs the full pipeline for one inbound message. Failures
    /// that precede dispatch (validation, rate limit, resolution) are
    /// returned to the caller rather than silently dropped; the caller
    /// decides whether to surface them to the user.
    #[tracing::instrument(skip(self, message), fields(channel = %message.channel_id, chat = %message.chat_id))]
    pub async fn handle_inbound(&self, message: InboundMessage) -> Result<()> {
        {
            if message.text.len() > self.config.max_message_bytes {
                return Err(EngineError::MessageTooLarge {
                    size: message.text.len(),
                    max: self.config.max_message_bytes,
                });
            }

            if let Some(depth) = json_depth_of_message(&message.text)
                && depth > self.config.max_json_depth
            {
                return Err(EngineError::JsonTooDeep {
                    depth,
                    max: self.config.max_json_depth,
                });
            }

            if let Some(limiter) = &self.rate_limiter
                && !limiter.consume(&message.sender_id)
            {
                self.audit(AuditEvent::RateLimit {
                    kind: "message".to_string(),
                })
                .await;
                return Err(EngineError::RateLimited(crate::error::RateLimitKind::Message));
            }

            let key = SessionKey::new(
                message.channel_id.clone(),
                message.chat_id.clone(),
                message.thread_id.clone().unwrap_or_default(),
            );
            let now = chrono::Utc::now();
            let session = self.sessions.get_or_create(key.clone(), now).await;
            session.touch(now).await;
            let _serialize = session.processing.lock().await;

            let agent = self.resolve_agent(&message, &session).await?;

            let tool_registry = self.factory.tool_registry_for(agent).await?;
            let provider = self
                .providers
                .get(&agent.provider_id)
                .cloned()
                .ok_or_else(|| EngineError::AgentNotFound(agent.provider_id.clone()))?;
            let history = self.factory.history_store_for(agent).await;
            let system_prompt = self.factory.system_prompt_for(agent).await;

            let mut messages = Vec::new();
            if let Some(store) = &history {
                if let Ok(rows) = store.load_recent(&key, self.config.history_window).await {
                    messages.extend(rows.into_iter().map(|row| row.message));
                }
            }
            let user_message = Message::user(message.text.clone());
            messages.push(user_message.clone());

            self.audit(AuditEvent::Message {
                session_key: format!("{}/{}/{}", key.channel_id, key.chat_id, key.thread_id),
                content: message.text.clone(),
            })
            .await;

            let executor = ParallelToolExecutor::new(
                tool_registry.clone(),
                policy_context(message.chat_kind),
                Value::Null,
            );
            let request = Request {
                messages,
                system_prompt: system_prompt.map(|s| s.to_string()),
                tools: tool_registry.schemas().await,
                config: agent.loop_overrides.unwrap_or_default(),
            };

            let response = Runner::run(provider, &executor, request, Cancellation::new()).await;

            if let Some(store) = &history {
                let _ = store.append(&key, user_message).await;
                let _ = store
                    .append(&key, Message::assistant(response.content.clone(), vec![]))
                    .await;
            }

            if let Some(transport) = self.transports.get(&message.channel_id) {
                let _ = transport.send(&message.chat_id, &response.content).await;
            }

            Ok(())
        }
    }

    async fn resolve_agent<'a>(
        &'a self,
        message: &InboundMessage,
        session: &session::Session,
    ) -> Result<&'a AgentConfig> {
        let existing = session.agent_id.read().await.clone();
        match existing {
            Some(id) => self
                .factory
                .registry()
                .get(&id)
                .ok_or_else(|| EngineError::AgentNotFound(id.clone())),
            None => {
                let resolved = self.factory.resolve(message)?;
                session.set_agent_once(resolved.id.clone()).await;
                Ok(resolved)
            }
        }
    }

    /// Prunes sessions idle past `max_idle`. Invoked by the cron session
    /// cleanup job.
    pub async fn prune_idle_sessions(&self, max_idle: std::time::Duration) -> usize {
        self.sessions.prune(max_idle, chrono::Utc::now()).await
    }
}
