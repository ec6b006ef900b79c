//! In-memory test doubles for every consumed interface. Used by the
//! integration tests and the demo binary; never by the library itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::audit::{AuditRecord, AuditSink};
use crate::channel::{ChannelTransport, InboundMessage};
use crate::error::Result as EngineResult;
use crate::message::{Message, TokenUsage};
use crate::policy::approval::{ApprovalRequest, ApprovalRequester, ApprovalResponse};
use crate::provider::{Completion, CompletionChunk, FinishReason, Provider};
use crate::router::session::SessionKey;
use crate::store::{Fact, HistoryRow, HistoryStore, MemoryStore};
use crate::tool::ToolDefinition;

/// Always completes with a fixed canned response; ignores the conversation.
/// Useful as a placeholder before a real provider is wired up.
pub struct EchoProvider {
    pub model: String,
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self {
            model: "mock-echo".to_string(),
        }
    }
}

#[async_trait]
impl Provider for EchoProvider {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<Completion, String> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(Completion {
            content: format!("echo: {last}"),
            tool_calls: vec![],
            usage: TokenUsage::new(1, 1, 2),
            finish_reason: FinishReason::Stop,
        })
    }

    async fn stream(&self, messages: &[Message], _tools: &[ToolDefinition]) -> mpsc::Receiver<CompletionChunk> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let (tx, rx) = mpsc::channel(4);
        let text = format!("echo: {last}");
        tokio::spawn(async move {
            let _ = tx
                .send(CompletionChunk {
                    text_delta: Some(text),
                    usage: Some(TokenUsage::new(1, 1, 2)),
                    finish_reason: Some(FinishReason::Stop),
                    ..Default::default()
                })
                .await;
        });
        rx
    }

    fn context_window_size(&self) -> usize {
        8192
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Records every sent reply in memory; never talks to a real chat network.
#[derive(Default)]
pub struct InMemoryTransport {
    pub sent: Mutex<Vec<(String, String)>>,
    inbox: Mutex<Option<Box<dyn Fn(InboundMessage) + Send + Sync>>>,
}

#[async_trait]
impl ChannelTransport for InMemoryTransport {
    fn set_inbox(&self, submit: Box<dyn Fn(InboundMessage) + Send + Sync>) {
        *self.inbox.try_lock().expect("inbox set before start") = Some(submit);
    }

    async fn send(&self, chat_id: &str, reply: &str) -> Result<(), String> {
        self.sent.lock().await.push((chat_id.to_string(), reply.to_string()));
        Ok(())
    }

    async fn start(&self) -> Result<(), String> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), String> {
        Ok(())
    }
}

impl InMemoryTransport {
    /// Feeds a message to whatever inbox callback the router registered.
    pub async fn inject(&self, message: InboundMessage) {
        if let Some(submit) = &*self.inbox.lock().await {
            submit(message);
        }
    }
}

/// Append-only, process-lifetime history store. No persistence across
/// restarts; real backends are out of scope.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    rows: Mutex<HashMap<SessionKey, Vec<HistoryRow>>>,
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, session: &SessionKey, message: Message) -> Result<(), String> {
        let mut rows = self.rows.lock().await;
        let entries = rows.entry(session.clone()).or_default();
        let seq = entries.len() as u64;
        entries.push(HistoryRow {
            session: session.clone(),
            seq,
            message,
            created_at: chrono::Utc::now(),
        });
        Ok(())
    }

    async fn load_recent(&self, session: &SessionKey, limit: usize) -> Result<Vec<HistoryRow>, String> {
        let rows = self.rows.lock().await;
        let entries = rows.get(session).cloned().unwrap_or_default();
        let start = entries.len().saturating_sub(limit);
        Ok(entries[start..].to_vec())
    }

    async fn range(&self, visit: &mut dyn FnMut(&HistoryRow)) -> Result<(), String> {
        let rows = self.rows.lock().await;
        for entries in rows.values() {
            for row in entries {
                visit(row);
            }
        }
        Ok(())
    }
}

/// Linear substring-match memory store. A real implementation would use
/// embeddings; out of scope here.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    facts: Mutex<Vec<Fact>>,
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn index(&self, fact: Fact) -> Result<(), String> {
        self.facts.lock().await.push(fact);
        Ok(())
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Fact>, String> {
        let query = query.to_lowercase();
        let facts = self.facts.lock().await;
        Ok(facts
            .iter()
            .filter(|f| f.content.to_lowercase().contains(&query))
            .take(top_k)
            .cloned()
            .collect())
    }
}

/// Collects every emitted, already-redacted and timestamped record in
/// memory; useful for asserting on audit output in tests.
#[derive(Default)]
pub struct InMemoryAuditSink {
    pub events: Mutex<Vec<AuditRecord>>,
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: AuditRecord) {
        self.events.lock().await.push(record);
    }
}

/// Always approves (or always denies, per construction) without ever
/// blocking on real user input.
pub struct ScriptedApprover {
    pub approve: bool,
    pub reason: String,
}

impl ScriptedApprover {
    #[must_use]
    pub fn always_approve() -> Self {
        Self {
            approve: true,
            reason: "scripted approval".to_string(),
        }
    }

    #[must_use]
    pub fn always_deny() -> Self {
        Self {
            approve: false,
            reason: "scripted denial".to_string(),
        }
    }
}

#[async_trait]
impl ApprovalRequester for ScriptedApprover {
    async fn request_approval(&self, _request: ApprovalRequest) -> EngineResult<ApprovalResponse> {
        Ok(ApprovalResponse {
            approved: self.approve,
            reason: self.reason.clone(),
        })
    }
}
