//! History and memory store interfaces consumed by the router and the
//! cron scheduler's memory jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::message::Message;
use crate::router::session::SessionKey;

/// One row persisted by a [`HistoryStore`]. Composite primary key is
/// `(session, seq)`.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub session: SessionKey,
    pub seq: u64,
    pub message: Message,
    pub created_at: DateTime<Utc>,
}

/// Consumed: persistent conversation history. SQLite schemas and full-text
/// indexes are out of scope; only this interface is core.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, session: &SessionKey, message: Message) -> Result<(), String>;
    async fn load_recent(&self, session: &SessionKey, limit: usize) -> Result<Vec<HistoryRow>, String>;
    async fn range(&self, visit: &mut dyn FnMut(&HistoryRow)) -> Result<(), String>;
}

/// A short persisted piece of knowledge extracted from a user-assistant
/// exchange, searchable by text query.
#[derive(Debug, Clone)]
pub struct Fact {
    pub id: String,
    pub content: String,
    pub tags: Vec<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Consumed: a black-box search+fact-extractor memory backend. Embedding
/// and retrieval internals are out of scope.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn index(&self, fact: Fact) -> Result<(), String>;
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Fact>, String>;
}

/// Consumed: turns a closed (user, assistant) exchange into zero or more
/// facts. The extraction algorithm itself is out of scope.
#[async_trait]
pub trait FactExtractor: Send + Sync {
    async fn extract(&self, user_message: &str, assistant_message: &str) -> Vec<Fact>;
}
