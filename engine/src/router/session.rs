//! Session identity and the session store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

/// Identity tuple under which conversation state accumulates. `thread_id`
/// is empty when a transport has no threads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub channel_id: String,
    pub chat_id: String,
    pub thread_id: String,
}

impl SessionKey {
    #[must_use]
    pub fn new(channel_id: impl Into<String>, chat_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            chat_id: chat_id.into(),
            thread_id: thread_id.into(),
        }
    }
}

/// One conversation's durable-for-the-process state. `agent_id` is set
/// exactly once per session lifetime; subsequent messages route to the same
/// agent regardless of updated routing rules until the session is pruned.
pub struct Session {
    pub key: SessionKey,
    pub agent_id: RwLock<Option<String>>,
    pub created_at: DateTime<Utc>,
    last_seen: RwLock<DateTime<Utc>>,
    /// Serializes processing of one session so ordering invariants hold;
    /// distinct sessions still run in parallel.
    pub processing: Mutex<()>,
}

impl Session {
    fn new(key: SessionKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            agent_id: RwLock::new(None),
            created_at: now,
            last_seen: RwLock::new(now),
            processing: Mutex::new(()),
        }
    }

    pub async fn touch(&self, now: DateTime<Utc>) {
        *self.last_seen.write().await = now;
    }

    pub async fn last_seen(&self) -> DateTime<Utc> {
        *self.last_seen.read().await
    }

    /// Sets `agent_id` only if it is currently unset; sticky thereafter.
    pub async fn set_agent_once(&self, agent_id: String) {
        let mut slot = self.agent_id.write().await;
        if slot.is_none() {
            *slot = Some(agent_id);
        }
    }
}

/// Map mutation behind a writer lock; reads behind a reader lock.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, std::sync::Arc<Session>>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(&self, key: SessionKey, now: DateTime<Utc>) -> std::sync::Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(&key) {
            return session.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(key.clone())
            .or_insert_with(|| std::sync::Arc::new(Session::new(key, now)))
            .clone()
    }

    /// Iterates over every session, e.g. for the cron scheduler's jobs.
    pub async fn range<F: FnMut(&SessionKey, &std::sync::Arc<Session>)>(&self, mut visit: F) {
        for (key, session) in self.sessions.read().await.iter() {
            visit(key, session);
        }
    }

    /// Removes sessions whose `last_seen + max_idle < now`; returns the
    /// count removed.
    pub async fn prune(&self, max_idle: std::time::Duration, now: DateTime<Utc>) -> usize {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::zero());
        let mut sessions = self.sessions.write().await;
        let mut stale = Vec::new();
        for (key, session) in sessions.iter() {
            if session.last_seen().await + max_idle < now {
                stale.push(key.clone());
            }
        }
        for key in &stale {
            sessions.remove(key);
        }
        stale.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: &str) -> SessionKey {
        SessionKey::new("tg", n, "")
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = SessionStore::new();
        let now = Utc::now();
        let a = store.get_or_create(key("1"), now).await;
        let b = store.get_or_create(key("1"), now).await;
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn agent_id_is_sticky() {
        let store = SessionStore::new();
        let now = Utc::now();
        let session = store.get_or_create(key("1"), now).await;
        session.set_agent_once("agent-a".to_string()).await;
        session.set_agent_once("agent-b".to_string()).await;
        assert_eq!(session.agent_id.read().await.as_deref(), Some("agent-a"));
    }

    #[tokio::test]
    async fn prune_removes_exactly_the_idle_sessions() {
        let store = SessionStore::new();
        let now = Utc::now();
        let fresh = store.get_or_create(key("fresh"), now).await;
        fresh.touch(now).await;
        let stale = store.get_or_create(key("stale"), now - chrono::Duration::hours(1)).await;
        stale.touch(now - chrono::Duration::hours(1)).await;

        let removed = store.prune(std::time::Duration::from_secs(60), now).await;
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 1);
    }
}
