//! Spawns ephemeral ReAct loops with their own isolated history, enforces a
//! max-concurrent cap, and forbids recursive spawning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::executor::ParallelToolExecutor;
use crate::message::{LoopConfig, Message, Request, Response};
use crate::provider::Provider;
use crate::react::{Cancellation, Runner};

/// Terminal or in-flight state of one sub-agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAgentStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Killed,
}

/// A deep-copyable point-in-time view of one sub-agent, safe for external
/// reads while the driver task may still be mutating the live instance.
#[derive(Debug, Clone)]
pub struct SubAgentSnapshot {
    pub id: String,
    pub parent_session: String,
    pub status: SubAgentStatus,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub response: Option<Response>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct SubAgentState {
    parent_session: String,
    status: SubAgentStatus,
    system_prompt: String,
    messages: Vec<Message>,
    response: Option<Response>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    cancellation: Cancellation,
}

struct SubAgentHandle {
    state: Mutex<SubAgentState>,
}

impl SubAgentHandle {
    async fn snapshot(&self, id: &str) -> SubAgentSnapshot {
        let state = self.state.lock().await;
        SubAgentSnapshot {
            id: id.to_string(),
            parent_session: state.parent_session.clone(),
            status: state.status,
            system_prompt: state.system_prompt.clone(),
            messages: state.messages.clone(),
            response: state.response.clone(),
            error: state.error.clone(),
            created_at: state.created_at,
            finished_at: state.finished_at,
        }
    }
}

/// Configuration shared across every sub-agent spawned by one manager.
pub struct SubAgentManagerConfig {
    pub max_concurrent: usize,
    pub default_timeout: Duration,
    pub max_history: usize,
}

impl Default for SubAgentManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            default_timeout: Duration::from_secs(5 * 60),
            max_history: 200,
        }
    }
}

/// A single mutex protects the map and the active counter; each
/// [`SubAgentHandle`] has its own mutex for status/history mutation.
pub struct SubAgentManager {
    agents: Mutex<HashMap<String, Arc<SubAgentHandle>>>,
    active: AtomicUsize,
    config: SubAgentManagerConfig,
    provider: Arc<dyn Provider>,
    executor: ParallelToolExecutor,
}

impl SubAgentManager {
    #[must_use]
    pub fn new(
        config: SubAgentManagerConfig,
        provider: Arc<dyn Provider>,
        executor: ParallelToolExecutor,
    ) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            config,
            provider,
            executor,
        }
    }

    /// Spawns an ephemeral ReAct loop. Rejects recursion (`is_sub == true`)
    /// outright; a factory-level failure still returns a usable id with
    /// `status = failed` so the caller can introspect via [`Self::history`].
    pub async fn spawn(
        self: &Arc<Self>,
        parent_session: String,
        system_prompt: String,
        initial_message: String,
        timeout: Option<Duration>,
        is_sub: bool,
    ) -> Result<String> {
        if is_sub {
            return Err(EngineError::RecursiveSpawn);
        }

        let id = Uuid::new_v4().simple().to_string();
        let timeout = timeout.unwrap_or(self.config.default_timeout);

        {
            let mut agents = self.agents.lock().await;
            if self.active.load(Ordering::SeqCst) >= self.config.max_concurrent {
                return Err(EngineError::MaxConcurrent);
            }
            let handle = Arc::new(SubAgentHandle {
                state: Mutex::new(SubAgentState {
                    parent_session: parent_session.clone(),
                    status: SubAgentStatus::Running,
                    system_prompt: system_prompt.clone(),
                    messages: vec![Message::user(initial_message.clone())],
                    response: None,
                    error: None,
                    created_at: Utc::now(),
                    finished_at: None,
                    cancellation: Cancellation::new(),
                }),
            });
            agents.insert(id.clone(), handle);
            self.active.fetch_add(1, Ordering::SeqCst);
        }

        self.drive(id.clone(), system_prompt, initial_message, timeout).await;
        Ok(id)
    }

    async fn drive(self: &Arc<Self>, id: String, system_prompt: String, initial_message: String, timeout: Duration) {
        let manager = self.clone();
        let handle = {
            let agents = self.agents.lock().await;
            agents.get(&id).cloned()
        };
        let Some(handle) = handle else { return };

        let cancellation = handle.state.lock().await.cancellation.clone();
        let provider = self.provider.clone();
        let executor = self.executor.clone();

        tokio::spawn(async move {
            let request = Request {
                messages: vec![Message::user(initial_message)],
                system_prompt: Some(system_prompt),
                tools: vec![],
                config: LoopConfig::new(LoopConfig::DEFAULT_MAX_ITERATIONS, 0, timeout, 0),
            };

            let response = Runner::run(provider, &executor, request, cancellation).await;

            let mut state = handle.state.lock().await;
            // `killed` is terminal and is never overwritten.
            if state.status != SubAgentStatus::Killed {
                state.status = match response.stop_reason {
                    crate::message::StopReason::Timeout => SubAgentStatus::Timeout,
                    crate::message::StopReason::Complete => SubAgentStatus::Completed,
                    _ => SubAgentStatus::Failed,
                };
                state.error = response.error.clone();
                state.messages.push(Message::assistant(response.content.clone(), vec![]));
                if state.messages.len() > manager.config.max_history {
                    let overflow = state.messages.len() - manager.config.max_history;
                    state.messages.drain(0..overflow);
                }
                state.response = Some(response);
                state.finished_at = Some(Utc::now());
            }
            drop(state);
            manager.active.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Appends a user message to a running sub-agent's history. Per the
    /// open design question, this never itself drives another provider
    /// turn: it is rejected with `not-implemented` until a message-inbox
    /// redrive is designed, so the engine never silently extends semantics.
    pub async fn send(&self, id: &str, message: String) -> Result<()> {
        let handle = self
            .agents
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::SubAgentNotFound(id.to_string()))?;
        let mut state = handle.state.lock().await;
        if state.status != SubAgentStatus::Running {
            return Err(EngineError::NotRunning);
        }
        state.messages.push(Message::user(message));
        Err(EngineError::NotImplemented("sub-agent send does not redrive the loop"))
    }

    pub async fn list(&self, parent: &str) -> Vec<SubAgentSnapshot> {
        let agents = self.agents.lock().await;
        let mut snapshots = Vec::new();
        for (id, handle) in agents.iter() {
            let snapshot = handle.snapshot(id).await;
            if snapshot.parent_session == parent {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    pub async fn history(&self, id: &str) -> Result<SubAgentSnapshot> {
        let handle = self
            .agents
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::SubAgentNotFound(id.to_string()))?;
        Ok(handle.snapshot(id).await)
    }

    /// Valid only while `running`; sets `killed` and cancels the child
    /// context. Returns `already-finished` otherwise.
    pub async fn kill(&self, id: &str) -> Result<()> {
        let handle = self
            .agents
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::SubAgentNotFound(id.to_string()))?;
        let mut state = handle.state.lock().await;
        if state.status != SubAgentStatus::Running {
            return Err(EngineError::AlreadyFinished);
        }
        state.status = SubAgentStatus::Killed;
        state.finished_at = Some(Utc::now());
        state.cancellation.cancel();
        Ok(())
    }

    /// Marks every running sub-agent as killed and cancels their contexts.
    pub async fn shutdown(&self) {
        let agents = self.agents.lock().await;
        for handle in agents.values() {
            let mut state = handle.state.lock().await;
            if state.status == SubAgentStatus::Running {
                state.status = SubAgentStatus::Killed;
                state.finished_at = Some(Utc::now());
                state.cancellation.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;
    use crate::policy::PolicyContext;
    use crate::provider::{Completion, CompletionChunk, FinishReason};
    use crate::tool::registry::ToolRegistry;

    struct StubProvider;
    #[async_trait]
    impl Provider for StubProvider {
        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[crate::tool::ToolDefinition],
        ) -> Result<Completion, String> {
            Ok(Completion {
                content: "sub-agent done".to_string(),
                tool_calls: vec![],
                usage: crate::message::TokenUsage::default(),
                finish_reason: FinishReason::Stop,
            })
        }

        async fn stream(
            &self,
            _messages: &[Message],
            _tools: &[crate::tool::ToolDefinition],
        ) -> mpsc::Receiver<CompletionChunk> {
            let (_tx, rx) = mpsc::channel(1);
            rx
        }

        fn context_window_size(&self) -> usize {
            8192
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    fn manager() -> Arc<SubAgentManager> {
        let executor = ParallelToolExecutor::new(Arc::new(ToolRegistry::new()), PolicyContext::Dm, Value::Null);
        Arc::new(SubAgentManager::new(
            SubAgentManagerConfig::default(),
            Arc::new(StubProvider),
            executor,
        ))
    }

    #[tokio::test]
    async fn recursive_spawn_rejected() {
        let manager = manager();
        let result = manager
            .spawn("session-1".into(), "be helpful".into(), "hi".into(), None, true)
            .await;
        assert!(matches!(result, Err(EngineError::RecursiveSpawn)));
    }

    #[tokio::test]
    async fn spawn_completes_and_lists_by_parent() {
        let manager = manager();
        let id = manager
            .spawn("session-1".into(), "be helpful".into(), "hi".into(), None, false)
            .await
            .unwrap();

        // allow the spawned driver task to finish.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = manager.history(&id).await.unwrap();
        assert_eq!(snapshot.status, SubAgentStatus::Completed);
        assert_eq!(snapshot.parent_session, "session-1");

        let listed = manager.list("session-1").await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
    }

    #[tokio::test]
    async fn kill_is_terminal_and_not_overwritten() {
        let manager = manager();
        let id = manager
            .spawn("session-1".into(), "be helpful".into(), "hi".into(), None, false)
            .await
            .unwrap();
        manager.kill(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = manager.history(&id).await.unwrap();
        assert_eq!(snapshot.status, SubAgentStatus::Killed);
        assert!(matches!(
            manager.kill(&id).await,
            Err(EngineError::AlreadyFinished)
        ));
    }

    #[tokio::test]
    async fn send_rejects_as_not_implemented() {
        let manager = manager();
        let id = manager
            .spawn("session-1".into(), "be helpful".into(), "hi".into(), None, false)
            .await
            .unwrap();
        let _ = manager.kill(&id).await;
        assert!(matches!(
            manager.send(&id, "more input".into()).await,
            Err(EngineError::NotRunning) | Err(EngineError::NotImplemented(_))
        ));
    }

    #[tokio::test]
    async fn max_concurrent_is_enforced() {
        let mut config = SubAgentManagerConfig::default();
        config.max_concurrent = 0;
        let executor = ParallelToolExecutor::new(Arc::new(ToolRegistry::new()), PolicyContext::Dm, Value::Null);
        let manager = Arc::new(SubAgentManager::new(config, Arc::new(StubProvider), executor));
        let result = manager
            .spawn("s".into(), "p".into(), "hi".into(), None, false)
            .await;
        assert!(matches!(result, Err(EngineError::MaxConcurrent)));
    }
}
