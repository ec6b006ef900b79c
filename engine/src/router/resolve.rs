//! Agent resolution cascade and the factory that wraps it with per-agent
//! resource lookup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::channel::InboundMessage;
use crate::error::{EngineError, Result};
use crate::message::LoopConfig;
use crate::store::HistoryStore;
use crate::tool::registry::{RegistryConfig, ToolRegistry};

/// Which inbound messages route to this agent.
#[derive(Debug, Clone, Default)]
pub struct RoutingPredicate {
    pub users: Vec<String>,
    pub chats: Vec<String>,
    pub channels: Vec<String>,
    pub default: bool,
}

/// Per-agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub id: String,
    pub workspace_path: PathBuf,
    pub data_dir: PathBuf,
    pub provider_id: String,
    /// Non-empty means the agent's tool registry is filtered to these
    /// names; empty means the global registry is shared directly.
    pub tools: Vec<String>,
    pub routing: RoutingPredicate,
    pub loop_overrides: Option<LoopConfig>,
    pub memory_enabled: bool,
    pub cron_overrides: HashMap<String, String>,
}

/// `{ id -> AgentConfig }` with declaration order and pre-built indexes by
/// user/chat/channel, plus at most one default.
pub struct AgentRegistry {
    configs: Vec<AgentConfig>,
    by_id: HashMap<String, usize>,
    by_user: HashMap<String, Vec<usize>>,
    by_chat: HashMap<String, Vec<usize>>,
    by_channel: HashMap<String, Vec<usize>>,
    default: Option<usize>,
}

impl AgentRegistry {
    /// Fails with `duplicate-default` if more than one config has
    /// `routing.default == true`.
    pub fn build(configs: Vec<AgentConfig>) -> Result<Self> {
        let mut by_id = HashMap::new();
        let mut by_user: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_chat: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_channel: HashMap<String, Vec<usize>> = HashMap::new();
        let mut default = None;

        for (index, config) in configs.iter().enumerate() {
            by_id.insert(config.id.clone(), index);
            for user in &config.routing.users {
                by_user.entry(user.clone()).or_default().push(index);
            }
            for chat in &config.routing.chats {
                by_chat.entry(chat.clone()).or_default().push(index);
            }
            for channel in &config.routing.channels {
                by_channel.entry(channel.clone()).or_default().push(index);
            }
            if config.routing.default {
                if default.is_some() {
                    return Err(EngineError::DuplicateDefault);
                }
                default = Some(index);
            }
        }

        Ok(Self {
            configs,
            by_id,
            by_user,
            by_chat,
            by_channel,
            default,
        })
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&AgentConfig> {
        self.by_id.get(id).map(|&i| &self.configs[i])
    }

    /// Pure; no mutation. user-match -> chat-match -> channel-match ->
    /// default -> `no-matching-agent`. Ties within an index break by
    /// declaration order.
    pub fn resolve(&self, message: &InboundMessage) -> Result<&AgentConfig> {
        let first = |indexes: Option<&Vec<usize>>| indexes.and_then(|v| v.iter().min().copied());

        first(self.by_user.get(&message.sender_id))
            .or_else(|| first(self.by_chat.get(&message.chat_id)))
            .or_else(|| first(self.by_channel.get(&message.channel_id)))
            .or(self.default)
            .map(|i| &self.configs[i])
            .ok_or(EngineError::NoMatchingAgent)
    }
}

/// Resolved lazily and cached per agent, double-checked lock.
struct AgentResources {
    tool_registry: Mutex<Option<Arc<ToolRegistry>>>,
    history_store: Mutex<Option<Option<Arc<dyn HistoryStore>>>>,
    system_prompt: Mutex<Option<Arc<str>>>,
}

impl Default for AgentResources {
    fn default() -> Self {
        Self {
            tool_registry: Mutex::new(None),
            history_store: Mutex::new(None),
            system_prompt: Mutex::new(None),
        }
    }
}

/// Loads a history store for an agent whose memory is enabled. A disabled
/// memory config caches a `None` sentinel rather than re-resolving on
/// every call.
#[async_trait]
pub trait HistoryStoreLoader: Send + Sync {
    async fn load(&self, agent: &AgentConfig) -> Arc<dyn HistoryStore>;
}

#[async_trait]
pub trait SystemPromptLoader: Send + Sync {
    async fn load(&self, agent: &AgentConfig) -> String;
}

/// Wraps resolution and per-agent resource lookup: a filtered tool
/// registry, and a lazily cached history store / system prompt.
pub struct AgentFactory {
    registry: AgentRegistry,
    global_tools: Arc<ToolRegistry>,
    registry_config: fn() -> RegistryConfig,
    history_loader: Option<Arc<dyn HistoryStoreLoader>>,
    prompt_loader: Option<Arc<dyn SystemPromptLoader>>,
    resources: Mutex<HashMap<String, Arc<AgentResources>>>,
}

impl AgentFactory {
    #[must_use]
    pub fn new(registry: AgentRegistry, global_tools: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            global_tools,
            registry_config: RegistryConfig::default,
            history_loader: None,
            prompt_loader: None,
            resources: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_history_loader(mut self, loader: Arc<dyn HistoryStoreLoader>) -> Self {
        self.history_loader = Some(loader);
        self
    }

    #[must_use]
    pub fn with_prompt_loader(mut self, loader: Arc<dyn SystemPromptLoader>) -> Self {
        self.prompt_loader = Some(loader);
        self
    }

    pub fn resolve(&self, message: &InboundMessage) -> Result<&AgentConfig> {
        self.registry.resolve(message)
    }

    #[must_use]
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    async fn resources_for(&self, agent_id: &str) -> Arc<AgentResources> {
        self.resources
            .lock()
            .await
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(AgentResources::default()))
            .clone()
    }

    /// Builds (or returns the cached) per-agent tool registry view: filtered
    /// if `AgentConfig.tools` is non-empty, otherwise the global registry is
    /// shared directly.
    pub async fn tool_registry_for(&self, agent: &AgentConfig) -> Result<Arc<ToolRegistry>> {
        if agent.tools.is_empty() {
            return Ok(self.global_tools.clone());
        }

        let resources = self.resources_for(&agent.id).await;
        let mut slot = resources.tool_registry.lock().await;
        if let Some(cached) = &*slot {
            return Ok(cached.clone());
        }

        let mut filtered = ToolRegistry::with_config((self.registry_config)());
        for name in &agent.tools {
            let tool = self.global_tools.get(name).await?;
            filtered.register(tool)?;
        }
        let filtered = Arc::new(filtered);
        *slot = Some(filtered.clone());
        Ok(filtered)
    }

    pub async fn history_store_for(&self, agent: &AgentConfig) -> Option<Arc<dyn HistoryStore>> {
        if !agent.memory_enabled {
            return None;
        }
        let resources = self.resources_for(&agent.id).await;
        let mut slot = resources.history_store.lock().await;
        if let Some(cached) = &*slot {
            return cached.clone();
        }
        let loaded = match &self.history_loader {
            Some(loader) => Some(loader.load(agent).await),
            None => None,
        };
        *slot = Some(loaded.clone());
        loaded
    }

    pub async fn system_prompt_for(&self, agent: &AgentConfig) -> Option<Arc<str>> {
        let resources = self.resources_for(&agent.id).await;
        let mut slot = resources.system_prompt.lock().await;
        if let Some(cached) = &*slot {
            return Some(cached.clone());
        }
        let loader = self.prompt_loader.as_ref()?;
        let prompt: Arc<str> = Arc::from(loader.load(agent).await.into_boxed_str());
        *slot = Some(prompt.clone());
        Some(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChatKind;

    fn agent(id: &str, routing: RoutingPredicate) -> AgentConfig {
        AgentConfig {
            id: id.to_string(),
            workspace_path: PathBuf::new(),
            data_dir: PathBuf::new(),
            provider_id: "mock".to_string(),
            tools: vec![],
            routing,
            loop_overrides: None,
            memory_enabled: false,
            cron_overrides: HashMap::new(),
        }
    }

    fn message(sender: &str, chat: &str, channel: &str) -> InboundMessage {
        InboundMessage {
            channel_id: channel.to_string(),
            sender_id: sender.to_string(),
            sender_name: None,
            chat_id: chat.to_string(),
            chat_kind: ChatKind::Dm,
            thread_id: None,
            text: "hi".to_string(),
            attachments: vec![],
            received_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn duplicate_default_rejected() {
        let configs = vec![
            agent("a", RoutingPredicate { default: true, ..Default::default() }),
            agent("b", RoutingPredicate { default: true, ..Default::default() }),
        ];
        assert!(matches!(
            AgentRegistry::build(configs),
            Err(EngineError::DuplicateDefault)
        ));
    }

    #[test]
    fn cascade_prefers_user_over_chat_over_channel_over_default() {
        let configs = vec![
            agent("by-default", RoutingPredicate { default: true, ..Default::default() }),
            agent(
                "by-channel",
                RoutingPredicate {
                    channels: vec!["tg".into()],
                    ..Default::default()
                },
            ),
            agent(
                "by-chat",
                RoutingPredicate {
                    chats: vec!["chat-1".into()],
                    ..Default::default()
                },
            ),
            agent(
                "by-user",
                RoutingPredicate {
                    users: vec!["alice".into()],
                    ..Default::default()
                },
            ),
        ];
        let registry = AgentRegistry::build(configs).unwrap();

        assert_eq!(registry.resolve(&message("alice", "chat-1", "tg")).unwrap().id, "by-user");
        assert_eq!(registry.resolve(&message("bob", "chat-1", "tg")).unwrap().id, "by-chat");
        assert_eq!(registry.resolve(&message("bob", "chat-2", "tg")).unwrap().id, "by-channel");
        assert_eq!(registry.resolve(&message("bob", "chat-2", "discord")).unwrap().id, "by-default");
    }

    #[test]
    fn no_matching_agent_without_default() {
        let configs = vec![agent(
            "by-user",
            RoutingPredicate {
                users: vec!["alice".into()],
                ..Default::default()
            },
        )];
        let registry = AgentRegistry::build(configs).unwrap();
        assert!(matches!(
            registry.resolve(&message("bob", "chat", "tg")),
            Err(EngineError::NoMatchingAgent)
        ));
    }

    #[tokio::test]
    async fn empty_allowlist_shares_global_registry() {
        let global = Arc::new(ToolRegistry::new());
        let registry = AgentRegistry::build(vec![agent(
            "a",
            RoutingPredicate { default: true, ..Default::default() },
        )])
        .unwrap();
        let factory = AgentFactory::new(registry, global.clone());
        let config = factory.resolve(&message("u", "c", "ch")).unwrap();
        let view = factory.tool_registry_for(config).await.unwrap();
        assert!(Arc::ptr_eq(&view, &global));
    }
}
