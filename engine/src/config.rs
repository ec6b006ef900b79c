//! Configuration schema: the YAML shape consumed by engine construction.
//!
//! Loading/parsing is provided for the CLI's `config show|path|validate`
//! commands; hot reload and file-watching are not — core treats a parsed
//! [`BotConfig`] as an immutable snapshot for the lifetime of one run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::ApprovalLevel;

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub agents: HashMap<String, AgentEntry>,
    #[serde(default)]
    pub policies: PoliciesConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    /// `module@version` entries selected for binary composition. Composition
    /// itself is a build-time utility and out of scope here.
    #[serde(default)]
    pub plugins: Vec<String>,
}

/// Transports, providers, storage, and memory backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulesConfig {
    #[serde(default)]
    pub transports: TransportsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportsConfig {
    #[serde(default)]
    pub telegram: TelegramTransportConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppTransportConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramTransportConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppTransportConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openrouter: Option<ApiKeyProviderConfig>,
    #[serde(default)]
    pub openai: Option<ApiKeyProviderConfig>,
    #[serde(default)]
    pub anthropic: Option<ApiKeyProviderConfig>,
    #[serde(default)]
    pub ollama: Option<LocalProviderConfig>,
    #[serde(default)]
    pub groq: Option<ApiKeyProviderConfig>,
    #[serde(default)]
    pub gemini: Option<ApiKeyProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyProviderConfig {
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalProviderConfig {
    #[serde(default = "default_ollama_url")]
    pub api_base: String,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

/// History/session persistence backend. The backend itself is an external
/// collaborator (`HistoryStore`); this only names which one to wire up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_kind")]
    pub kind: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: default_storage_kind(),
            path: None,
        }
    }
}

fn default_storage_kind() -> String {
    "memory".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub extraction_cron: Option<String>,
    #[serde(default)]
    pub compaction_cron: Option<String>,
}

/// `agents` map value (`AgentConfig`, serialized form).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    #[serde(default)]
    pub workspace_path: PathBuf,
    #[serde(default)]
    pub data_dir: PathBuf,
    pub provider_id: String,
    /// Empty allowlist means the global tool registry is shared directly.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub routing: RoutingEntry,
    #[serde(default)]
    pub r#loop: LoopOverrides,
    #[serde(default)]
    pub memory_enabled: bool,
    #[serde(default)]
    pub cron: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingEntry {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub chats: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub default: bool,
}

/// Mirrors [`crate::message::LoopConfig`]; zero/absent fields normalize to
/// its defaults at conversion time, not here.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LoopOverrides {
    #[serde(default)]
    pub max_iterations: usize,
    #[serde(default)]
    pub token_budget: u64,
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default)]
    pub repetition_threshold: usize,
}

impl LoopOverrides {
    #[must_use]
    pub fn to_loop_config(self) -> crate::message::LoopConfig {
        crate::message::LoopConfig::new(
            self.max_iterations,
            self.token_budget,
            Duration::from_secs(self.timeout_secs),
            self.repetition_threshold,
        )
    }
}

/// Per-context (dm/group) policy: a default level, explicit per-tool
/// overrides, and allow/ask/deny name lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoliciesConfig {
    #[serde(default)]
    pub dm: ContextPolicyEntry,
    #[serde(default)]
    pub group: ContextPolicyEntry,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextPolicyEntry {
    #[serde(default)]
    pub default: Option<ApprovalLevelEntry>,
    #[serde(default)]
    pub explicit: HashMap<String, ApprovalLevelEntry>,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub ask: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Serializable mirror of [`ApprovalLevel`] (which carries no serde impls of
/// its own, being an engine-internal verdict type rather than wire data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalLevelEntry {
    Allow,
    Ask,
    Deny,
}

impl From<ApprovalLevelEntry> for ApprovalLevel {
    fn from(value: ApprovalLevelEntry) -> Self {
        match value {
            ApprovalLevelEntry::Allow => Self::Allow,
            ApprovalLevelEntry::Ask => Self::Ask,
            ApprovalLevelEntry::Deny => Self::Deny,
        }
    }
}

/// Rate limits, URL allow/deny lists, sandbox policy, and message size
/// limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub url_allow: Vec<String>,
    #[serde(default)]
    pub url_deny: Vec<String>,
    #[serde(default = "default_true")]
    pub sandbox_exec: bool,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_max_json_depth")]
    pub max_json_depth: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limits: RateLimitsConfig::default(),
            url_allow: Vec::new(),
            url_deny: Vec::new(),
            sandbox_exec: true,
            max_message_bytes: default_max_message_bytes(),
            max_json_depth: default_max_json_depth(),
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_max_message_bytes() -> usize {
    32 * 1024
}

const fn default_max_json_depth() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    #[serde(default = "default_rate")]
    pub message_per_sec: f64,
    #[serde(default = "default_rate")]
    pub tool_call_per_sec: f64,
    #[serde(default = "default_token_rate")]
    pub tokens_per_sec: f64,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            message_per_sec: default_rate(),
            tool_call_per_sec: default_rate(),
            tokens_per_sec: default_token_rate(),
        }
    }
}

fn default_rate() -> f64 {
    1.0
}

fn default_token_rate() -> f64 {
    1000.0
}

impl BotConfig {
    /// Validates the configuration and returns any issues found. Never
    /// fails on its own; callers decide whether warnings block startup.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.modules.transports.telegram.enabled && self.modules.transports.telegram.token.is_none() {
            issues.push(ConfigIssue::warning(
                "modules.transports.telegram",
                "telegram is enabled but no token is set",
            ));
        }

        let mut defaults = 0;
        for (id, agent) in &self.agents {
            if agent.routing.default {
                defaults += 1;
            }
            if agent.provider_id.is_empty() {
                issues.push(ConfigIssue::error(format!("agents.{id}.provider_id"), "must not be empty"));
            }
        }
        if defaults > 1 {
            issues.push(ConfigIssue::error("agents", "more than one agent has routing.default = true"));
        }

        for (ctx, policy) in [("policies.dm", &self.policies.dm), ("policies.group", &self.policies.group)] {
            for name in policy.allow.iter().chain(policy.ask.iter()).chain(policy.deny.iter()) {
                let memberships = [&policy.allow, &policy.ask, &policy.deny]
                    .into_iter()
                    .filter(|list| list.contains(name))
                    .count();
                if memberships > 1 {
                    issues.push(ConfigIssue::error(ctx, format!("tool {name} appears in conflicting allow/ask/deny lists")));
                }
            }
        }

        if self.security.max_message_bytes == 0 {
            issues.push(ConfigIssue::warning("security.max_message_bytes", "0 rejects every message"));
        }

        issues
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().iter().all(|issue| issue.level != IssueLevel::Error)
    }
}

/// Parses a YAML document into a [`BotConfig`].
pub fn parse(yaml: &str) -> Result<BotConfig, ConfigError> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Reads and parses a config file from `path`.
pub async fn load_from(path: &Path) -> Result<BotConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse(&content)
}

/// Serializes a [`BotConfig`] back to YAML, e.g. for `config show` after
/// env-var merging.
pub fn to_yaml(config: &BotConfig) -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(config)?)
}

/// The conventional config file location: a per-user dotdir holding a
/// single YAML document.
#[must_use]
pub fn default_config_dir() -> PathBuf {
    dirs_next::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".engine")
}

#[must_use]
pub fn config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

/// Errors from reading or parsing a configuration document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// One configuration validation finding.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub level: IssueLevel,
    pub path: String,
    pub message: String,
}

impl ConfigIssue {
    #[must_use]
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            path: path.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            IssueLevel::Error => "ERROR",
            IssueLevel::Warning => "WARN",
        };
        write!(f, "[{prefix}] {}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    Error,
    Warning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_issues() {
        let config = BotConfig::default();
        assert!(config.is_valid());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn parses_sample_document() {
        let yaml = r#"
modules:
  providers:
    anthropic:
      api_key: sk-ant-xxx
agents:
  default:
    provider_id: anthropic
    routing:
      default: true
security:
  max_message_bytes: 65536
"#;
        let config = parse(yaml).unwrap();
        assert!(config.modules.providers.anthropic.is_some());
        assert_eq!(config.agents["default"].provider_id, "anthropic");
        assert!(config.agents["default"].routing.default);
        assert_eq!(config.security.max_message_bytes, 65536);
    }

    #[test]
    fn rejects_unknown_root_field() {
        let yaml = "bogus: true\n";
        assert!(parse(yaml).is_err());
    }

    #[test]
    fn flags_duplicate_default_agent() {
        let mut config = BotConfig::default();
        for id in ["a", "b"] {
            config.agents.insert(
                id.to_string(),
                AgentEntry {
                    workspace_path: PathBuf::new(),
                    data_dir: PathBuf::new(),
                    provider_id: "p".to_string(),
                    tools: vec![],
                    routing: RoutingEntry {
                        default: true,
                        ..Default::default()
                    },
                    r#loop: LoopOverrides::default(),
                    memory_enabled: false,
                    cron: HashMap::new(),
                },
            );
        }
        let issues = config.validate();
        assert!(!config.is_valid());
        assert!(issues.iter().any(|i| i.level == IssueLevel::Error));
    }

    #[test]
    fn flags_conflicting_tool_lists() {
        let mut config = BotConfig::default();
        config.policies.dm.allow.push("shell".to_string());
        config.policies.dm.deny.push("shell".to_string());
        let issues = config.validate();
        assert!(!config.is_valid());
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn loop_overrides_normalize_zero_to_defaults() {
        let overrides = LoopOverrides::default();
        let loop_config = overrides.to_loop_config();
        assert_eq!(loop_config.max_iterations, crate::message::LoopConfig::DEFAULT_MAX_ITERATIONS);
    }
}
