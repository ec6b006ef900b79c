//! Policy cascade: context defaults, per-tool overrides, and allow/ask/deny
//! name lists, resolved to a single [`ApprovalLevel`] per call.

pub mod approval;
pub mod elevated;

use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, Result};

/// The verdict the policy cascade produces per tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalLevel {
    Allow,
    Ask,
    Deny,
}

/// DM vs. group conversation, used to select which policy applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyContext {
    Dm,
    Group,
}

/// Per-context policy: a default level, an explicit per-tool override map,
/// and allow/ask/deny name lists (each tool may appear in at most one).
#[derive(Debug, Clone, Default)]
pub struct ContextPolicy {
    pub default: Option<ApprovalLevel>,
    pub explicit: HashMap<String, ApprovalLevel>,
    pub allow: HashSet<String>,
    pub ask: HashSet<String>,
    pub deny: HashSet<String>,
}

impl ContextPolicy {
    /// Validates that no tool name appears in more than one of the
    /// allow/ask/deny lists.
    pub fn validate(&self) -> Result<()> {
        for name in self.allow.iter().chain(self.ask.iter()).chain(self.deny.iter()) {
            let memberships = [&self.allow, &self.ask, &self.deny]
                .into_iter()
                .filter(|set| set.contains(name))
                .count();
            if memberships > 1 {
                return Err(EngineError::ToolInConflictingLists(name.clone()));
            }
        }
        Ok(())
    }
}

/// The full policy configuration: one [`ContextPolicy`] per
/// [`PolicyContext`].
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    contexts: HashMap<PolicyContext, ContextPolicy>,
}

impl PolicyConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_context(&mut self, ctx: PolicyContext, policy: ContextPolicy) -> Result<()> {
        policy.validate()?;
        self.contexts.insert(ctx, policy);
        Ok(())
    }

    /// Resolves the effective level: explicit per-tool
    /// map beats list membership beats context default beats the tool's own
    /// default policy. If no policy is configured for the active context,
    /// falls back to the tool's default policy directly.
    #[must_use]
    pub fn resolve(
        &self,
        ctx: PolicyContext,
        tool_name: &str,
        tool_default: ApprovalLevel,
    ) -> ApprovalLevel {
        let Some(cp) = self.contexts.get(&ctx) else {
            return tool_default;
        };
        if let Some(level) = cp.explicit.get(tool_name) {
            return *level;
        }
        if cp.deny.contains(tool_name) {
            return ApprovalLevel::Deny;
        }
        if cp.ask.contains(tool_name) {
            return ApprovalLevel::Ask;
        }
        if cp.allow.contains(tool_name) {
            return ApprovalLevel::Allow;
        }
        cp.default.unwrap_or(tool_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_beats_lists_beats_default_beats_tool_default() {
        let mut cfg = PolicyConfig::new();
        let mut cp = ContextPolicy {
            default: Some(ApprovalLevel::Ask),
            ..Default::default()
        };
        cp.allow.insert("shell".into());
        cfg.set_context(PolicyContext::Dm, cp).unwrap();

        // list membership beats context default
        assert_eq!(
            cfg.resolve(PolicyContext::Dm, "shell", ApprovalLevel::Deny),
            ApprovalLevel::Allow
        );
        // context default beats tool default when no list/explicit match
        assert_eq!(
            cfg.resolve(PolicyContext::Dm, "read", ApprovalLevel::Allow),
            ApprovalLevel::Ask
        );
        // no policy for this context -> tool default
        assert_eq!(
            cfg.resolve(PolicyContext::Group, "read", ApprovalLevel::Allow),
            ApprovalLevel::Allow
        );
    }

    #[test]
    fn explicit_map_wins_over_lists() {
        let mut cfg = PolicyConfig::new();
        let mut cp = ContextPolicy::default();
        cp.deny.insert("shell".into());
        cp.explicit.insert("shell".into(), ApprovalLevel::Allow);
        cfg.set_context(PolicyContext::Dm, cp).unwrap();

        assert_eq!(
            cfg.resolve(PolicyContext::Dm, "shell", ApprovalLevel::Deny),
            ApprovalLevel::Allow
        );
    }

    #[test]
    fn conflicting_lists_rejected() {
        let mut cp = ContextPolicy::default();
        cp.allow.insert("shell".into());
        cp.deny.insert("shell".into());
        assert!(matches!(
            cp.validate(),
            Err(EngineError::ToolInConflictingLists(_))
        ));
    }
}
