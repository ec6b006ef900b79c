//! Guardrail accumulators for the ReAct loop: repetition detection and
//! cumulative token-budget tracking.

use std::collections::HashMap;

use serde_json::Value;

use crate::message::TokenUsage;

/// Re-serializes parsed JSON to obtain a stable key so that byte sequences
/// which parse to JSON-equal values collide. Invalid JSON falls back to the
/// raw bytes.
#[must_use]
pub fn canonical_json(raw: &Value) -> String {
    match serde_json::from_str::<Value>(&raw.to_string()) {
        Ok(parsed) => serde_json::to_string(&parsed).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

/// Keys on `(tool-name, canonical-JSON(args))`; a key crosses the threshold
/// once it has been registered `threshold` times.
#[derive(Debug, Default)]
pub struct LoopDetector {
    counts: HashMap<(String, String), usize>,
}

impl LoopDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one occurrence and returns `true` if this key has now
    /// reached or crossed `threshold` hits.
    pub fn register(&mut self, tool_name: &str, args: &Value, threshold: usize) -> bool {
        let key = (tool_name.to_string(), canonical_json(args));
        let count = self.counts.entry(key).or_insert(0);
        *count += 1;
        *count >= threshold
    }
}

/// Tracks cumulative usage against an optional budget (0 = unlimited).
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenTracker {
    budget: u64,
    used: TokenUsage,
}

impl TokenTracker {
    #[must_use]
    pub const fn new(budget: u64) -> Self {
        Self {
            budget,
            used: TokenUsage::new(0, 0, 0),
        }
    }

    pub fn add(&mut self, usage: TokenUsage) {
        self.used += usage;
    }

    #[must_use]
    pub const fn used(&self) -> TokenUsage {
        self.used
    }

    /// `false` whenever `budget == 0` (unlimited).
    #[must_use]
    pub const fn exceeded(&self) -> bool {
        self.budget != 0 && self.used.total > self.budget
    }
}
