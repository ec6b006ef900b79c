//! Time-bounded promotion of `ask` to `allow`.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::ApprovalLevel;

/// A scoped flag that, while active, upgrades `ask` to `allow`. `deny` is
/// never upgraded. Deliberately asymmetric: promotion is upward only.
#[derive(Debug, Default)]
pub struct ElevatedState {
    expiry: Mutex<Option<Instant>>,
}

impl ElevatedState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn elevate(&self, duration: Duration) {
        *self.expiry.lock().await = Some(Instant::now() + duration);
    }

    pub async fn revoke(&self) {
        *self.expiry.lock().await = None;
    }

    pub async fn is_active(&self) -> bool {
        matches!(*self.expiry.lock().await, Some(exp) if Instant::now() < exp)
    }

    /// Returns `allow` iff `level == ask` and currently active; otherwise
    /// returns `level` unchanged.
    pub async fn apply(&self, level: ApprovalLevel) -> ApprovalLevel {
        if level == ApprovalLevel::Ask && self.is_active().await {
            ApprovalLevel::Allow
        } else {
            level
        }
    }
}
