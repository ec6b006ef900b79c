//! The ReAct reasoning loop: blocking and streaming drivers sharing the
//! same state machine.

pub mod loop_;
pub mod stream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use loop_::Runner;

/// A cheap, clonable flag a caller can use to cancel an in-flight run.
/// Stands in for a cancellable context: a shorter parent deadline always
/// dominates the loop's own `LoopConfig::timeout`.
#[derive(Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is set. Polls at a short fixed interval so it
    /// can be raced against a provider call in a `select!` and actually
    /// interrupt the suspension rather than only being checked between turns.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
    }
}
