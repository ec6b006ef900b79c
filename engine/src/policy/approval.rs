//! Per-call human-in-the-loop approval state machine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::error::{EngineError, Result};

/// What the registry asks the user to approve.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub args: Value,
}

/// The user's answer.
#[derive(Debug, Clone)]
pub struct ApprovalResponse {
    pub approved: bool,
    pub reason: String,
}

/// Consumed: asks a human (or other out-of-band authority) to approve one
/// tool call. Must honor the caller's timeout.
#[async_trait]
pub trait ApprovalRequester: Send + Sync {
    async fn request_approval(&self, request: ApprovalRequest) -> Result<ApprovalResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Pending,
    Timeout,
}

/// States: idle -> pending -> (idle on terminal response | timeout then
/// idle). Only one approval may be in flight per instance; a concurrent
/// `begin` while pending is refused immediately rather than interleaved.
pub struct PendingApproval {
    state: Mutex<State>,
    tx: mpsc::Sender<ApprovalResponse>,
    rx: Mutex<mpsc::Receiver<ApprovalResponse>>,
}

impl Default for PendingApproval {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingApproval {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            state: Mutex::new(State::Idle),
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Runs one approval flow to completion. Returns the response the
    /// caller should act on, plus the error to surface (if any) per the
    /// registry's dispatch rules: `None` on a normal approved/denied
    /// response, `Some(Denied)` when refused outright for being already
    /// pending, `Some(ApprovalTimeout)` on deadline.
    pub async fn begin(
        &self,
        approver: Arc<dyn ApprovalRequester>,
        request: ApprovalRequest,
        timeout: Duration,
    ) -> (ApprovalResponse, Option<EngineError>) {
        {
            let mut state = self.state.lock().await;
            if *state == State::Pending {
                return (
                    ApprovalResponse {
                        approved: false,
                        reason: "another approval is already pending".to_string(),
                    },
                    Some(EngineError::Denied),
                );
            }
            *state = State::Pending;
        }

        // Non-blocking drain: a stale response left over from a previous
        // flow must never auto-answer this one.
        let mut rx = self.rx.lock().await;
        while rx.try_recv().is_ok() {}

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let response = approver.request_approval(request).await.unwrap_or_else(|e| {
                ApprovalResponse {
                    approved: false,
                    reason: format!("approver error: {e}"),
                }
            });
            let _ = tx.send(response).await;
        });

        let outcome = tokio::time::timeout(timeout, rx.recv()).await;
        drop(rx);

        let result = match outcome {
            Ok(Some(response)) => (response, None),
            Ok(None) => (
                ApprovalResponse {
                    approved: false,
                    reason: "approver task ended without responding".to_string(),
                },
                Some(EngineError::Denied),
            ),
            Err(_elapsed) => {
                *self.state.lock().await = State::Timeout;
                (
                    ApprovalResponse {
                        approved: false,
                        reason: "timed out".to_string(),
                    },
                    Some(EngineError::ApprovalTimeout),
                )
            }
        };

        *self.state.lock().await = State::Idle;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysApprove;
    #[async_trait]
    impl ApprovalRequester for AlwaysApprove {
        async fn request_approval(&self, _r: ApprovalRequest) -> Result<ApprovalResponse> {
            Ok(ApprovalResponse {
                approved: true,
                reason: "ok".into(),
            })
        }
    }

    struct NeverResponds;
    #[async_trait]
    impl ApprovalRequester for NeverResponds {
        async fn request_approval(&self, _r: ApprovalRequest) -> Result<ApprovalResponse> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    fn req() -> ApprovalRequest {
        ApprovalRequest {
            tool_name: "shell".into(),
            args: Value::Null,
        }
    }

    #[tokio::test]
    async fn approved_round_trip() {
        let pending = PendingApproval::new();
        let (resp, err) = pending
            .begin(Arc::new(AlwaysApprove), req(), Duration::from_secs(5))
            .await;
        assert!(resp.approved);
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn timeout_transitions_and_resets_to_idle() {
        let pending = PendingApproval::new();
        let (resp, err) = pending
            .begin(Arc::new(NeverResponds), req(), Duration::from_millis(20))
            .await;
        assert!(!resp.approved);
        assert!(matches!(err, Some(EngineError::ApprovalTimeout)));
        // idle again: a subsequent begin is not immediately denied.
        let (resp2, err2) = pending
            .begin(Arc::new(AlwaysApprove), req(), Duration::from_secs(5))
            .await;
        assert!(resp2.approved);
        assert!(err2.is_none());
    }

    #[tokio::test]
    async fn concurrent_begin_denied_without_calling_approver() {
        let pending = Arc::new(PendingApproval::new());
        let p2 = pending.clone();
        let first = tokio::spawn(async move {
            p2.begin(Arc::new(NeverResponds), req(), Duration::from_millis(200))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (resp, err) = pending.begin(Arc::new(AlwaysApprove), req(), Duration::from_secs(5)).await;
        assert!(!resp.approved);
        assert!(matches!(err, Some(EngineError::Denied)));
        first.await.unwrap();
    }
}
