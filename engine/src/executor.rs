//! Fans out a set of tool calls concurrently, isolates panics per call, and
//! returns results in input order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;

use crate::message::{ToolCall, ToolCallRecord, ToolOutput};
use crate::policy::PolicyContext;
use crate::tool::registry::ToolRegistry;

/// Binds a registry to the conversation it is executing for: the policy
/// context (dm/group) and the execution environment are fixed for the
/// lifetime of one loop run.
#[derive(Clone)]
pub struct ParallelToolExecutor {
    registry: Arc<ToolRegistry>,
    context: PolicyContext,
    env: Arc<Value>,
}

impl ParallelToolExecutor {
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, context: PolicyContext, env: Value) -> Self {
        Self {
            registry,
            context,
            env: Arc::new(env),
        }
    }

    /// Runs every call concurrently and returns one record per call, in the
    /// same order as `calls`. Returns only after every task has completed
    /// (join-barrier) -- no task outlives this call.
    pub async fn execute(&self, calls: &[ToolCall]) -> Vec<ToolCallRecord> {
        let tasks = calls.iter().cloned().map(|call| {
            let registry = self.registry.clone();
            let context = self.context;
            let env = self.env.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                let outcome = AssertUnwindSafe(registry.execute(context, &call, &env))
                    .catch_unwind()
                    .await;
                let duration = start.elapsed();

                match outcome {
                    Ok(output) => ToolCallRecord {
                        call,
                        output,
                        duration,
                        panicked: false,
                    },
                    Err(panic) => {
                        let message = panic_message(&panic);
                        ToolCallRecord {
                            call,
                            output: ToolOutput::error(format!("panic: {message}")),
                            duration,
                            panicked: true,
                        }
                    }
                }
            })
        });

        join_all(tasks)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|_| unreachable!("task panics are caught, not propagated"))
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
