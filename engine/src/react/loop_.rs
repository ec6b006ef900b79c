//! Blocking-mode ReAct loop: alternates provider completions and tool-result
//! reinjection until one of the termination conditions fires.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info_span, Instrument};

use crate::executor::ParallelToolExecutor;
use crate::guard::{LoopDetector, TokenTracker};
use crate::message::{Message, Request, Response, StopReason, ToolCallRecord};
use crate::provider::Provider;

use super::Cancellation;

/// Stateless driver; every call takes its dependencies explicitly so one
/// `Runner` can serve many concurrent runs.
#[derive(Debug, Clone, Copy)]
pub struct Runner;

impl Runner {
    /// Runs one request to completion. Never panics; every termination path
    /// is represented in the returned [`Response`].
    pub async fn run(
        provider: Arc<dyn Provider>,
        executor: &ParallelToolExecutor,
        request: Request,
        cancellation: Cancellation,
    ) -> Response {
        let span = info_span!("react.run", iterations = tracing::field::Empty);
        async move {
            let deadline = Instant::now() + request.config.timeout;
            let mut messages = Vec::with_capacity(request.messages.len() + 1);
            if let Some(system_prompt) = &request.system_prompt {
                messages.push(Message::system(system_prompt.clone()));
            }
            messages.extend(request.messages.clone());

            let mut detector = LoopDetector::new();
            let mut tracker = TokenTracker::new(request.config.token_budget);
            let mut records: Vec<ToolCallRecord> = Vec::new();

            for iteration in 1..=request.config.max_iterations {
                if cancellation.is_cancelled() {
                    return terminal(records, tracker, iteration - 1, StopReason::Error, "cancelled");
                }
                if Instant::now() >= deadline {
                    return terminal(records, tracker, iteration - 1, StopReason::Timeout, "deadline exceeded");
                }

                let completion = tokio::select! {
                    result = provider.complete(&messages, &request.tools) => match result {
                        Ok(c) => c,
                        Err(e) => return terminal(records, tracker, iteration, StopReason::Error, &e),
                    },
                    () = tokio::time::sleep_until(deadline) => {
                        return terminal(records, tracker, iteration - 1, StopReason::Timeout, "deadline exceeded");
                    }
                    () = cancellation.cancelled() => {
                        return terminal(records, tracker, iteration - 1, StopReason::Error, "cancelled");
                    }
                };
                tracker.add(completion.usage);

                if tracker.exceeded() {
                    return terminal(
                        records,
                        tracker,
                        iteration,
                        StopReason::TokenBudget,
                        "token-budget-exceeded",
                    );
                }

                if completion.tool_calls.is_empty() {
                    return Response {
                        content: completion.content,
                        tool_calls: records,
                        usage: tracker.used(),
                        iterations: iteration,
                        stop_reason: StopReason::Complete,
                        error: None,
                    };
                }

                // Pre-append check: history must never contain an orphan
                // assistant turn without matching tool results.
                let repeated = completion
                    .tool_calls
                    .iter()
                    .any(|call| detector.register(&call.name, &call.arguments, request.config.repetition_threshold));
                if repeated {
                    return terminal(records, tracker, iteration, StopReason::LoopDetected, "loop-detected");
                }

                messages.push(Message::assistant(
                    completion.content.clone(),
                    completion.tool_calls.clone(),
                ));

                let new_records = executor.execute(&completion.tool_calls).await;
                for record in &new_records {
                    messages.push(Message::tool(record.call.id.clone(), &record.output));
                }
                records.extend(new_records);
            }

            terminal(
                records,
                tracker,
                request.config.max_iterations,
                StopReason::MaxIterations,
                "max-iterations-reached",
            )
        }
        .instrument(span)
        .await
    }
}

fn terminal(
    tool_calls: Vec<ToolCallRecord>,
    tracker: TokenTracker,
    iterations: usize,
    stop_reason: StopReason,
    error: &str,
) -> Response {
    Response {
        content: String::new(),
        tool_calls,
        usage: tracker.used(),
        iterations,
        stop_reason,
        error: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;
    use crate::message::{LoopConfig, Role, TokenUsage, ToolCall};
    use crate::policy::{ApprovalLevel, PolicyContext};
    use crate::provider::{Completion, CompletionChunk, FinishReason};
    use crate::tool::registry::ToolRegistry;
    use crate::tool::{Scope, Tool};

    struct ScriptedProvider {
        responses: std::sync::Mutex<Vec<Result<Completion, String>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<Completion, String>>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.into_iter().rev().collect()),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[crate::tool::ToolDefinition],
        ) -> Result<Completion, String> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .expect("scripted provider ran out of responses")
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
            128_000
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct ReadTool;
    #[async_trait]
    impl Tool for ReadTool {
        fn name(&self) -> &str {
            "read"
        }
        fn description(&self) -> &str {
            "reads a file"
        }
        fn schema(&self) -> Value {
            serde_json::json!({})
        }
        fn scopes(&self) -> &[Scope] {
            &[Scope::ReadOnly]
        }
        fn default_policy(&self) -> ApprovalLevel {
            ApprovalLevel::Allow
        }
        async fn execute(&self, _args: Value, _env: &Value) -> Result<String, String> {
            Ok("file content".to_string())
        }
    }

    fn executor_with(tools: Vec<Arc<dyn Tool>>) -> ParallelToolExecutor {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool).unwrap();
        }
        ParallelToolExecutor::new(Arc::new(registry), PolicyContext::Dm, Value::Null)
    }

    fn request(config: LoopConfig) -> Request {
        Request {
            messages: vec![Message::user("hi")],
            system_prompt: None,
            tools: vec![],
            config,
        }
    }

    #[tokio::test]
    async fn text_only_completion() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(Completion {
            content: "hello world".to_string(),
            tool_calls: vec![],
            usage: TokenUsage::default(),
            finish_reason: FinishReason::Stop,
        })]));
        let executor = executor_with(vec![]);
        let response = Runner::run(
            provider,
            &executor,
            request(LoopConfig::new(5, 0, Duration::from_secs(10), 0)),
            Cancellation::new(),
        )
        .await;

        assert_eq!(response.content, "hello world");
        assert_eq!(response.stop_reason, StopReason::Complete);
        assert_eq!(response.iterations, 1);
    }

    #[tokio::test]
    async fn tool_round_trip() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(Completion {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "1".to_string(),
                    name: "read".to_string(),
                    arguments: serde_json::json!({}),
                }],
                usage: TokenUsage::new(5, 10, 15),
                finish_reason: FinishReason::ToolUse,
            }),
            Ok(Completion {
                content: "done".to_string(),
                tool_calls: vec![],
                usage: TokenUsage::new(10, 20, 30),
                finish_reason: FinishReason::Stop,
            }),
        ]));
        let executor = executor_with(vec![Arc::new(ReadTool)]);
        let response = Runner::run(
            provider,
            &executor,
            request(LoopConfig::new(5, 0, Duration::from_secs(10), 0)),
            Cancellation::new(),
        )
        .await;

        assert_eq!(response.iterations, 2);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.usage.total, 45);
        assert_eq!(response.stop_reason, StopReason::Complete);
        assert_eq!(response.tool_calls[0].output.content, "file content");
    }

    #[tokio::test]
    async fn budget_exceeded_on_first_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(Completion {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "1".to_string(),
                name: "read".to_string(),
                arguments: serde_json::json!({}),
            }],
            usage: TokenUsage::new(50, 100, 150),
            finish_reason: FinishReason::ToolUse,
        })]));
        let executor = executor_with(vec![Arc::new(ReadTool)]);
        let response = Runner::run(
            provider,
            &executor,
            request(LoopConfig::new(5, 100, Duration::from_secs(10), 0)),
            Cancellation::new(),
        )
        .await;

        assert_eq!(response.stop_reason, StopReason::TokenBudget);
        assert_eq!(response.error.as_deref(), Some("token-budget-exceeded"));
        assert_eq!(response.iterations, 1);
    }

    #[tokio::test]
    async fn loop_detected_on_third_repetition() {
        let same_call = || ToolCall {
            id: "1".to_string(),
            name: "r".to_string(),
            arguments: serde_json::json!({"key": "value"}),
        };
        let responses = (0..4)
            .map(|_| {
                Ok(Completion {
                    content: String::new(),
                    tool_calls: vec![same_call()],
                    usage: TokenUsage::default(),
                    finish_reason: FinishReason::ToolUse,
                })
            })
            .collect();
        struct AnyTool;
        #[async_trait]
        impl Tool for AnyTool {
            fn name(&self) -> &str {
                "r"
            }
            fn description(&self) -> &str {
                ""
            }
            fn schema(&self) -> Value {
                Value::Null
            }
            fn scopes(&self) -> &[Scope] {
                &[Scope::ReadOnly]
            }
            fn default_policy(&self) -> ApprovalLevel {
                ApprovalLevel::Allow
            }
            async fn execute(&self, _a: Value, _e: &Value) -> Result<String, String> {
                Ok("ok".to_string())
            }
        }
        let provider = Arc::new(ScriptedProvider::new(responses));
        let executor = executor_with(vec![Arc::new(AnyTool)]);
        let response = Runner::run(
            provider,
            &executor,
            request(LoopConfig::new(10, 0, Duration::from_secs(10), 3)),
            Cancellation::new(),
        )
        .await;

        assert_eq!(response.stop_reason, StopReason::LoopDetected);
        assert_eq!(response.iterations, 3);
        // the third (detected) turn never appended an orphan assistant message
        assert_eq!(response.tool_calls.len(), 2);
    }

    #[tokio::test]
    async fn parallel_tool_isolation_preserves_order() {
        struct GoodTool(&'static str);
        #[async_trait]
        impl Tool for GoodTool {
            fn name(&self) -> &str {
                self.0
            }
            fn description(&self) -> &str {
                ""
            }
            fn schema(&self) -> Value {
                Value::Null
            }
            fn scopes(&self) -> &[Scope] {
                &[Scope::ReadOnly]
            }
            fn default_policy(&self) -> ApprovalLevel {
                ApprovalLevel::Allow
            }
            async fn execute(&self, _a: Value, _e: &Value) -> Result<String, String> {
                Ok("ok".to_string())
            }
        }
        struct PanicTool;
        #[async_trait]
        impl Tool for PanicTool {
            fn name(&self) -> &str {
                "panicker"
            }
            fn description(&self) -> &str {
                ""
            }
            fn schema(&self) -> Value {
                Value::Null
            }
            fn scopes(&self) -> &[Scope] {
                &[Scope::ReadOnly]
            }
            fn default_policy(&self) -> ApprovalLevel {
                ApprovalLevel::Allow
            }
            async fn execute(&self, _a: Value, _e: &Value) -> Result<String, String> {
                panic!("boom");
            }
        }

        let calls = vec![
            ToolCall { id: "good1".into(), name: "good1".into(), arguments: Value::Null },
            ToolCall { id: "panicker".into(), name: "panicker".into(), arguments: Value::Null },
            ToolCall { id: "good2".into(), name: "good2".into(), arguments: Value::Null },
        ];
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(Completion {
                content: String::new(),
                tool_calls: calls,
                usage: TokenUsage::default(),
                finish_reason: FinishReason::ToolUse,
            }),
            Ok(Completion {
                content: "done".to_string(),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                finish_reason: FinishReason::Stop,
            }),
        ]));
        let executor = executor_with(vec![
            Arc::new(GoodTool("good1")),
            Arc::new(PanicTool),
            Arc::new(GoodTool("good2")),
        ]);
        let response = Runner::run(
            provider,
            &executor,
            request(LoopConfig::new(5, 0, Duration::from_secs(10), 0)),
            Cancellation::new(),
        )
        .await;

        assert_eq!(response.tool_calls.len(), 3);
        assert_eq!(response.tool_calls[0].call.id, "good1");
        assert!(!response.tool_calls[0].panicked);
        assert_eq!(response.tool_calls[1].call.id, "panicker");
        assert!(response.tool_calls[1].panicked);
        assert_eq!(response.tool_calls[2].call.id, "good2");
        assert!(!response.tool_calls[2].panicked);
    }

    #[tokio::test]
    async fn cancelled_context_returns_immediately() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let executor = executor_with(vec![]);
        let cancellation = Cancellation::new();
        cancellation.cancel();

        let response = Runner::run(
            provider,
            &executor,
            request(LoopConfig::new(5, 0, Duration::from_secs(10), 0)),
            cancellation,
        )
        .await;

        assert_eq!(response.stop_reason, StopReason::Error);
        assert_eq!(response.error.as_deref(), Some("cancelled"));
        assert_eq!(response.iterations, 0);
    }

    #[tokio::test]
    async fn max_iterations_reached() {
        let responses = (0..3)
            .map(|_| {
                Ok(Completion {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        id: "1".to_string(),
                        name: "read".to_string(),
                        arguments: serde_json::json!({"n": 1}),
                    }],
                    usage: TokenUsage::default(),
                    finish_reason: FinishReason::ToolUse,
                })
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::new(responses));
        let executor = executor_with(vec![Arc::new(ReadTool)]);
        let response = Runner::run(
            provider,
            &executor,
            request(LoopConfig::new(3, 0, Duration::from_secs(10), 100)),
            Cancellation::new(),
        )
        .await;

        assert_eq!(response.stop_reason, StopReason::MaxIterations);
        assert_eq!(response.iterations, 3);
    }

    #[test]
    fn role_is_used_in_messages() {
        let m = Message::user("x");
        assert_eq!(m.role, Role::User);
    }
}
