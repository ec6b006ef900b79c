//! Streaming-mode ReAct loop: same state machine as [`super::loop_`], but the
//! provider exposes a chunk stream and the driver emits [`StreamEvent`]s on
//! a bounded channel instead of returning a single [`Response`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info_span, Instrument};

use crate::executor::ParallelToolExecutor;
use crate::guard::{LoopDetector, TokenTracker};
use crate::message::{Message, Request, Response, StopReason, StreamEvent, ToolCallRecord};
use crate::provider::Provider;

use super::Cancellation;

/// Suggested buffer size for the streaming event channel.
pub const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Spawns the driver task and returns the receiving end. The sender (and so
/// the channel) is always closed by the producer task before it returns,
/// even on error.
pub fn run_streamed(
    provider: Arc<dyn Provider>,
    executor: ParallelToolExecutor,
    request: Request,
    cancellation: Cancellation,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(
        drive(provider, executor, request, cancellation, tx).instrument(info_span!("react.run_stream")),
    );
    rx
}

/// Two-phase send: non-blocking first, then a blocking send so a slow
/// receiver only stalls this producer task, never the whole runtime.
async fn emit(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(event)) => tx.send(event).await.is_ok(),
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Terminal error events on an already-cancelled pipeline are best-effort:
/// dropped if the buffer is full rather than blocking a dead consumer.
fn emit_best_effort(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) {
    let _ = tx.try_send(event);
}

async fn drive(
    provider: Arc<dyn Provider>,
    executor: ParallelToolExecutor,
    request: Request,
    cancellation: Cancellation,
    tx: mpsc::Sender<StreamEvent>,
) {
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
        if cancellation.is_cancelled() || Instant::now() >= deadline {
            emit_best_effort(&tx, StreamEvent::Error("cancelled or timed out".to_string()));
            return;
        }

        let mut rx = tokio::select! {
            rx = provider.stream(&messages, &request.tools) => rx,
            () = tokio::time::sleep_until(deadline) => {
                emit_best_effort(&tx, StreamEvent::Error("deadline exceeded".to_string()));
                return;
            }
            () = cancellation.cancelled() => {
                emit_best_effort(&tx, StreamEvent::Error("cancelled".to_string()));
                return;
            }
        };
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut latest_usage = None;

        loop {
            let chunk = tokio::select! {
                chunk = rx.recv() => chunk,
                () = tokio::time::sleep_until(deadline) => {
                    emit_best_effort(&tx, StreamEvent::Error("deadline exceeded".to_string()));
                    return;
                }
                () = cancellation.cancelled() => {
                    emit_best_effort(&tx, StreamEvent::Error("cancelled".to_string()));
                    return;
                }
            };
            let Some(chunk) = chunk else {
                break;
            };

            if let Some(err) = chunk.error {
                // Drain remaining chunks so the provider-side producer never
                // blocks trying to send into a channel nobody reads.
                while rx.recv().await.is_some() {}
                if !emit(&tx, StreamEvent::Error(err)).await {
                    return;
                }
                return;
            }

            if let Some(delta) = chunk.text_delta {
                content.push_str(&delta);
                if !emit(&tx, StreamEvent::Text(delta)).await {
                    return;
                }
            }
            if let Some(calls) = chunk.tool_calls {
                tool_calls = calls;
            }
            if let Some(usage) = chunk.usage {
                latest_usage = Some(usage);
            }
        }

        if let Some(usage) = latest_usage {
            tracker.add(usage);
            if !emit(&tx, StreamEvent::Usage(tracker.used())).await {
                return;
            }
        }

        if tracker.exceeded() {
            emit_best_effort(&tx, StreamEvent::Error("token-budget-exceeded".to_string()));
            return;
        }

        if tool_calls.is_empty() {
            let response = Response {
                content,
                tool_calls: records,
                usage: tracker.used(),
                iterations: iteration,
                stop_reason: StopReason::Complete,
                error: None,
            };
            let _ = emit(&tx, StreamEvent::Done(response)).await;
            return;
        }

        let repeated = tool_calls
            .iter()
            .any(|call| detector.register(&call.name, &call.arguments, request.config.repetition_threshold));
        if repeated {
            emit_best_effort(&tx, StreamEvent::Error("loop-detected".to_string()));
            return;
        }

        messages.push(Message::assistant(content, tool_calls.clone()));

        for call in &tool_calls {
            let placeholder = ToolCallRecord {
                call: call.clone(),
                output: crate::message::ToolOutput::ok(String::new()),
                duration: std::time::Duration::ZERO,
                panicked: false,
            };
            if !emit(&tx, StreamEvent::ToolStart(placeholder)).await {
                return;
            }
        }

        let new_records = executor.execute(&tool_calls).await;
        for record in &new_records {
            messages.push(Message::tool(record.call.id.clone(), &record.output));
            if !emit(&tx, StreamEvent::ToolEnd(record.clone())).await {
                return;
            }
        }
        records.extend(new_records);
    }

    let response = Response {
        content: String::new(),
        tool_calls: records,
        usage: tracker.used(),
        iterations: request.config.max_iterations,
        stop_reason: StopReason::MaxIterations,
        error: Some("max-iterations-reached".to_string()),
    };
    let _ = emit(&tx, StreamEvent::Done(response)).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::message::{LoopConfig, TokenUsage, ToolCall};
    use crate::policy::PolicyContext;
    use crate::provider::{Completion, CompletionChunk, FinishReason};
    use crate::tool::registry::ToolRegistry;

    struct OneShotStreamProvider {
        chunks: Vec<CompletionChunk>,
    }

    #[async_trait]
    impl Provider for OneShotStreamProvider {
        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[crate::tool::ToolDefinition],
        ) -> Result<Completion, String> {
            unimplemented!("streaming test does not call complete")
        }

        async fn stream(
            &self,
            _messages: &[Message],
            _tools: &[crate::tool::ToolDefinition],
        ) -> mpsc::Receiver<CompletionChunk> {
            let (tx, rx) = mpsc::channel(self.chunks.len().max(1));
            for chunk in self.chunks.clone() {
                let _ = tx.send(chunk).await;
            }
            rx
        }

        fn context_window_size(&self) -> usize {
            128_000
        }

        fn model_name(&self) -> &str {
            "one-shot-stream"
        }
    }

    fn request() -> Request {
        Request {
            messages: vec![Message::user("hi")],
            system_prompt: None,
            tools: vec![],
            config: LoopConfig::new(5, 0, Duration::from_secs(10), 0),
        }
    }

    #[tokio::test]
    async fn text_only_stream_emits_text_then_done() {
        let provider = Arc::new(OneShotStreamProvider {
            chunks: vec![
                CompletionChunk {
                    text_delta: Some("hello ".to_string()),
                    ..Default::default()
                },
                CompletionChunk {
                    text_delta: Some("world".to_string()),
                    usage: Some(TokenUsage::new(1, 1, 2)),
                    finish_reason: Some(FinishReason::Stop),
                    ..Default::default()
                },
            ],
        });
        let executor = ParallelToolExecutor::new(Arc::new(ToolRegistry::new()), PolicyContext::Dm, Value::Null);
        let mut rx = run_streamed(provider, executor, request(), Cancellation::new());

        let mut texts = Vec::new();
        let mut done = None;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Text(t) => texts.push(t),
                StreamEvent::Done(r) => {
                    done = Some(r);
                    break;
                }
                StreamEvent::Usage(_) => {}
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(texts.join(""), "hello world");
        let response = done.expect("stream must terminate with Done");
        assert_eq!(response.content, "hello world");
        assert_eq!(response.stop_reason, StopReason::Complete);
    }

    #[tokio::test]
    async fn cancelled_stream_emits_error_and_closes() {
        let provider = Arc::new(OneShotStreamProvider { chunks: vec![] });
        let executor = ParallelToolExecutor::new(Arc::new(ToolRegistry::new()), PolicyContext::Dm, Value::Null);
        let cancellation = Cancellation::new();
        cancellation.cancel();
        let mut rx = run_streamed(provider, executor, request(), cancellation);

        match rx.recv().await {
            Some(StreamEvent::Error(_)) => {}
            other => panic!("expected an error event, got {other:?}"),
        }
        assert!(rx.recv().await.is_none(), "channel must close after the terminal event");
    }
}
