use std::sync::{Arc, Mutex as StdMutex};

use anyhow::bail;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{error, info};

use weave_model::{CancellationToken, CompletionRequest, Message, ModelProvider, StopReason, StreamEvent, ToolCall, ToolDefinition};
use weave_tools::ToolRouter;

use crate::context_manager::ContextManager;
use crate::events::AgentLoopEvent;
use crate::message_log::MessageLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Running,
}

pub type EventCallback = Arc<dyn Fn(AgentLoopEvent) + Send + Sync>;

/// Turn-loop orchestrator: the component `process_user_input` belongs to.
/// §4.8.
///
/// One loop owns one conversation. A second call to `process_user_input`
/// while a turn is already in flight fails immediately rather than
/// interleaving — see [`Self::abort`] for the concurrency-safe way to stop
/// an in-flight turn.
pub struct AgentLoop {
    provider: Arc<dyn ModelProvider>,
    router: Option<Arc<ToolRouter>>,
    context_manager: ContextManager,
    log: Mutex<MessageLog>,
    state: Mutex<LoopState>,
    cancel: StdMutex<CancellationToken>,
    model: String,
    system_prompt: Option<String>,
    tools: Vec<ToolDefinition>,
    max_turns: u32,
    max_output_tokens: u32,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        router: Option<Arc<ToolRouter>>,
        context_manager: ContextManager,
        model: String,
        system_prompt: Option<String>,
        tools: Vec<ToolDefinition>,
        max_turns: u32,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            provider,
            router,
            context_manager,
            log: Mutex::new(MessageLog::new()),
            state: Mutex::new(LoopState::Idle),
            cancel: StdMutex::new(CancellationToken::new()),
            model,
            system_prompt,
            tools,
            max_turns,
            max_output_tokens,
        }
    }

    /// Request cancellation of the in-flight turn, if any. Safe to call
    /// concurrently with `process_user_input`; does not remove any messages
    /// already appended to the log. §5, §9.
    pub fn abort(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    pub async fn message_count(&self) -> usize {
        self.log.lock().await.count()
    }

    /// The full conversation so far, in order — the shape a caller journals
    /// as a session snapshot. §6.
    pub async fn messages(&self) -> Vec<Message> {
        self.log.lock().await.all()
    }

    /// Run the turn loop for one user input, returning the final assistant
    /// response text. Re-entrant calls while a turn is running fail
    /// immediately. §4.8.
    pub async fn process_user_input(&self, input: impl Into<String>, on_event: Option<EventCallback>) -> anyhow::Result<String> {
        {
            let mut state = self.state.lock().await;
            if *state == LoopState::Running {
                bail!("agent loop is already processing a turn");
            }
            *state = LoopState::Running;
        }

        let result = self.run_turns(input.into(), on_event.as_ref()).await;

        *self.state.lock().await = LoopState::Idle;

        if let Err(e) = &result {
            error!(error = %e, "agent loop turn failed");
            if let Some(cb) = &on_event {
                cb(AgentLoopEvent::Error(e.to_string()));
            }
        }
        result
    }

    async fn run_turns(&self, input: String, on_event: Option<&EventCallback>) -> anyhow::Result<String> {
        // §5: one cancellation token per `process_user_input` call. A prior
        // `abort()` must not permanently disable every later call.
        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap() = cancel.clone();

        {
            let mut log = self.log.lock().await;
            log.add_user(input);
        }

        let mut turn_count: u32 = 0;
        let mut final_response = String::new();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if turn_count >= self.max_turns {
                let mut log = self.log.lock().await;
                log.add_assistant(
                    format!("[Reached maximum turns limit ({}). Use /continue to resume.]", self.max_turns),
                    vec![],
                );
                break;
            }
            turn_count += 1;

            {
                let mut log = self.log.lock().await;
                let system_prompt_tokens = self.system_prompt.as_deref().map(|s| s.len().div_ceil(4)).unwrap_or(0);
                let tool_defs_tokens: usize = self.tools.iter().map(|t| t.input_schema.to_string().len().div_ceil(4)).sum();
                if let Some(report) = self
                    .context_manager
                    .ensure_within_budget(&mut log, system_prompt_tokens, tool_defs_tokens, &cancel)
                    .await?
                {
                    info!(tokens_before = report.tokens_before, tokens_after = report.tokens_after, "compacted context");
                    if let Some(cb) = on_event {
                        cb(AgentLoopEvent::ContextCompacted { tokens_before: report.tokens_before, tokens_after: report.tokens_after });
                    }
                }
            }

            let messages = self.log.lock().await.all();
            let req = CompletionRequest {
                model: self.model.clone(),
                system: self.system_prompt.clone(),
                messages,
                tools: self.tools.clone(),
                max_output_tokens: self.max_output_tokens,
                temperature: None,
                thinking_budget: None,
                cancel: cancel.clone(),
            };

            let mut stream = self.provider.stream_message(req).await?;
            let mut buffer = String::new();
            let mut pending_tool_calls: Vec<ToolCall> = Vec::new();
            let mut stop_reason = StopReason::EndTurn;
            let mut stream_completed = false;

            while let Some(event) = stream.next().await {
                match event? {
                    StreamEvent::TextDelta { content } => {
                        buffer.push_str(&content);
                        if let Some(cb) = on_event {
                            cb(AgentLoopEvent::TextDelta(content));
                        }
                    }
                    StreamEvent::ToolCallStart { id, name } => {
                        if let Some(cb) = on_event {
                            cb(AgentLoopEvent::ToolCallStarted { id, name });
                        }
                    }
                    StreamEvent::ToolCallDelta { .. } => {}
                    StreamEvent::ToolCallEnd { id, name, input } => {
                        pending_tool_calls.push(ToolCall { id, name, input });
                    }
                    StreamEvent::Usage(usage) => {
                        if let Some(cb) = on_event {
                            cb(AgentLoopEvent::Usage(usage));
                        }
                    }
                    StreamEvent::Error { message } => bail!(message),
                    StreamEvent::Done { stop_reason: sr } => {
                        stop_reason = sr;
                        stream_completed = true;
                        break;
                    }
                }
            }

            // §5: a stream that exits before `Done` (e.g. cancellation) never
            // appends its partial assistant message to the log.
            if !stream_completed {
                break;
            }

            final_response = buffer.clone();
            {
                let mut log = self.log.lock().await;
                log.add_assistant(buffer, pending_tool_calls.clone());
            }

            if pending_tool_calls.is_empty() {
                if let Some(cb) = on_event {
                    cb(AgentLoopEvent::TurnComplete);
                }
                break;
            }
            debug_assert!(matches!(stop_reason, StopReason::ToolUse));

            let results = match &self.router {
                None => pending_tool_calls
                    .iter()
                    .map(|c| weave_tools::RoutedResult { id: c.id.clone(), content: "no tool router configured".into(), is_error: true })
                    .collect(),
                Some(router) => router.execute(&pending_tool_calls).await,
            };

            let mut log = self.log.lock().await;
            for result in &results {
                log.add_tool_result(result.id.clone(), result.content.clone(), result.is_error);
            }
            drop(log);

            for (call, result) in pending_tool_calls.iter().zip(results.iter()) {
                if let Some(cb) = on_event {
                    cb(AgentLoopEvent::ToolCallEnded { id: call.id.clone(), name: call.name.clone(), is_error: result.is_error });
                }
            }
        }

        Ok(final_response)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use weave_model::{HeuristicTokenCounter, ScriptedProvider};

    use super::*;
    use crate::context_manager::ContextManagerConfig;

    fn context_manager(summarizer: Arc<dyn ModelProvider>) -> ContextManager {
        ContextManager::new(
            ContextManagerConfig {
                max_context_tokens: 100_000,
                reserved_output_tokens: 4096,
                compaction_threshold: 0.85,
                recent_message_count: 10,
                max_summary_messages: 15,
                summary_model: "summary-model".into(),
            },
            summarizer,
            Arc::new(HeuristicTokenCounter),
        )
    }

    fn make_loop(provider: Arc<dyn ModelProvider>, router: Option<Arc<ToolRouter>>, max_turns: u32) -> AgentLoop {
        AgentLoop::new(provider.clone(), router, context_manager(provider), "test-model".into(), Some("system".into()), vec![], max_turns, 4096)
    }

    // ── S1: streaming two-turn tool cycle, §8 ────────────────────────────────

    #[tokio::test]
    async fn two_turn_tool_cycle_produces_final_text() {
        let provider: Arc<dyn ModelProvider> =
            Arc::new(ScriptedProvider::tool_then_text("c1", "echo", json!({"x": 1}), "final answer"));
        let mut registry = weave_tools::ToolRegistry::new();
        struct EchoTool;
        #[async_trait::async_trait]
        impl weave_tools::Tool for EchoTool {
            fn name(&self) -> &str {
                "echo"
            }
            fn description(&self) -> &str {
                "echo"
            }
            fn input_schema(&self) -> serde_json::Value {
                json!({})
            }
            fn category(&self) -> weave_model::ToolCategory {
                weave_model::ToolCategory::Readonly
            }
            async fn execute(&self, _input: &serde_json::Value) -> weave_tools::ToolOutput {
                weave_tools::ToolOutput::ok("echoed")
            }
        }
        registry.register(EchoTool).unwrap();
        let permissions = weave_tools::PermissionEngine::new(weave_config::PermissionMode::Normal, vec![]);
        let router = Arc::new(ToolRouter::new(Arc::new(registry), Arc::new(permissions), Arc::new(weave_tools::Checkpointer::new(50))));

        let agent = make_loop(provider, Some(router), 25);
        let response = agent.process_user_input("do the thing", None).await.unwrap();
        assert_eq!(response, "final answer");
        assert_eq!(agent.message_count().await, 4); // user, assistant(tool), tool-result, assistant(final)
    }

    // ── S2: max-turns bound, §8 ───────────────────────────────────────────────

    #[tokio::test]
    async fn max_turns_bound_stops_infinite_tool_loop() {
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::always_tool_call("c1", "loop_tool"));
        let mut registry = weave_tools::ToolRegistry::new();
        struct LoopTool;
        #[async_trait::async_trait]
        impl weave_tools::Tool for LoopTool {
            fn name(&self) -> &str {
                "loop_tool"
            }
            fn description(&self) -> &str {
                "loops"
            }
            fn input_schema(&self) -> serde_json::Value {
                json!({})
            }
            fn category(&self) -> weave_model::ToolCategory {
                weave_model::ToolCategory::Readonly
            }
            async fn execute(&self, _input: &serde_json::Value) -> weave_tools::ToolOutput {
                weave_tools::ToolOutput::ok("again")
            }
        }
        registry.register(LoopTool).unwrap();
        let permissions = weave_tools::PermissionEngine::new(weave_config::PermissionMode::Normal, vec![]);
        let router = Arc::new(ToolRouter::new(Arc::new(registry), Arc::new(permissions), Arc::new(weave_tools::Checkpointer::new(50))));

        let agent = make_loop(provider, Some(router), 3);
        let response = agent.process_user_input("go forever", None).await.unwrap();
        assert!(response.contains("Reached maximum turns limit (3)"));
    }

    // ── S3: tool error continuation, §8 ───────────────────────────────────────

    #[tokio::test]
    async fn tool_error_result_still_continues_to_next_turn() {
        let provider: Arc<dyn ModelProvider> =
            Arc::new(ScriptedProvider::tool_then_text("c1", "missing_tool", json!({}), "handled the error"));
        let registry = weave_tools::ToolRegistry::new(); // no tools registered
        let permissions = weave_tools::PermissionEngine::new(weave_config::PermissionMode::Normal, vec![]);
        let router = Arc::new(ToolRouter::new(Arc::new(registry), Arc::new(permissions), Arc::new(weave_tools::Checkpointer::new(50))));

        let agent = make_loop(provider, Some(router), 25);
        let response = agent.process_user_input("call a missing tool", None).await.unwrap();
        assert_eq!(response, "handled the error");
    }

    #[tokio::test]
    async fn no_router_configured_synthesizes_error_results() {
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::tool_then_text("c1", "anything", json!({}), "recovered"));
        let agent = make_loop(provider, None, 25);
        let response = agent.process_user_input("x", None).await.unwrap();
        assert_eq!(response, "recovered");
    }

    #[tokio::test]
    async fn reentrant_call_while_running_fails() {
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::always_text("ok"));
        let agent = Arc::new(make_loop(provider, None, 25));
        *agent.state.lock().await = LoopState::Running;
        let err = agent.process_user_input("x", None).await.unwrap_err();
        assert!(err.to_string().contains("already processing"));
    }

    #[tokio::test]
    async fn event_callback_receives_text_deltas() {
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::always_text("hello there"));
        let agent = make_loop(provider, None, 25);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let cb: EventCallback = Arc::new(move |ev| {
            if matches!(ev, AgentLoopEvent::TextDelta(_)) {
                seen2.fetch_add(1, Ordering::SeqCst);
            }
        });
        agent.process_user_input("hi", Some(cb)).await.unwrap();
        assert!(seen.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn abort_sets_cancellation_without_removing_messages() {
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::always_text("ok"));
        let agent = make_loop(provider, None, 25);
        agent.abort();
        assert!(agent.cancel.lock().unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn abort_before_call_does_not_permanently_cancel_future_turns() {
        // §5: one cancellation token per `process_user_input` call — a prior
        // abort() must not brick every later call.
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::always_text("ok"));
        let agent = make_loop(provider, None, 25);
        agent.abort();
        let response = agent.process_user_input("hi", None).await.unwrap();
        assert_eq!(response, "ok");
    }

    #[tokio::test]
    async fn stream_ending_without_done_does_not_append_partial_assistant_message() {
        // Simulates a cancelled/truncated stream: no `Done` event ever arrives.
        let provider: Arc<dyn ModelProvider> =
            Arc::new(ScriptedProvider::new(vec![vec![StreamEvent::TextDelta { content: "partial".into() }]]));
        let agent = make_loop(provider, None, 25);
        let response = agent.process_user_input("hi", None).await.unwrap();
        assert_eq!(response, "");
        assert_eq!(agent.message_count().await, 1); // only the user message was appended
    }
}
