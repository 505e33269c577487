//! Deterministic providers for driving the agent loop without network
//! access. Used by weave-core's scenario tests (§8 S1-S6).

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::provider::{ModelProvider, StreamEventStream};
use crate::types::{CompletionRequest, Response, StopReason, StreamEvent, Usage};

/// Echoes the last user message back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn create_message(&self, req: CompletionRequest) -> anyhow::Result<Response> {
        let reply = last_user_text(&req);
        Ok(Response {
            content: format!("MOCK: {reply}"),
            usage: Usage { input_tokens: 10, output_tokens: 10, ..Default::default() },
            stop_reason: StopReason::EndTurn,
        })
    }

    async fn stream_message(&self, req: CompletionRequest) -> anyhow::Result<StreamEventStream> {
        let reply = last_user_text(&req);
        let events: Vec<anyhow::Result<StreamEvent>> = vec![
            Ok(StreamEvent::TextDelta { content: format!("MOCK: {reply}") }),
            Ok(StreamEvent::Usage(Usage { input_tokens: 10, output_tokens: 10, ..Default::default() })),
            Ok(StreamEvent::Done { stop_reason: StopReason::EndTurn }),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

fn last_user_text(req: &CompletionRequest) -> String {
    req.messages
        .iter()
        .rev()
        .find(|m| matches!(m, crate::types::Message::User { .. }))
        .map(|m| m.text().to_string())
        .unwrap_or_else(|| "[no input]".to_string())
}

/// A pre-scripted provider. Each call to `stream_message`/`create_message`
/// pops the next script from the front of the queue, letting tests specify
/// exact event sequences — including tool calls — without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Vec<StreamEvent>>>>,
    name: String,
    /// The last [`CompletionRequest`] seen, for test assertions.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedProvider {
    /// Build a provider from a list of response scripts. The outer `Vec` is
    /// the ordered list of calls; the inner `Vec` is the event sequence
    /// emitted for that call.
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            name: "scripted-mock".into(),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![
            StreamEvent::TextDelta { content: reply.into() },
            StreamEvent::Usage(Usage { input_tokens: 5, output_tokens: 5, ..Default::default() }),
            StreamEvent::Done { stop_reason: StopReason::EndTurn },
        ]])
    }

    /// Convenience: a tool call followed by a text reply on the next turn.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        let id = tool_id.into();
        let name = tool_name.into();
        Self::new(vec![
            vec![
                StreamEvent::ToolCallStart { id: id.clone(), name: name.clone() },
                StreamEvent::ToolCallEnd { id, name, input: args },
                StreamEvent::Done { stop_reason: StopReason::ToolUse },
            ],
            vec![
                StreamEvent::TextDelta { content: final_text.into() },
                StreamEvent::Done { stop_reason: StopReason::EndTurn },
            ],
        ])
    }

    /// Convenience: a provider that keeps emitting a tool call forever,
    /// exercising the max-turns bound (§8 S2).
    pub fn always_tool_call(tool_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        let id = tool_id.into();
        let name = tool_name.into();
        Self {
            scripts: Arc::new(Mutex::new(vec![vec![
                StreamEvent::ToolCallStart { id: id.clone(), name: name.clone() },
                StreamEvent::ToolCallEnd { id, name, input: serde_json::json!({}) },
                StreamEvent::Done { stop_reason: StopReason::ToolUse },
            ]])),
            name: "scripted-mock-infinite".into(),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    fn next_script(&self) -> Vec<StreamEvent> {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            vec![StreamEvent::TextDelta { content: "[no more scripts]".into() }, StreamEvent::Done { stop_reason: StopReason::EndTurn }]
        } else if scripts.len() == 1 && self.name == "scripted-mock-infinite" {
            scripts[0].clone()
        } else {
            scripts.remove(0)
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn create_message(&self, req: CompletionRequest) -> anyhow::Result<Response> {
        *self.last_request.lock().unwrap() = Some(req);
        let events = self.next_script();
        let mut content = String::new();
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = Usage::default();
        for ev in events {
            match ev {
                StreamEvent::TextDelta { content: c } => content.push_str(&c),
                StreamEvent::Usage(u) => usage = u,
                StreamEvent::Done { stop_reason: sr } => stop_reason = sr,
                _ => {}
            }
        }
        Ok(Response { content, usage, stop_reason })
    }

    async fn stream_message(&self, req: CompletionRequest) -> anyhow::Result<StreamEventStream> {
        *self.last_request.lock().unwrap() = Some(req);
        let events = self.next_script();
        let wrapped: Vec<anyhow::Result<StreamEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::types::{CancellationToken, Message};

    fn req_with(text: &str) -> CompletionRequest {
        CompletionRequest {
            model: "mock-model".into(),
            system: None,
            messages: vec![Message::user(text)],
            tools: vec![],
            max_output_tokens: 1024,
            temperature: None,
            thinking_budget: None,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let p = MockProvider;
        let mut s = p.stream_message(req_with("hi")).await.unwrap();
        let first = s.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamEvent::TextDelta { content } if content.contains("MOCK: hi")));
    }

    #[tokio::test]
    async fn mock_stream_ends_with_done() {
        let p = MockProvider;
        let mut s = p.stream_message(req_with("hi")).await.unwrap();
        let mut events = Vec::new();
        while let Some(ev) = s.next().await {
            events.push(ev.unwrap());
        }
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn scripted_single_text_reply() {
        let p = ScriptedProvider::always_text("hello world");
        let mut s = p.stream_message(req_with("x")).await.unwrap();
        let ev = s.next().await.unwrap().unwrap();
        assert!(matches!(ev, StreamEvent::TextDelta { content } if content == "hello world"));
    }

    #[tokio::test]
    async fn scripted_tool_then_text_two_rounds() {
        let p = ScriptedProvider::tool_then_text("call-1", "shell", serde_json::json!({"command":"ls"}), "done");

        let mut s = p.stream_message(req_with("x")).await.unwrap();
        let mut events = Vec::new();
        while let Some(ev) = s.next().await {
            events.push(ev.unwrap());
        }
        assert!(events.iter().any(|e| matches!(e, StreamEvent::ToolCallEnd { name, .. } if name == "shell")));

        let mut s2 = p.stream_message(req_with("x")).await.unwrap();
        let mut events2 = Vec::new();
        while let Some(ev) = s2.next().await {
            events2.push(ev.unwrap());
        }
        assert!(events2.iter().any(|e| matches!(e, StreamEvent::TextDelta { content } if content == "done")));
    }

    #[tokio::test]
    async fn scripted_fallback_when_scripts_exhausted() {
        let p = ScriptedProvider::new(vec![]);
        let mut s = p.stream_message(req_with("x")).await.unwrap();
        let ev = s.next().await.unwrap().unwrap();
        assert!(matches!(ev, StreamEvent::TextDelta { content } if content.contains("no more scripts")));
    }

    #[tokio::test]
    async fn scripted_always_tool_call_never_exhausts() {
        let p = ScriptedProvider::always_tool_call("c1", "loop_tool");
        for _ in 0..5 {
            let mut s = p.stream_message(req_with("x")).await.unwrap();
            let mut events = Vec::new();
            while let Some(ev) = s.next().await {
                events.push(ev.unwrap());
            }
            assert!(events.iter().any(|e| matches!(e, StreamEvent::ToolCallEnd { .. })));
        }
    }

    #[tokio::test]
    async fn last_request_is_recorded() {
        let p = ScriptedProvider::always_text("ok");
        let _ = p.stream_message(req_with("remember me")).await.unwrap();
        let last = p.last_request.lock().unwrap();
        assert_eq!(last.as_ref().unwrap().messages[0].text(), "remember me");
    }
}
