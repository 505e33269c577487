//! The single concrete [`crate::ModelProvider`] implementation: an
//! OpenAI-compatible `/chat/completions` client with SSE tool-call
//! reassembly, retrying non-streaming calls, and cooperative cancellation.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::provider::{ModelProvider, StreamEventStream};
use crate::types::{
    CancellationToken, CompletionRequest, Message, Response, StopReason, StreamEvent, ToolCall,
    Usage,
};

/// How the API key is attached to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>` — the common case.
    Bearer,
    /// `api-key: <key>` — Azure OpenAI style.
    ApiKeyHeader,
    /// No auth header at all — local servers (Ollama, llama.cpp, vLLM).
    None,
}

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

pub struct OpenAICompatProvider {
    driver_name: String,
    model: String,
    api_key: Option<String>,
    chat_url: String,
    auth_style: AuthStyle,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    pub fn new(
        driver_name: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: &str,
        auth_style: AuthStyle,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            driver_name: driver_name.into(),
            model: model.into(),
            api_key,
            chat_url: format!("{base}/chat/completions"),
            auth_style,
            client: reqwest::Client::new(),
        }
    }

    fn apply_auth(&self, mut req: reqwest::RequestBuilder) -> anyhow::Result<reqwest::RequestBuilder> {
        req = match self.auth_style {
            AuthStyle::Bearer => {
                let key = self.api_key.as_deref().context("API key not configured")?;
                req.bearer_auth(key)
            }
            AuthStyle::ApiKeyHeader => {
                let key = self.api_key.as_deref().context("API key not configured")?;
                req.header("api-key", key)
            }
            AuthStyle::None => req,
        };
        Ok(req)
    }

    fn build_body(&self, req: &CompletionRequest, stream: bool) -> Value {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);
        if let Some(system) = &req.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(build_openai_messages(&req.messages));

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
            "max_tokens": req.max_output_tokens,
        });
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }
}

#[async_trait]
impl ModelProvider for OpenAICompatProvider {
    fn name(&self) -> &str {
        &self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    /// Exponential backoff (base 1s, doubled per attempt, up to 3 retries) on
    /// 429/5xx; 401 is immediately fatal; any other status does not retry.
    /// Retry is skipped once `req.cancel` is set. §4.5.
    async fn create_message(&self, req: CompletionRequest) -> anyhow::Result<Response> {
        let body = self.build_body(&req, false);
        let mut attempt = 0u32;
        loop {
            if req.cancel.is_cancelled() {
                bail!("request cancelled");
            }
            let http_req = self.apply_auth(self.client.post(&self.chat_url).json(&body))?;
            let result = http_req.send().await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let v: Value = resp.json().await.context("parsing completion response")?;
                    return Ok(parse_completion_response(&v));
                }
                Ok(resp) if resp.status().as_u16() == 401 => {
                    bail!("invalid API key");
                }
                Ok(resp)
                    if (resp.status().as_u16() == 429 || resp.status().is_server_error())
                        && attempt < MAX_RETRIES =>
                {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    warn!(attempt, status = %resp.status(), ?delay, "retrying completion request");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    bail!("{} error {status}: {text}", self.driver_name);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    warn!(attempt, error = %e, ?delay, "retrying completion request after transport error");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(e).context(format!("{} request failed", self.driver_name)),
            }
        }
    }

    /// Does not retry: a failure mid-stream surfaces to the caller with
    /// whatever partial emissions were already yielded. §4.5.
    async fn stream_message(&self, req: CompletionRequest) -> anyhow::Result<StreamEventStream> {
        let body = self.build_body(&req, true);
        debug!(driver = %self.driver_name, model = %self.model, "opening stream");

        let http_req = self.apply_auth(self.client.post(&self.chat_url).json(&body))?;
        let resp = http_req
            .send()
            .await
            .with_context(|| format!("{} request failed", self.driver_name))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("{} error {status}: {text}", self.driver_name);
        }

        let cancel = req.cancel.clone();
        let byte_stream = resp.bytes_stream();

        // Stage 1: byte chunks → complete SSE `data:` lines parsed into raw JSON.
        let json_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let items: Vec<anyhow::Result<RawEvent>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_sse_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(items))
            })
            .flat_map(futures::stream::iter);

        // Stage 2: raw JSON chunks → the public StreamEvent contract, with
        // tool-call reassembly keyed by chunk index. §4.5.
        let reassembled = json_stream
            .scan(ReassemblyState::default(), move |state, item| {
                if cancel.is_cancelled() {
                    return std::future::ready(None);
                }
                let events = match item {
                    Ok(RawEvent::Done) => state.finish(),
                    Ok(RawEvent::Chunk(v)) => state.ingest(&v),
                    Err(e) => vec![Err(e)],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(reassembled))
    }

    fn supports_tools(&self) -> bool {
        true
    }
}

/// A single parsed SSE payload: either a JSON chunk or the `[DONE]` sentinel.
enum RawEvent {
    Chunk(Value),
    Done,
}

/// Drain complete `\n`-terminated SSE `data:` lines from `buf`, leaving any
/// trailing incomplete line for the next chunk. §4.5.
fn drain_sse_lines(buf: &mut String) -> Vec<anyhow::Result<RawEvent>> {
    let mut out = Vec::new();
    while let Some(pos) = buf.find('\n') {
        let line = buf[..pos].trim_end_matches('\r').to_string();
        *buf = buf[pos + 1..].to_string();
        let Some(data) = line.strip_prefix("data: ").map(str::trim) else { continue };
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            out.push(Ok(RawEvent::Done));
            continue;
        }
        match serde_json::from_str::<Value>(data) {
            Ok(v) => out.push(Ok(RawEvent::Chunk(v))),
            Err(e) => out.push(Err(anyhow::anyhow!("malformed SSE JSON: {e}"))),
        }
    }
    out
}

struct PendingCall {
    id: String,
    name: String,
    args: String,
    started: bool,
}

#[derive(Default)]
struct ReassemblyState {
    pending: HashMap<u32, PendingCall>,
    saw_tool_call: bool,
    finish_reason: Option<String>,
}

impl ReassemblyState {
    fn ingest(&mut self, v: &Value) -> Vec<anyhow::Result<StreamEvent>> {
        let mut out = Vec::new();

        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            out.push(Ok(StreamEvent::Usage(Usage {
                input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
                cache_read_tokens: usage
                    .get("prompt_tokens_details")
                    .and_then(|d| d.get("cached_tokens"))
                    .and_then(|t| t.as_u64())
                    .map(|t| t as u32),
                cache_write_tokens: None,
            })));
        }

        let choice = &v["choices"][0];
        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(reason.to_string());
        }

        let delta = &choice["delta"];
        if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0) as u32;
                let id = tc["id"].as_str().unwrap_or("").to_string();
                let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
                let args_frag = tc["function"]["arguments"].as_str().unwrap_or("");

                self.saw_tool_call = true;
                let entry = self.pending.entry(index).or_insert_with(|| PendingCall {
                    id: String::new(),
                    name: String::new(),
                    args: String::new(),
                    started: false,
                });
                if !id.is_empty() {
                    entry.id = id;
                }
                if !name.is_empty() {
                    entry.name = name;
                }
                if !entry.started && !entry.id.is_empty() && !entry.name.is_empty() {
                    entry.started = true;
                    out.push(Ok(StreamEvent::ToolCallStart {
                        id: entry.id.clone(),
                        name: entry.name.clone(),
                    }));
                }
                if !args_frag.is_empty() {
                    entry.args.push_str(args_frag);
                    out.push(Ok(StreamEvent::ToolCallDelta { content: args_frag.to_string() }));
                }
            }
        } else if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                out.push(Ok(StreamEvent::TextDelta { content: text.to_string() }));
            }
        }

        out
    }

    /// Emitted once, when the underlying stream sends `[DONE]`. Flushes every
    /// still-pending tool call and maps the finish reason to a stop reason.
    fn finish(&mut self) -> Vec<anyhow::Result<StreamEvent>> {
        let mut out = Vec::new();
        let mut indices: Vec<u32> = self.pending.keys().copied().collect();
        indices.sort_unstable();
        for idx in indices.drain(..) {
            let call = self.pending.remove(&idx).unwrap();
            let parsed = if call.args.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                match serde_json::from_str(&call.args) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "malformed tool-call arguments, treating as empty");
                        Value::Object(Default::default())
                    }
                }
            };
            out.push(Ok(StreamEvent::ToolCallEnd { id: call.id, name: call.name, input: parsed }));
        }

        let stop_reason = match self.finish_reason.as_deref() {
            Some("tool_calls") | Some("tool_use") => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            _ if self.saw_tool_call => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        };
        out.push(Ok(StreamEvent::Done { stop_reason }));
        out
    }
}

fn parse_completion_response(v: &Value) -> Response {
    let choice = &v["choices"][0];
    let content = choice["message"]["content"].as_str().unwrap_or("").to_string();
    let finish_reason = choice["finish_reason"].as_str().unwrap_or("stop");
    let stop_reason = match finish_reason {
        "tool_calls" | "tool_use" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    };
    let usage = v.get("usage").map(|u| Usage {
        input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
        cache_read_tokens: None,
        cache_write_tokens: None,
    });
    Response { content, usage: usage.unwrap_or_default(), stop_reason }
}

/// Convert the conversation log into OpenAI wire-format messages, coalescing
/// consecutive assistant tool calls into one `tool_calls` array per message.
fn build_openai_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m {
            Message::User { content } => json!({ "role": "user", "content": content }),
            Message::Assistant { content, tool_calls } if tool_calls.is_empty() => {
                json!({ "role": "assistant", "content": content })
            }
            Message::Assistant { content, tool_calls } => {
                let calls: Vec<Value> = tool_calls
                    .iter()
                    .map(|c: &ToolCall| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.input.to_string() },
                        })
                    })
                    .collect();
                json!({ "role": "assistant", "content": content, "tool_calls": calls })
            }
            Message::ToolResult { tool_use_id, content, .. } => {
                json!({ "role": "tool", "tool_call_id": tool_use_id, "content": content })
            }
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
