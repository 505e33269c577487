use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

/// A single tool invocation requested by the model within an assistant turn.
/// `id` is provider-assigned and treated as opaque; it is the join key between
/// an assistant message's tool call and the later `ToolResult` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments, passed opaquely to the tool.
    pub input: serde_json::Value,
}

/// One entry in the conversation log. §3.
///
/// Order is significant: a `ToolResult` must eventually follow the assistant
/// message that produced the matching `tool_use_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(rename = "toolCalls", default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    #[serde(rename = "tool")]
    ToolResult {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User { content: content.into() }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant { content: content.into(), tool_calls }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult { tool_use_id: id.into(), content: content.into(), is_error }
    }

    /// Plain text content, when this message carries any (all three variants do).
    pub fn text(&self) -> &str {
        match self {
            Message::User { content } => content,
            Message::Assistant { content, .. } => content,
            Message::ToolResult { content, .. } => content,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Approximate token count for this single message's content, excluding
    /// the per-message framing overhead applied by [`crate::token_counter`].
    pub fn approx_content_tokens(&self) -> usize {
        let chars = match self {
            Message::User { content } => content.len(),
            Message::Assistant { content, tool_calls } => {
                content.len()
                    + tool_calls
                        .iter()
                        .map(|c| c.name.len() + c.input.to_string().len())
                        .sum::<usize>()
            }
            Message::ToolResult { content, .. } => content.len(),
        };
        (chars.div_ceil(4)).max(1)
    }
}

/// Category a tool falls into, used by the permission engine and router
/// scheduler. §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Readonly,
    Write,
    Execute,
    Interactive,
}

/// Static description of one tool, handed to the model as part of the
/// completion request. §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub category: ToolCategory,
}

/// Request sent to a model provider. §4.5.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_output_tokens: u32,
    pub temperature: Option<f32>,
    /// Extended-thinking token budget, if the model/provider supports it.
    pub thinking_budget: Option<u32>,
    pub cancel: CancellationToken,
}

/// Cooperative cancellation signal shared between the agent loop and the
/// in-flight provider request. Cloning shares the same underlying flag. §9.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(std::sync::Arc<std::sync::atomic::AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Why the provider stopped emitting events for this turn. §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// Token accounting for one completed turn. §3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: Option<u32>,
    pub cache_write_tokens: Option<u32>,
}

/// A non-streaming model response, used for summarization calls. §4.5.
#[derive(Debug, Clone)]
pub struct Response {
    pub content: String,
    pub usage: Usage,
    pub stop_reason: StopReason,
}

/// A single event in the uniform stream a [`crate::provider::ModelProvider`]
/// emits for one turn. §3.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta { content: String },
    ToolCallStart { id: String, name: String },
    /// Opaque argument-JSON fragment, accumulated by the caller.
    ToolCallDelta { content: String },
    ToolCallEnd { id: String, name: String, input: serde_json::Value },
    Usage(Usage),
    Done { stop_reason: StopReason },
    Error { message: String },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
