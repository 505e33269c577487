use weave_model::Usage;

/// Events emitted during one `process_user_input` call, unioning model
/// stream events with router/tool execution events. §9.
///
/// Consumers (a CLI renderer, a future TUI) subscribe to these instead of
/// polling; the core never assumes a particular presentation layer.
#[derive(Debug, Clone)]
pub enum AgentLoopEvent {
    TextDelta(String),
    ToolCallStarted { id: String, name: String },
    ToolCallEnded { id: String, name: String, is_error: bool },
    Usage(Usage),
    ContextCompacted { tokens_before: usize, tokens_after: usize },
    Error(String),
    TurnComplete,
}
