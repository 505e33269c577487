use crate::types::Message;

/// Per-message framing overhead added on top of raw content tokens, modelling
/// the wire-format wrapper (role field, message boundaries) every provider
/// charges for. §4.1.
const PER_MESSAGE_OVERHEAD: usize = 4;
const PER_TOOL_RESULT_OVERHEAD: usize = 2;
const PER_TOOL_CALL_OVERHEAD: usize = 10;
const ASSISTANT_PRIMING_OVERHEAD: usize = 3;

/// Estimates token counts for strings and message arrays. §4.1.
///
/// Precision is not required; monotonicity (more content ⇒ more tokens) is.
/// The default implementation below is the `ceil(len/4)` heuristic described
/// in the spec; a BPE-backed counter can be swapped in by implementing this
/// trait without touching call sites.
pub trait TokenCounter: Send + Sync {
    fn estimate(&self, text: &str) -> usize;

    fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }

    fn estimate_message(&self, message: &Message) -> usize {
        let mut total = self.estimate(message.text()) + PER_MESSAGE_OVERHEAD;
        match message {
            Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
                total += ASSISTANT_PRIMING_OVERHEAD;
                for call in tool_calls {
                    total += PER_TOOL_CALL_OVERHEAD
                        + self.estimate(&call.name)
                        + self.estimate(&call.input.to_string());
                }
            }
            Message::ToolResult { .. } => total += PER_TOOL_RESULT_OVERHEAD,
            _ => {}
        }
        total
    }
}

/// `ceil(len(text)/4)`, minimum 1. No BPE encoder is bundled; this heuristic
/// is deliberately conservative rather than exact. §9 (open question).
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn estimate(&self, text: &str) -> usize {
        text.len().div_ceil(4).max(1)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
