use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::types::{CompletionRequest, Response, StreamEvent};

pub type StreamEventStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// Uniform adapter over heterogeneous LLM wire protocols. §4.5, §6.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Non-streaming completion, used for summarization calls. Retries with
    /// exponential backoff on transient failures (§4.5); a 401 is fatal.
    async fn create_message(&self, req: CompletionRequest) -> anyhow::Result<Response>;

    /// Streaming completion, used for agent turns. Does not retry: a stream
    /// failure surfaces to the caller with partial emissions already yielded.
    async fn stream_message(&self, req: CompletionRequest) -> anyhow::Result<StreamEventStream>;

    /// Fast token estimate for a single string (delegates to the shared
    /// heuristic counter unless a provider knows a cheaper/better path).
    fn estimate_tokens(&self, text: &str) -> usize {
        use crate::token_counter::TokenCounter;
        crate::token_counter::HeuristicTokenCounter.estimate(text)
    }

    /// Maximum context window for `model`, looked up from the static catalog.
    fn max_context_tokens(&self, model: &str) -> Option<u32> {
        crate::catalog::lookup(self.name(), model).map(|e| e.context_window)
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn supports_thinking(&self) -> bool {
        false
    }

    fn supports_caching(&self) -> bool {
        false
    }
}
