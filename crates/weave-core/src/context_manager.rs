use std::sync::Arc;

use tracing::warn;
use weave_model::{CancellationToken, CompletionRequest, Message, ModelProvider, TokenCounter};

use crate::message_log::MessageLog;

const SUMMARY_SYSTEM_PROMPT: &str = "Summarize the conversation excerpt below concisely and factually, \
preserving any decisions, file paths, and outstanding tasks mentioned. Do not invent details.";
const SUMMARY_MAX_OUTPUT_TOKENS: u32 = 1200;
const FALLBACK_SUMMARY: &str = "Previous context was compacted.";

/// Statistics about a single compaction pass, surfaced to the UI. §4.9.
#[derive(Debug, Clone, Copy)]
pub struct CompactionReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub dropped_candidates: usize,
}

/// Tunables governing when and how the conversation log is compacted. §4.9.
pub struct ContextManagerConfig {
    pub max_context_tokens: usize,
    pub reserved_output_tokens: usize,
    pub compaction_threshold: f64,
    pub recent_message_count: usize,
    pub max_summary_messages: usize,
    pub summary_model: String,
}

/// Keeps the conversation log within the model's context window by
/// summarizing older turns once usage crosses a trigger fraction of the
/// available budget. §4.9.
pub struct ContextManager {
    config: ContextManagerConfig,
    summarizer: Arc<dyn ModelProvider>,
    token_counter: Arc<dyn TokenCounter>,
}

impl ContextManager {
    pub fn new(config: ContextManagerConfig, summarizer: Arc<dyn ModelProvider>, token_counter: Arc<dyn TokenCounter>) -> Self {
        Self { config, summarizer, token_counter }
    }

    /// Tokens left for conversation history after reserving room for the
    /// model's own output, the system prompt, and tool definitions.
    pub fn available(&self, system_prompt_tokens: usize, tool_defs_tokens: usize) -> usize {
        self.config
            .max_context_tokens
            .saturating_sub(self.config.reserved_output_tokens)
            .saturating_sub(system_prompt_tokens)
            .saturating_sub(tool_defs_tokens)
    }

    fn trigger(&self, available: usize) -> usize {
        (available as f64 * self.config.compaction_threshold).floor() as usize
    }

    /// Compact the log if it is at or past the trigger fraction of the
    /// available budget; otherwise return immediately. §4.9.
    pub async fn ensure_within_budget(
        &self,
        log: &mut MessageLog,
        system_prompt_tokens: usize,
        tool_defs_tokens: usize,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<CompactionReport>> {
        let available = self.available(system_prompt_tokens, tool_defs_tokens);
        let used = log.estimate_tokens_in(self.token_counter.as_ref());
        if used <= self.trigger(available) {
            return Ok(None);
        }
        Ok(Some(self.compact(log, available, cancel).await?))
    }

    /// Summarize non-recent, non-pinned messages into one synthetic message,
    /// rebuild the log as `pinned (non-recent) + summary + recent window`,
    /// and fall back to `log.truncate` if still over budget. §4.9.
    async fn compact(&self, log: &mut MessageLog, available: usize, cancel: &CancellationToken) -> anyhow::Result<CompactionReport> {
        let tokens_before = log.estimate_tokens_in(self.token_counter.as_ref());
        let total = log.count();
        let recent_start = total.saturating_sub(self.config.recent_message_count);
        let pinned = log.pinned_indices();

        let mut candidates: Vec<usize> = (0..recent_start).filter(|i| !pinned.contains(i)).collect();
        let dropped_candidates = candidates.len().saturating_sub(self.config.max_summary_messages);
        if candidates.len() > self.config.max_summary_messages {
            candidates = candidates.split_off(candidates.len() - self.config.max_summary_messages);
            warn!(dropped_candidates, "dropping oldest compaction candidates beyond max_summary_messages");
        }

        let summary_text = if candidates.is_empty() {
            FALLBACK_SUMMARY.to_string()
        } else {
            let rendered = log.render_candidates(&candidates);
            self.summarize(rendered, cancel).await
        };

        let all_messages = log.all();
        let mut rebuilt: Vec<Message> = Vec::new();
        let mut rebuilt_pins: Vec<usize> = Vec::new();

        for &i in pinned.iter().filter(|&&i| i < recent_start) {
            rebuilt_pins.push(rebuilt.len());
            rebuilt.push(all_messages[i].clone());
        }
        rebuilt.push(Message::user(format!("[Context summary]\n{summary_text}")));
        let recent_offset = rebuilt.len();
        rebuilt.extend(all_messages[recent_start..].iter().cloned());

        // Pins that fall inside the recent window survive the rebuild too —
        // not just the pinned-before-recent entries already tracked above.
        for &i in pinned.iter().filter(|&&i| i >= recent_start) {
            rebuilt_pins.push(recent_offset + (i - recent_start));
        }

        log.set_all(rebuilt);
        for idx in rebuilt_pins {
            log.pin(idx);
        }

        if log.estimate_tokens_in(self.token_counter.as_ref()) > available {
            log.truncate(available, self.token_counter.as_ref());
        }

        Ok(CompactionReport { tokens_before, tokens_after: log.estimate_tokens_in(self.token_counter.as_ref()), dropped_candidates })
    }

    async fn summarize(&self, rendered_candidates: String, cancel: &CancellationToken) -> String {
        let req = CompletionRequest {
            model: self.config.summary_model.clone(),
            system: Some(SUMMARY_SYSTEM_PROMPT.to_string()),
            messages: vec![Message::user(rendered_candidates)],
            tools: vec![],
            max_output_tokens: SUMMARY_MAX_OUTPUT_TOKENS,
            temperature: Some(0.0),
            thinking_budget: None,
            cancel: cancel.clone(),
        };
        match self.summarizer.create_message(req).await {
            Ok(resp) => resp.content,
            Err(e) => {
                warn!(error = %e, "context summarization call failed, using synthetic summary");
                FALLBACK_SUMMARY.to_string()
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use weave_model::{HeuristicTokenCounter, ScriptedProvider};

    use super::*;

    fn manager(summarizer: Arc<dyn ModelProvider>) -> ContextManager {
        ContextManager::new(
            ContextManagerConfig {
                max_context_tokens: 1000,
                reserved_output_tokens: 100,
                compaction_threshold: 0.85,
                recent_message_count: 3,
                max_summary_messages: 15,
                summary_model: "summary-model".into(),
            },
            summarizer,
            Arc::new(HeuristicTokenCounter),
        )
    }

    fn fat_log(n: usize) -> MessageLog {
        let mut log = MessageLog::new();
        log.add_user("pinned anchor message establishing the whole conversation topic");
        for i in 0..n {
            log.add_assistant(format!("assistant turn number {i} with a decent amount of padding text"), vec![]);
        }
        log
    }

    #[tokio::test]
    async fn ensure_within_budget_noop_when_under_trigger() {
        let cm = manager(Arc::new(ScriptedProvider::always_text("summary")));
        let mut log = MessageLog::new();
        log.add_user("short");
        let report = cm.ensure_within_budget(&mut log, 0, 0, &CancellationToken::new()).await.unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn compaction_preserves_pinned_index_zero_and_recent_window() {
        let cm = manager(Arc::new(ScriptedProvider::always_text("a tidy summary")));
        let mut log = fat_log(200);
        let report = cm.ensure_within_budget(&mut log, 0, 0, &CancellationToken::new()).await.unwrap();
        assert!(report.is_some());
        assert!(log.is_pinned(0));
        assert_eq!(log.all()[0].text(), "pinned anchor message establishing the whole conversation topic");
        // Recent window (last 3) must survive verbatim at the tail.
        let all = log.all();
        assert!(all.last().unwrap().text().contains("assistant turn number 199"));
    }

    #[tokio::test]
    async fn compaction_inserts_synthetic_summary_message() {
        let cm = manager(Arc::new(ScriptedProvider::always_text("the gist of it")));
        let mut log = fat_log(200);
        cm.ensure_within_budget(&mut log, 0, 0, &CancellationToken::new()).await.unwrap();
        assert!(log.all().iter().any(|m| m.text().contains("the gist of it")));
    }

    #[tokio::test]
    async fn compaction_falls_back_to_synthetic_text_on_summarizer_error() {
        struct Failing;
        #[async_trait::async_trait]
        impl ModelProvider for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            fn model_name(&self) -> &str {
                "failing-model"
            }
            async fn create_message(&self, _req: CompletionRequest) -> anyhow::Result<weave_model::Response> {
                anyhow::bail!("summarizer unavailable")
            }
            async fn stream_message(&self, _req: CompletionRequest) -> anyhow::Result<weave_model::StreamEventStream> {
                anyhow::bail!("not used")
            }
        }

        let cm = manager(Arc::new(Failing));
        let mut log = fat_log(200);
        cm.ensure_within_budget(&mut log, 0, 0, &CancellationToken::new()).await.unwrap();
        assert!(log.all().iter().any(|m| m.text().contains(FALLBACK_SUMMARY)));
    }

    #[tokio::test]
    async fn compaction_trims_candidates_beyond_max_summary_messages() {
        let cm = ContextManager::new(
            ContextManagerConfig {
                max_context_tokens: 1000,
                reserved_output_tokens: 100,
                compaction_threshold: 0.85,
                recent_message_count: 2,
                max_summary_messages: 3,
                summary_model: "summary-model".into(),
            },
            Arc::new(ScriptedProvider::always_text("summary")),
            Arc::new(HeuristicTokenCounter),
        );
        let mut log = fat_log(200);
        let report = cm.ensure_within_budget(&mut log, 0, 0, &CancellationToken::new()).await.unwrap().unwrap();
        assert!(report.dropped_candidates > 0);
    }

    #[tokio::test]
    async fn compaction_preserves_pin_inside_recent_window() {
        let cm = manager(Arc::new(ScriptedProvider::always_text("a tidy summary")));
        let mut log = fat_log(200);
        // recent_message_count is 3, so index `total - 2` falls inside the
        // recent window that survives the rebuild verbatim.
        let pin_index = log.count() - 2;
        log.pin(pin_index);
        cm.ensure_within_budget(&mut log, 0, 0, &CancellationToken::new()).await.unwrap();
        let pinned_text = log.all()[log.pinned_indices()[1]].text().to_string();
        assert!(log.pinned_indices().len() >= 2);
        assert!(pinned_text.contains("assistant turn number"));
    }

    #[test]
    fn available_subtracts_all_reservations() {
        let cm = manager(Arc::new(ScriptedProvider::always_text("x")));
        assert_eq!(cm.available(50, 25), 1000 - 100 - 50 - 25);
    }
}
