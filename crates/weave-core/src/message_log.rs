use weave_model::{Message, TokenCounter};

struct Entry {
    message: Message,
    pinned: bool,
}

/// The ordered conversation log for one session, with per-message pinning.
/// §4.2.
///
/// Pins are stored as a flag on each entry rather than an external index set
/// (§9 design note): splicing/compaction never needs to remap a separate
/// index collection, it only ever drops or keeps entries in place.
#[derive(Default)]
pub struct MessageLog {
    entries: Vec<Entry>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user message. If the log was empty beforehand, the new entry
    /// is pinned — it becomes the permanent index-0 anchor for compaction.
    /// §4.2 invariant.
    pub fn add_user(&mut self, content: impl Into<String>) {
        let pin_it = self.entries.is_empty();
        self.entries.push(Entry { message: Message::user(content), pinned: pin_it });
    }

    pub fn add_assistant(&mut self, content: impl Into<String>, tool_calls: Vec<weave_model::ToolCall>) {
        self.entries.push(Entry { message: Message::assistant(content, tool_calls), pinned: false });
    }

    pub fn add_tool_result(&mut self, tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) {
        self.entries.push(Entry { message: Message::tool_result(tool_use_id, content, is_error), pinned: false });
    }

    pub fn all(&self) -> Vec<Message> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_assistant_content(&self) -> Option<String> {
        self.entries
            .iter()
            .rev()
            .find(|e| matches!(e.message, Message::Assistant { .. }))
            .map(|e| e.message.text().to_string())
    }

    /// Indices (in current order) of pinned entries.
    pub fn pinned_indices(&self) -> Vec<usize> {
        self.entries.iter().enumerate().filter(|(_, e)| e.pinned).map(|(i, _)| i).collect()
    }

    pub fn is_pinned(&self, index: usize) -> bool {
        self.entries.get(index).map(|e| e.pinned).unwrap_or(false)
    }

    /// Mark the entry at `index` as pinned. Panics if `index` is out of
    /// bounds — §4.2 classifies an out-of-range pin as a state violation, a
    /// programmer error that should raise immediately rather than be
    /// silently ignored.
    pub fn pin(&mut self, index: usize) {
        self.entries[index].pinned = true;
    }

    /// Replace the entire message list. Pins whose index is still in range
    /// of the new list are preserved there; index 0 is always re-pinned
    /// (the permanent anchor). §4.2. Callers whose rebuild reorders pinned
    /// entries (e.g. [`crate::context_manager`]'s compaction) still need to
    /// re-pin the relevant new indices explicitly afterward.
    pub fn set_all(&mut self, messages: Vec<Message>) {
        let old_pinned = self.pinned_indices();
        let new_len = messages.len();
        self.entries = messages.into_iter().map(|message| Entry { message, pinned: false }).collect();
        for i in old_pinned {
            if i < new_len {
                self.entries[i].pinned = true;
            }
        }
        if new_len > 0 {
            self.entries[0].pinned = true;
        }
    }

    /// Render a subset of entries as `"[index] role: content"` lines, the
    /// wire format fed to the summarization model during compaction. §4.9.
    pub fn render_candidates(&self, indices: &[usize]) -> String {
        indices
            .iter()
            .filter_map(|&i| self.entries.get(i).map(|e| (i, e)))
            .map(|(i, e)| format!("[{i}] {}: {}", role_label(&e.message), e.message.text()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Drop oldest non-pinned entries until `counter.estimate_messages` over
    /// the remaining entries is at or under `max_tokens`. A no-op once no
    /// further unpinned entries remain, even if still over budget. §4.9.
    pub fn truncate(&mut self, max_tokens: usize, counter: &dyn TokenCounter) {
        loop {
            let total = counter.estimate_messages(&self.all());
            if total <= max_tokens {
                return;
            }
            let Some(victim) = self.entries.iter().position(|e| !e.pinned) else {
                return;
            };
            self.entries.remove(victim);
        }
    }

    pub fn estimate_tokens_in(&self, counter: &dyn TokenCounter) -> usize {
        counter.estimate_messages(&self.all())
    }
}

fn role_label(m: &Message) -> &'static str {
    match m {
        Message::User { .. } => "user",
        Message::Assistant { .. } => "assistant",
        Message::ToolResult { .. } => "tool",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
