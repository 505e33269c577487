use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;

use crate::checkpoint::Checkpointer;
use crate::permission::{Decision, PermissionEngine};
use crate::registry::ToolRegistry;
use weave_model::{ToolCall, ToolCategory};

/// Approximate character budget per token, matching the 4:1 heuristic used
/// throughout the token counter. §4.7, §4.1.
const CHARS_PER_TOKEN: usize = 4;
const VERBATIM_TOKEN_LIMIT: usize = 500;
const HEAD_TRUNCATE_TOKEN_LIMIT: usize = 2000;
const PER_LINE_CHAR_LIMIT: usize = 2000;

/// Invoked when a tool call needs interactive approval (category `Ask`).
/// Returns `true` to approve for this call only. The absence of a callback
/// means every `Ask` decision denies the call. §4.7, §7.
pub type AskCallback = Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>;

pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
    permissions: Arc<PermissionEngine>,
    checkpoint: Arc<Checkpointer>,
    ask: Option<AskCallback>,
}

/// The result of routing one call through the precheck + execution passes.
#[derive(Debug, Clone)]
pub struct RoutedResult {
    pub id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolRouter {
    pub fn new(registry: Arc<ToolRegistry>, permissions: Arc<PermissionEngine>, checkpoint: Arc<Checkpointer>) -> Self {
        Self { registry, permissions, checkpoint, ask: None }
    }

    pub fn with_ask_callback(mut self, ask: AskCallback) -> Self {
        self.ask = Some(ask);
        self
    }

    /// Run every call through precheck (resolve + permission) and then
    /// execution (parallel for readonly, sequential otherwise), returning
    /// results in the same order as `calls`. §4.7.
    pub async fn execute(&self, calls: &[ToolCall]) -> Vec<RoutedResult> {
        enum Precheck<'a> {
            Ready { call: &'a ToolCall, category: ToolCategory },
            Rejected { id: String, reason: String },
        }

        let prechecked: Vec<Precheck> = calls
            .iter()
            .map(|call| match self.registry.get(&call.name) {
                None => Precheck::Rejected { id: call.id.clone(), reason: format!("unknown tool: {}", call.name) },
                Some(tool) => {
                    let category = tool.category();
                    match self.permissions.evaluate(&call.name, category, &call.input) {
                        Decision::Allowed => Precheck::Ready { call, category },
                        Decision::Denied { reason } => Precheck::Rejected { id: call.id.clone(), reason },
                        Decision::Ask => match &self.ask {
                            Some(cb) if cb(&call.name, &call.input) => Precheck::Ready { call, category },
                            _ => Precheck::Rejected { id: call.id.clone(), reason: "denied: not approved".into() },
                        },
                    }
                }
            })
            .collect();

        let mut results: Vec<Option<RoutedResult>> = vec![None; calls.len()];
        let mut readonly_idx = Vec::new();
        let mut other_idx: Vec<(usize, ToolCategory)> = Vec::new();

        for (i, p) in prechecked.iter().enumerate() {
            match p {
                Precheck::Rejected { id, reason } => {
                    results[i] = Some(RoutedResult { id: id.clone(), content: reason.clone(), is_error: true });
                }
                Precheck::Ready { category, .. } if *category == ToolCategory::Readonly => readonly_idx.push(i),
                Precheck::Ready { category, .. } => other_idx.push((i, *category)),
            }
        }

        // Readonly calls run concurrently.
        let readonly_futures = readonly_idx.iter().map(|&i| {
            let call = match &prechecked[i] {
                Precheck::Ready { call, .. } => call,
                _ => unreachable!(),
            };
            self.run_one(call)
        });
        for (i, result) in readonly_idx.iter().zip(join_all(readonly_futures).await) {
            results[*i] = Some(result);
        }

        // Write/execute/interactive calls run sequentially. Only write and
        // execute calls get a checkpoint snapshot first — §4.7 requires one
        // "before executing any write or execute call", not interactive ones.
        for (i, category) in other_idx {
            let call = match &prechecked[i] {
                Precheck::Ready { call, .. } => call,
                _ => unreachable!(),
            };
            if matches!(category, ToolCategory::Write | ToolCategory::Execute) {
                if let Some(path) = extract_path(&call.input) {
                    self.checkpoint.snapshot(std::path::Path::new(path));
                }
            }
            results[i] = Some(self.run_one(call).await);
        }

        results.into_iter().map(|r| r.expect("every call produces exactly one result")).collect()
    }

    async fn run_one(&self, call: &ToolCall) -> RoutedResult {
        let tool = self.registry.get(&call.name).expect("resolved during precheck");
        let output = tool.execute(&call.input).await;
        RoutedResult { id: call.id.clone(), content: normalize_output(&output.content), is_error: output.is_error }
    }
}

fn extract_path(input: &Value) -> Option<&str> {
    ["path", "file_path", "filePath"].iter().find_map(|k| input.get(k).and_then(|v| v.as_str())).filter(|s| !s.is_empty())
}

/// Trim an overlong line in place, keeping it under [`PER_LINE_CHAR_LIMIT`]
/// characters with an inline marker. Applied before the overall size tiers.
fn truncate_long_lines(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.len() <= PER_LINE_CHAR_LIMIT {
                line.to_string()
            } else {
                format!("{}... [truncated {} characters]", &line[..PER_LINE_CHAR_LIMIT], line.len() - PER_LINE_CHAR_LIMIT)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalize tool output to the three size tiers from §4.7:
/// - ≤500 tokens: returned verbatim.
/// - 500-2000 tokens: head-truncated with a `"... [truncated N characters] ..."` marker.
/// - >2000 tokens: head+tail, each ~500 tokens, joined by a truncation marker.
fn normalize_output(raw: &str) -> String {
    let text = truncate_long_lines(raw);
    let approx_tokens = text.len().div_ceil(CHARS_PER_TOKEN).max(1);

    if approx_tokens <= VERBATIM_TOKEN_LIMIT {
        return text;
    }

    let head_chars = VERBATIM_TOKEN_LIMIT * CHARS_PER_TOKEN;
    if approx_tokens <= HEAD_TRUNCATE_TOKEN_LIMIT {
        let cut = char_boundary_at(&text, head_chars);
        let dropped = text.len() - cut;
        return format!("{}... [truncated {dropped} characters] ...", &text[..cut]);
    }

    let window_chars = VERBATIM_TOKEN_LIMIT * CHARS_PER_TOKEN;
    let head_end = char_boundary_at(&text, window_chars);
    let tail_start = char_boundary_at(&text, text.len().saturating_sub(window_chars));
    let dropped = tail_start.saturating_sub(head_end);
    format!("{}\n... [truncated {dropped} characters] ...\n{}", &text[..head_end], &text[tail_start..])
}

fn char_boundary_at(s: &str, idx: usize) -> usize {
    let mut idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
