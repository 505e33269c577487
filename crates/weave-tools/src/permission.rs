use std::collections::HashSet;
use std::sync::Mutex;

use regex::Regex;
use serde_json::Value;

use weave_config::{PermissionMode, PermissionRuleConfig, RuleType, ToolsConfig};
use weave_model::ToolCategory;

/// Hard-coded patterns matched against the `command` field of a tool's input,
/// independent of any declared rule or mode — except `yolo`, which overrides
/// even these (§9 open question: flagged as a safety concern, followed as
/// specified). Evaluated before anything else. §4.3, §8 S6.
const HARDCODED_DENY_PATTERNS: &[&str] = &[
    "rm -rf /*",
    "sudo rm*",
    ":(){:|:&};:*",
    "mkfs*",
    "dd if=/dev/zero*",
    "dd *of=/dev/sd*",
    "dd *of=/dev/nvme*",
    "chmod 777 /*",
];

/// The outcome of evaluating one tool call against the permission engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Ask,
    Denied { reason: String },
}

/// One declarative rule: matched in declaration order once hard-coded denies
/// and mode short-circuits have been checked. §4.3.
pub struct PermissionRule {
    pub rule_type: RuleType,
    tool_pattern: Option<Regex>,
    path_pattern: Option<Regex>,
    command_pattern: Option<Regex>,
}

impl PermissionRule {
    pub fn from_config(cfg: &PermissionRuleConfig) -> Self {
        Self {
            rule_type: cfg.rule_type,
            tool_pattern: cfg.tool_pattern.as_deref().and_then(glob_to_regex),
            path_pattern: cfg.path_pattern.as_deref().and_then(glob_to_regex),
            command_pattern: cfg.command_pattern.as_deref().and_then(glob_to_regex),
        }
    }

    /// A rule matches only when every pattern it declares matches; an absent
    /// pattern field is not a constraint.
    fn matches(&self, tool_name: &str, path: Option<&str>, command: Option<&str>) -> bool {
        if let Some(re) = &self.tool_pattern {
            if !re.is_match(tool_name) {
                return false;
            }
        }
        if let Some(re) = &self.path_pattern {
            match path {
                Some(p) if re.is_match(p) => {}
                _ => return false,
            }
        }
        if let Some(re) = &self.command_pattern {
            match command {
                Some(c) if re.is_match(c) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Evaluates permission for a tool call. §4.3.
///
/// Order: `yolo` mode short-circuit, hard-coded deny patterns, `plan` mode
/// short-circuit, session allow-list, declared rules (first match wins),
/// then category defaults.
pub struct PermissionEngine {
    mode: PermissionMode,
    rules: Vec<PermissionRule>,
    deny_patterns: Vec<Regex>,
    session_allow: Mutex<HashSet<String>>,
}

impl PermissionEngine {
    pub fn new(mode: PermissionMode, rules: Vec<PermissionRule>) -> Self {
        let deny_patterns = HARDCODED_DENY_PATTERNS.iter().filter_map(|p| glob_to_regex(p)).collect();
        Self { mode, rules, deny_patterns, session_allow: Mutex::new(HashSet::new()) }
    }

    pub fn from_config(mode: PermissionMode, cfg: &ToolsConfig) -> Self {
        let rules = cfg.rules.iter().map(PermissionRule::from_config).collect();
        Self::new(mode, rules)
    }

    /// Remember that `tool_name` was approved for the remainder of the
    /// session — subsequent asks for the same tool are auto-allowed.
    pub fn allow_for_session(&self, tool_name: &str) {
        self.session_allow.lock().unwrap().insert(tool_name.to_string());
    }

    pub fn evaluate(&self, tool_name: &str, category: ToolCategory, input: &Value) -> Decision {
        let command = extract_str(input, &["command", "cmd"]);
        let path = extract_str(input, &["path", "file_path", "filePath"]);

        if self.mode == PermissionMode::Yolo {
            return Decision::Allowed;
        }

        if let Some(cmd) = command {
            if self.deny_patterns.iter().any(|re| re.is_match(cmd)) {
                return Decision::Denied { reason: format!("command matches a hard-coded deny pattern: {cmd}") };
            }
        }

        if self.mode == PermissionMode::Plan {
            return if category == ToolCategory::Readonly {
                Decision::Allowed
            } else {
                Decision::Denied { reason: "plan mode permits only readonly tools".into() }
            };
        }

        if self.session_allow.lock().unwrap().contains(tool_name) {
            return Decision::Allowed;
        }

        for rule in &self.rules {
            if rule.matches(tool_name, path, command) {
                return match rule.rule_type {
                    RuleType::Allow => Decision::Allowed,
                    RuleType::Deny => Decision::Denied { reason: format!("denied by rule for {tool_name}") },
                    RuleType::Ask => Decision::Ask,
                };
            }
        }

        match category {
            ToolCategory::Readonly | ToolCategory::Interactive => Decision::Allowed,
            ToolCategory::Write => {
                if self.mode == PermissionMode::AutoEdit {
                    Decision::Allowed
                } else {
                    Decision::Ask
                }
            }
            ToolCategory::Execute => Decision::Ask,
        }
    }
}

fn extract_str<'a>(input: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| input.get(k).and_then(|v| v.as_str()))
}

/// Convert a simple shell glob pattern to a [`Regex`]. Only `*` (match
/// anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
