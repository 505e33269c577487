use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the agent runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub summary_model: Option<ModelConfig>,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Connection and sampling parameters for one LLM endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub name: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            name: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            base_url: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Tunables for the turn loop and context manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub default_mode: PermissionMode,
    /// Hard bound on turns per `process_user_input` call. §4.8.
    pub max_turns: u32,
    /// Fraction of the available budget at which compaction triggers. §4.9.
    pub compaction_threshold: f64,
    /// Size of the verbatim tail preserved by compaction. §4.9.
    pub recent_message_count: usize,
    /// Cap on summarization candidates per compaction pass. §4.9.
    pub max_summary_messages: usize,
    /// Tokens reserved for the model's own output when computing the budget.
    pub reserved_output_tokens: usize,
    /// Max entries retained by the undo checkpointer. §4.4.
    pub checkpoint_cap: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_mode: PermissionMode::Normal,
            max_turns: 25,
            compaction_threshold: 0.85,
            recent_message_count: 10,
            max_summary_messages: 15,
            reserved_output_tokens: 4096,
            checkpoint_cap: 50,
        }
    }
}

/// Operating mode for the permission engine. §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    #[default]
    Normal,
    AutoEdit,
    Yolo,
    Plan,
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PermissionMode::Normal => "normal",
            PermissionMode::AutoEdit => "auto-edit",
            PermissionMode::Yolo => "yolo",
            PermissionMode::Plan => "plan",
        };
        f.write_str(s)
    }
}

/// Declarative allow/deny/ask rules. §4.3. Evaluated in declaration order
/// after the hard-coded deny-first patterns and mode short-circuits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub rules: Vec<PermissionRuleConfig>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One user-declared permission rule, matched in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRuleConfig {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub tool_pattern: Option<String>,
    #[serde(default)]
    pub path_pattern: Option<String>,
    #[serde(default)]
    pub command_pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Allow,
    Deny,
    Ask,
}

/// Process-wide state that would otherwise be an ambient singleton. §9.
#[derive(Debug, Clone)]
pub struct Environment {
    pub config_dir: PathBuf,
    pub debug: bool,
    pub journal_path: PathBuf,
}

impl Environment {
    pub fn new(config_dir: PathBuf, debug: bool) -> Self {
        let journal_path = config_dir.join("sessions.ndjson");
        Self {
            config_dir,
            debug,
            journal_path,
        }
    }

    pub fn discover(debug: bool) -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("weave");
        Self::new(config_dir, debug)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
