use async_trait::async_trait;
use serde_json::Value;

pub use weave_model::{ToolCall, ToolCategory, ToolDefinition};

/// Result of executing a tool. §6.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { content: msg.into(), is_error: true }
    }
}

/// Trait every built-in tool must implement. §6.
///
/// `execute` must be safe to run concurrently with other readonly-category
/// executions — the router parallelizes exactly that class of call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    fn category(&self) -> ToolCategory;

    async fn execute(&self, input: &Value) -> ToolOutput;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
            category: self.category(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Readonly
        }
        async fn execute(&self, input: &Value) -> ToolOutput {
            ToolOutput::ok(format!("echo:{input}"))
        }
    }

    #[tokio::test]
    async fn execute_returns_expected_content() {
        let out = EchoTool.execute(&json!({"x": 1})).await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("echo:"));
    }

    #[test]
    fn definition_mirrors_tool_metadata() {
        let def = EchoTool.definition();
        assert_eq!(def.name, "echo");
        assert_eq!(def.category, ToolCategory::Readonly);
    }

    #[test]
    fn tool_output_err_sets_is_error() {
        let out = ToolOutput::err("boom");
        assert!(out.is_error);
        assert_eq!(out.content, "boom");
    }
}
