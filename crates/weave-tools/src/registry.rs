use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::tool::Tool;
use weave_model::ToolDefinition;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("a tool named {0:?} is already registered")]
pub struct DuplicateToolError(pub String);

/// Central registry holding all available tools. Registration of a duplicate
/// name fails — the registry never silently overwrites. §4.6.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), DuplicateToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(DuplicateToolError(name));
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
