pub mod checkpoint;
pub mod permission;
pub mod registry;
pub mod router;
pub mod tool;

pub use checkpoint::Checkpointer;
pub use permission::{Decision, PermissionEngine, PermissionRule};
pub use registry::{DuplicateToolError, ToolRegistry};
pub use router::{AskCallback, RoutedResult, ToolRouter};
pub use tool::{Tool, ToolOutput};
pub use weave_model::{ToolCall, ToolCategory, ToolDefinition};
