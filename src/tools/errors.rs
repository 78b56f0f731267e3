//! Tool catalog error types.

use thiserror::Error;

/// Errors that can occur while looking up or invoking a tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool not found in the catalog.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// Tool call arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The tool ran and reported a failure.
    #[error("tool '{tool}' failed: {reason}")]
    ExecutionFailed { tool: String, reason: String },

    /// A tool with the same name is already registered.
    #[error("tool '{name}' is already registered")]
    DuplicateTool { name: String },
}

impl ToolError {
    pub fn failed(tool: &str, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}
