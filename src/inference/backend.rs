//! Reasoning backend capability interface.
//!
//! The runtime never talks HTTP directly: path executors and the agent handle
//! only see this trait. `InferenceClient` is the production implementation.

use async_trait::async_trait;

use super::errors::InferenceError;
use super::types::{ChatMessage, Completion, ToolDefinition};

/// An asynchronous, cancellable LLM completion capability.
///
/// Cancellation is cooperative: callers drop the returned future.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Human-readable backend name (for logs and diagnostics).
    fn name(&self) -> &str;

    /// Complete a conversation, optionally offering `tools` to the model.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Completion, InferenceError>;
}

/// Backend used when no model is configured.
///
/// Every call fails with a config error, so reasoning tiers degrade into the
/// controller's apology path while instant and fact tiers keep working.
#[derive(Debug, Default, Clone)]
pub struct UnconfiguredBackend;

#[async_trait]
impl ReasoningBackend for UnconfiguredBackend {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn complete(
        &self,
        _messages: Vec<ChatMessage>,
        _tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Completion, InferenceError> {
        Err(InferenceError::ConfigError {
            reason: "no reasoning model configured (set `models:` in the runtime config)"
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_backend_always_fails() {
        let backend = UnconfiguredBackend;
        let err = backend
            .complete(vec![ChatMessage::user("hello")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::ConfigError { .. }));
    }
}
