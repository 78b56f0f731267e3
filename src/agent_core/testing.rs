//! Scripted test doubles for the reasoning backend and tool capabilities.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::inference::backend::ReasoningBackend;
use crate::inference::errors::InferenceError;
use crate::inference::types::{ChatMessage, Completion, ToolCall, ToolDefinition};
use crate::tools::errors::ToolError;
use crate::tools::registry::{ToolCapability, ToolDescriptor};

// ─── ScriptedBackend ────────────────────────────────────────────────────────

/// What one backend call received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
}

impl RecordedRequest {
    /// All message contents joined, for substring assertions.
    pub fn text(&self) -> String {
        self.messages
            .iter()
            .filter_map(|m| m.content.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn had_tools(&self) -> bool {
        !self.tool_names.is_empty()
    }
}

/// Backend that replays a fixed script of completions.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<Completion, InferenceError>>>,
    fallback: Option<Completion>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<Completion, InferenceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Answer every call with the same text.
    pub fn always(text: &str) -> Self {
        Self::new(vec![]).with_fallback(Completion::text(text))
    }

    /// Returned once the script is exhausted (instead of an error).
    pub fn with_fallback(mut self, completion: Completion) -> Self {
        self.fallback = Some(completion);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Completion, InferenceError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages,
            tool_names: tools
                .unwrap_or_default()
                .into_iter()
                .map(|t| t.function.name)
                .collect(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => self.fallback.clone().ok_or(InferenceError::ConfigError {
                reason: "script exhausted".into(),
            }),
        }
    }
}

/// Shorthand for a completion that requests one tool call.
pub fn tool_call(id: &str, name: &str, arguments: Value) -> Completion {
    Completion::tool_calls(vec![ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }])
}

// ─── FnTool ─────────────────────────────────────────────────────────────────

type ToolFn = dyn Fn(Value) -> Result<Value, ToolError> + Send + Sync;

/// Tool backed by a closure, counting its invocations.
pub struct FnTool {
    f: Box<ToolFn>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FnTool {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            f: Box::new(f),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn arc<F>(f: F) -> Arc<dyn ToolCapability>
    where
        F: Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Arc::new(Self::new(f))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolCapability for FnTool {
    async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.f)(arguments)
    }
}

/// Descriptor with an empty argument schema around `capability`.
pub fn simple_tool(
    name: &str,
    description: &str,
    capability: Arc<dyn ToolCapability>,
) -> ToolDescriptor {
    ToolDescriptor::new(
        name,
        description,
        serde_json::json!({ "type": "object", "properties": {} }),
        capability,
    )
}
