//! Reasoning backend — the LLM capability the runtime consumes.
//!
//! This module handles all communication with the model endpoint:
//! - The `ReasoningBackend` trait consumed by executors and the agent handle
//! - An OpenAI-compatible `InferenceClient` with a fallback chain
//! - Model configuration loading from a models YAML file
//!
//! The client speaks the OpenAI Chat Completions API, making the model
//! interchangeable via config.

pub mod backend;
pub mod client;
pub mod config;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use backend::{ReasoningBackend, UnconfiguredBackend};
pub use client::InferenceClient;
pub use config::{ModelConfig, ModelsConfig};
pub use errors::InferenceError;
pub use types::{ChatMessage, Completion, Role, ToolCall, ToolDefinition};
