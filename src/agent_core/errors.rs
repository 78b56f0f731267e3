//! Agent core error types.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use super::types::ComplexityTier;
use crate::inference::errors::InferenceError;
use crate::tools::errors::ToolError;

// ─── ErrorKind ──────────────────────────────────────────────────────────────

/// Flat error tag carried on execution results and in statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No routing rule matched; the router used its default tier.
    ClassificationAmbiguous,
    ExecutorTimeout,
    ToolInvocationError,
    ReasoningBackendError,
    /// The multi-step loop hit its iteration limit.
    MaxIterationsExceeded,
    /// The persistent agent handle's runtime is gone.
    SessionUnusable,
    NoActiveSession,
    /// A tier declined the query (e.g. no canned reply, no fact binding).
    CannotHandle,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClassificationAmbiguous => "classification_ambiguous",
            Self::ExecutorTimeout => "executor_timeout",
            Self::ToolInvocationError => "tool_invocation_error",
            Self::ReasoningBackendError => "reasoning_backend_error",
            Self::MaxIterationsExceeded => "max_iterations_exceeded",
            Self::SessionUnusable => "session_unusable",
            Self::NoActiveSession => "no_active_session",
            Self::CannotHandle => "cannot_handle",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── ExecutorError ──────────────────────────────────────────────────────────

/// Why a path executor failed to produce a response.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The tier's hard timeout expired; in-flight work was dropped.
    #[error("{tier} timed out after {timeout_ms}ms")]
    Timeout { tier: ComplexityTier, timeout_ms: u64 },

    #[error("tool '{tool}' failed: {reason}")]
    ToolInvocation { tool: String, reason: String },

    #[error("reasoning backend error: {reason}")]
    Backend { reason: String },

    #[error("{tier} cannot handle this query: {reason}")]
    CannotHandle { tier: ComplexityTier, reason: String },

    #[error("agent handle unusable: {reason}")]
    SessionUnusable { reason: String },

    #[error("no active session")]
    NoActiveSession,
}

impl ExecutorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::ExecutorTimeout,
            Self::ToolInvocation { .. } => ErrorKind::ToolInvocationError,
            Self::Backend { .. } => ErrorKind::ReasoningBackendError,
            Self::CannotHandle { .. } => ErrorKind::CannotHandle,
            Self::SessionUnusable { .. } => ErrorKind::SessionUnusable,
            Self::NoActiveSession => ErrorKind::NoActiveSession,
        }
    }

    pub fn cannot_handle(tier: ComplexityTier, reason: impl Into<String>) -> Self {
        Self::CannotHandle {
            tier,
            reason: reason.into(),
        }
    }
}

impl From<InferenceError> for ExecutorError {
    fn from(e: InferenceError) -> Self {
        Self::Backend {
            reason: e.to_string(),
        }
    }
}

impl From<ToolError> for ExecutorError {
    fn from(e: ToolError) -> Self {
        let tool = match &e {
            ToolError::UnknownTool { name } | ToolError::DuplicateTool { name } => name.clone(),
            ToolError::InvalidArguments { tool, .. } | ToolError::ExecutionFailed { tool, .. } => {
                tool.clone()
            }
        };
        Self::ToolInvocation {
            tool,
            reason: e.to_string(),
        }
    }
}

// ─── ControllerError ────────────────────────────────────────────────────────

/// The only failures `process_command` reports to a caller. Everything else
/// becomes response text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("no active session: call start_session first")]
    NoActiveSession,

    #[error("another turn is already in progress")]
    Busy,
}

// ─── JournalError ───────────────────────────────────────────────────────────

/// Session journal (SQLite) failures. Logged, never fatal to a turn.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("journal I/O error: {reason}")]
    Io { reason: String },
}

impl From<rusqlite::Error> for JournalError {
    fn from(e: rusqlite::Error) -> Self {
        JournalError::Database {
            reason: e.to_string(),
        }
    }
}

impl From<std::io::Error> for JournalError {
    fn from(e: std::io::Error) -> Self {
        JournalError::Io {
            reason: e.to_string(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
