//! Agent Core — routing and orchestration for one conversation at a time.
//!
//! Submodules:
//! - `intent_router`: Rule-based classification of utterances into tiers
//! - `tool_selector`: Lexical narrowing of the tool catalog, with an LRU cache
//! - `executors`: One execution strategy per tier (instant → multi-step)
//! - `agent_handle`: Persistent agent worker bound to an async runtime
//! - `conversation`: Session lifecycle, exchange history, agent ownership
//! - `database`: SQLite journal for sessions, exchanges, tool audit
//! - `performance`: Per-tier latency accounting against targets
//! - `controller`: The entry point wiring the above into a turn
//! - `tokens`: Token estimates and tool-result compaction
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod agent_handle;
pub mod controller;
pub mod conversation;
pub mod database;
pub mod errors;
pub mod executors;
pub mod intent_router;
pub mod performance;
pub mod tokens;
pub mod tool_selector;
pub mod types;

#[cfg(test)]
pub mod testing;

// Re-exports for convenience
pub use agent_handle::{AgentHandle, AgentLease};
pub use controller::{ExecutionController, RoutingStats, APOLOGY_RESPONSE};
pub use conversation::{ConversationSession, ConversationSessionManager};
pub use database::{AuditStatus, JournalSession, SessionJournal, ToolAuditEntry};
pub use errors::{ControllerError, ErrorKind, ExecutorError, JournalError};
pub use executors::{ExecutorOutput, PathExecutor, ToolInvocationRecord, TurnContext};
pub use intent_router::{FactBinding, IntentRouter, RoutingRule, RuleMatcher};
pub use performance::{PerformanceLevel, PerformanceMonitor, PerformanceSummary, TierStats};
pub use tool_selector::{CacheStats, ScoredTool, ToolSelection, ToolSelector};
pub use types::{
    ClassificationResult, ComplexityTier, Exchange, ExecutionResult, PerformanceSample, Query,
    SessionHandle, SessionStats, SessionSummary, TierAttempt,
};
