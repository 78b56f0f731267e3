//! Path executors — one strategy per complexity tier.
//!
//! Each executor turns a [`TurnContext`] into an [`ExecutorOutput`] or fails
//! with an [`ExecutorError`]. Executors never retry and never escalate: that
//! is the controller's job, as is the hard timeout around `execute`.
//!
//! - `InstantExecutor`: canned reply of the matched rule, no external call.
//! - `ExplicitFactExecutor`: exactly one bound tool invocation.
//! - `SimpleReasoningExecutor`: one backend call with session context, no tools.
//! - `MultiStepExecutor`: the agent loop over the narrowed tool subset.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use super::agent_handle::AgentLease;
use super::errors::{ErrorKind, ExecutorError};
use super::intent_router::FactBinding;
use super::tokens::{estimate_message_tokens, summarize_tool_result, truncate_tool_result};
use super::tool_selector::ToolSelection;
use super::types::{ClassificationResult, ComplexityTier, Query};
use crate::config::MultiStepConfig;
use crate::inference::types::{ChatMessage, ToolCall};
use crate::tools::registry::ToolCatalog;

/// After this many consecutive rounds in which every tool call failed, the
/// loop gives up with a tool invocation error.
const MAX_CONSECUTIVE_ERROR_ROUNDS: usize = 2;

// ─── Context / Output ───────────────────────────────────────────────────────

/// Everything an executor may read during one turn. Borrowed, never owned.
pub struct TurnContext<'a> {
    pub turn_id: &'a str,
    pub query: &'a Query,
    pub classification: &'a ClassificationResult,
    /// Canned reply of the matched rule, when it has one.
    pub instant_reply: Option<&'a str>,
    /// Tool call bound to the matched rule, when it has one.
    pub fact_binding: Option<&'a FactBinding>,
    pub catalog: &'a ToolCatalog,
    pub selection: &'a ToolSelection,
    /// Present only for reasoning tiers.
    pub agent: Option<&'a AgentLease>,
    /// Rendered recent exchanges.
    pub conversation_context: &'a str,
}

/// One tool invocation, for the audit journal.
#[derive(Debug, Clone)]
pub struct ToolInvocationRecord {
    pub tool: String,
    pub arguments: Value,
    pub success: bool,
    /// Result text on success, error text otherwise.
    pub detail: String,
    pub elapsed_ms: u64,
}

/// What a successful executor hands back to the controller.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOutput {
    pub text: String,
    pub tool_rounds: usize,
    /// Tool names offered to the backend.
    pub tools_offered: Vec<String>,
    /// Messages exchanged with the backend after the utterance.
    pub transcript: Vec<ChatMessage>,
    /// `Some(MaxIterationsExceeded)` when the loop stopped at its step limit.
    pub stopped: Option<ErrorKind>,
    pub tool_calls: Vec<ToolInvocationRecord>,
    /// New working-memory notes for the persistent agent.
    pub notes: Vec<String>,
}

impl ExecutorOutput {
    fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// One execution strategy.
#[async_trait]
pub trait PathExecutor: Send + Sync {
    fn tier(&self) -> ComplexityTier;

    async fn execute(&self, ctx: &TurnContext<'_>) -> Result<ExecutorOutput, ExecutorError>;
}

// ─── Instant ────────────────────────────────────────────────────────────────

pub struct InstantExecutor;

#[async_trait]
impl PathExecutor for InstantExecutor {
    fn tier(&self) -> ComplexityTier {
        ComplexityTier::Instant
    }

    async fn execute(&self, ctx: &TurnContext<'_>) -> Result<ExecutorOutput, ExecutorError> {
        match ctx.instant_reply {
            Some(reply) => Ok(ExecutorOutput::from_text(reply)),
            None => Err(ExecutorError::cannot_handle(
                self.tier(),
                format!("no canned reply for rule '{}'", ctx.classification.matched_rule),
            )),
        }
    }
}

// ─── Explicit Fact ──────────────────────────────────────────────────────────

pub struct ExplicitFactExecutor;

#[async_trait]
impl PathExecutor for ExplicitFactExecutor {
    fn tier(&self) -> ComplexityTier {
        ComplexityTier::ExplicitFact
    }

    async fn execute(&self, ctx: &TurnContext<'_>) -> Result<ExecutorOutput, ExecutorError> {
        let binding = ctx.fact_binding.ok_or_else(|| {
            ExecutorError::cannot_handle(
                self.tier(),
                format!("rule '{}' binds no tool", ctx.classification.matched_rule),
            )
        })?;

        let start = Instant::now();
        let value = ctx
            .catalog
            .invoke(&binding.tool, binding.arguments.clone())
            .await?;
        let text = render_tool_value(&value);

        tracing::debug!(
            turn_id = %ctx.turn_id,
            tool = %binding.tool,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "fact tool answered"
        );

        Ok(ExecutorOutput {
            tool_calls: vec![ToolInvocationRecord {
                tool: binding.tool.clone(),
                arguments: binding.arguments.clone(),
                success: true,
                detail: text.clone(),
                elapsed_ms: start.elapsed().as_millis() as u64,
            }],
            text,
            ..ExecutorOutput::default()
        })
    }
}

// ─── Simple Reasoning ───────────────────────────────────────────────────────

pub struct SimpleReasoningExecutor {
    system_prompt: String,
}

impl SimpleReasoningExecutor {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }
}

#[async_trait]
impl PathExecutor for SimpleReasoningExecutor {
    fn tier(&self) -> ComplexityTier {
        ComplexityTier::SimpleReasoning
    }

    async fn execute(&self, ctx: &TurnContext<'_>) -> Result<ExecutorOutput, ExecutorError> {
        let agent = require_agent(ctx)?;
        answer_without_tools(&self.system_prompt, agent, ctx).await
    }
}

/// One tool-free backend call. Also the multi-step fallback for an empty
/// tool selection.
async fn answer_without_tools(
    system_prompt: &str,
    agent: &AgentLease,
    ctx: &TurnContext<'_>,
) -> Result<ExecutorOutput, ExecutorError> {
    let messages = build_reasoning_messages(
        system_prompt,
        ctx.conversation_context,
        agent.notes(),
        ctx.query.text(),
    );
    let completion = agent.complete(messages, None).await?;
    let text = non_empty_text(completion.text)?;

    Ok(ExecutorOutput {
        transcript: vec![ChatMessage::assistant(text.clone())],
        text,
        ..ExecutorOutput::default()
    })
}

// ─── Multi-Step ─────────────────────────────────────────────────────────────

/// Outcome of one tool call inside the loop.
enum ToolOutcome {
    Success { text: String },
    /// The tool ran (or was validated) and failed.
    ToolError { text: String },
    /// The model named a tool it was not offered.
    UnknownTool { text: String },
}

impl ToolOutcome {
    fn model_text(&self) -> &str {
        match self {
            Self::Success { text } | Self::ToolError { text } | Self::UnknownTool { text } => text,
        }
    }

    fn is_error(&self) -> bool {
        !matches!(self, Self::Success { .. })
    }
}

pub struct MultiStepExecutor {
    system_prompt: String,
    config: MultiStepConfig,
}

impl MultiStepExecutor {
    pub fn new(system_prompt: impl Into<String>, config: MultiStepConfig) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            config,
        }
    }

    /// Run one tool call against the narrowed selection.
    async fn run_tool(&self, call: &ToolCall, selection: &ToolSelection) -> ToolOutcome {
        let Some(descriptor) = selection.get(&call.name) else {
            return ToolOutcome::UnknownTool {
                text: format!(
                    "Error: unknown tool '{}'. Available tools: {}",
                    call.name,
                    selection.names().join(", ")
                ),
            };
        };

        let result = match descriptor.validate_arguments(&call.arguments) {
            Ok(()) => descriptor.capability.invoke(call.arguments.clone()).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => ToolOutcome::Success {
                text: truncate_tool_result(
                    &render_tool_value(&value),
                    &call.name,
                    self.config.max_tool_result_chars,
                ),
            },
            Err(e) => ToolOutcome::ToolError {
                text: format!("Error: {e}"),
            },
        }
    }
}

#[async_trait]
impl PathExecutor for MultiStepExecutor {
    fn tier(&self) -> ComplexityTier {
        ComplexityTier::ComplexMultiStep
    }

    async fn execute(&self, ctx: &TurnContext<'_>) -> Result<ExecutorOutput, ExecutorError> {
        let agent = require_agent(ctx)?;

        if ctx.selection.is_empty() {
            tracing::debug!(turn_id = %ctx.turn_id, "no tools selected; answering without tools");
            return answer_without_tools(&self.system_prompt, agent, ctx).await;
        }

        let tools = ctx.selection.descriptors();
        let definitions = ToolCatalog::to_tool_definitions(&tools);
        let tools_offered: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();

        let mut messages = build_reasoning_messages(
            &self.system_prompt,
            ctx.conversation_context,
            agent.notes(),
            ctx.query.text(),
        );
        let transcript_start = messages.len();

        let mut tool_rounds = 0usize;
        let mut consecutive_error_rounds = 0usize;
        let mut tool_calls: Vec<ToolInvocationRecord> = Vec::new();
        let mut notes: Vec<String> = Vec::new();

        loop {
            tracing::debug!(
                turn_id = %ctx.turn_id,
                round = tool_rounds,
                prompt_tokens = messages.iter().map(estimate_message_tokens).sum::<u32>(),
                "multi-step request"
            );
            let completion = agent
                .complete(messages.clone(), Some(definitions.clone()))
                .await?;

            if !completion.has_tool_calls() {
                let text = non_empty_text(completion.text)?;
                messages.push(ChatMessage::assistant(text.clone()));
                tracing::info!(
                    turn_id = %ctx.turn_id,
                    tool_rounds,
                    tool_calls = tool_calls.len(),
                    "multi-step loop finished"
                );
                return Ok(ExecutorOutput {
                    text,
                    tool_rounds,
                    tools_offered,
                    transcript: messages.split_off(transcript_start),
                    stopped: None,
                    tool_calls,
                    notes,
                });
            }

            if tool_rounds >= self.config.max_iterations {
                tracing::warn!(
                    turn_id = %ctx.turn_id,
                    max_iterations = self.config.max_iterations,
                    "multi-step loop stopped at iteration limit"
                );
                return Ok(ExecutorOutput {
                    text: format!(
                        "I stopped after {tool_rounds} steps without finishing. \
                         Try asking for a smaller part of the task."
                    ),
                    tool_rounds,
                    tools_offered,
                    transcript: messages.split_off(transcript_start),
                    stopped: Some(ErrorKind::MaxIterationsExceeded),
                    tool_calls,
                    notes,
                });
            }

            tool_rounds += 1;
            messages.push(ChatMessage::assistant_tool_calls(&completion.tool_calls));

            // Sequential on purpose: a later call may depend on an earlier result.
            let mut round_errors = 0usize;
            let mut last_failure: Option<(String, String)> = None;
            for call in &completion.tool_calls {
                let start = Instant::now();
                let outcome = self.run_tool(call, ctx.selection).await;
                let elapsed_ms = start.elapsed().as_millis() as u64;

                tracing::debug!(
                    turn_id = %ctx.turn_id,
                    round = tool_rounds,
                    tool = %call.name,
                    elapsed_ms,
                    is_error = outcome.is_error(),
                    "tool call executed"
                );

                if outcome.is_error() {
                    round_errors += 1;
                    last_failure = Some((call.name.clone(), outcome.model_text().to_string()));
                } else {
                    notes.push(summarize_tool_result(&call.name, outcome.model_text()));
                }
                if !matches!(outcome, ToolOutcome::UnknownTool { .. }) {
                    tool_calls.push(ToolInvocationRecord {
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                        success: !outcome.is_error(),
                        detail: outcome.model_text().to_string(),
                        elapsed_ms,
                    });
                }
                messages.push(ChatMessage::tool_result(&call.id, outcome.model_text()));
            }

            if round_errors == completion.tool_calls.len() {
                consecutive_error_rounds += 1;
                tracing::warn!(
                    turn_id = %ctx.turn_id,
                    round = tool_rounds,
                    consecutive_error_rounds,
                    "all tool calls in round failed"
                );
                if consecutive_error_rounds >= MAX_CONSECUTIVE_ERROR_ROUNDS {
                    let (tool, reason) = last_failure.unwrap_or_default();
                    return Err(ExecutorError::ToolInvocation { tool, reason });
                }
            } else {
                consecutive_error_rounds = 0;
            }
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn require_agent<'a>(ctx: &TurnContext<'a>) -> Result<&'a AgentLease, ExecutorError> {
    ctx.agent.ok_or_else(|| ExecutorError::SessionUnusable {
        reason: "no agent lease for a reasoning tier".into(),
    })
}

fn non_empty_text(text: Option<String>) -> Result<String, ExecutorError> {
    match text.map(|t| t.trim().to_string()) {
        Some(t) if !t.is_empty() => Ok(t),
        _ => Err(ExecutorError::Backend {
            reason: "backend returned an empty completion".into(),
        }),
    }
}

/// Prompt for both reasoning tiers: system prompt with recent conversation
/// and working-memory notes, then the utterance.
pub fn build_reasoning_messages(
    system_prompt: &str,
    conversation_context: &str,
    notes: &[String],
    utterance: &str,
) -> Vec<ChatMessage> {
    let mut system = system_prompt.trim().to_string();
    if !conversation_context.is_empty() {
        system.push_str("\n\nRecent conversation:\n");
        system.push_str(conversation_context);
    }
    if !notes.is_empty() {
        system.push_str("\n\nNotes from earlier tool work:\n");
        for note in notes {
            system.push_str("- ");
            system.push_str(note);
            system.push('\n');
        }
    }
    vec![ChatMessage::system(system), ChatMessage::user(utterance)]
}

/// Text form of a tool result: the primary text field when the result has
/// one, the raw string for string results, compact JSON otherwise.
pub fn render_tool_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(obj) => {
            for key in ["text", "content", "message", "result", "output"] {
                if let Some(text) = obj.get(key).and_then(|v| v.as_str()) {
                    if !text.is_empty() {
                        return text.to_string();
                    }
                }
            }
            value.to_string()
        }
        other => other.to_string(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
