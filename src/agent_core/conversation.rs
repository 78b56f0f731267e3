//! ConversationSessionManager — the one active session and its agent.
//!
//! Responsibilities:
//! - `NoSession → Active → NoSession` lifecycle, idempotent at both ends
//! - Own the persistent agent handle: create lazily, reuse across turns,
//!   recreate only on an explicit `SessionUnusable` signal
//! - Keep full exchange history and render the recent window for prompts
//! - Mirror sessions, exchanges and tool calls into the optional journal
//!
//! Session state sits behind a `std::sync::Mutex` and is only reached through
//! short synchronous accessors. Nothing here is held across an await: the
//! reasoning tiers work on an `AgentLease` taken inside one of them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::agent_handle::{AgentHandle, AgentLease};
use super::database::{AuditStatus, SessionJournal};
use super::errors::ExecutorError;
use super::executors::ToolInvocationRecord;
use super::tokens::preview;
use super::types::{ComplexityTier, Exchange, SessionHandle, SessionStats, SessionSummary};
use crate::config::SessionConfig;
use crate::inference::backend::ReasoningBackend;

/// Characters of each side of an exchange kept in the prompt rendering.
const CONTEXT_TEXT_LIMIT: usize = 600;

// ─── ConversationSession ────────────────────────────────────────────────────

/// The active session. Only reachable through the manager's accessors.
pub struct ConversationSession {
    id: String,
    started_at: DateTime<Utc>,
    /// Retained history (capped by `max_history` when non-zero).
    exchanges: Vec<Exchange>,
    agent: Option<AgentHandle>,
    agent_recreations: u32,
    // Totals survive history trimming.
    exchange_count: usize,
    total_latency_ms: u64,
    tier_counts: BTreeMap<ComplexityTier, usize>,
}

impl ConversationSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            exchanges: Vec::new(),
            agent: None,
            agent_recreations: 0,
            exchange_count: 0,
            total_latency_ms: 0,
            tier_counts: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn exchange_count(&self) -> usize {
        self.exchange_count
    }

    pub fn agent_handle_id(&self) -> Option<u64> {
        self.agent.as_ref().map(AgentHandle::id)
    }

    fn handle(&self) -> SessionHandle {
        SessionHandle {
            session_id: self.id.clone(),
            started_at: self.started_at,
            resumed: false,
        }
    }

    /// Summary over the whole session, including trimmed exchanges.
    fn summarize(&self, ended_at: DateTime<Utc>) -> SessionSummary {
        let avg_latency_ms = if self.exchange_count == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.exchange_count as f64
        };

        let mut summary_text = format!(
            "{} exchange{} over {}s",
            self.exchange_count,
            if self.exchange_count == 1 { "" } else { "s" },
            (ended_at - self.started_at).num_seconds().max(0)
        );
        if let (Some(first), Some(last)) = (self.exchanges.first(), self.exchanges.last()) {
            summary_text.push_str(&format!("; began with \"{}\"", preview(&first.user_text, 60)));
            if self.exchanges.len() > 1 {
                summary_text
                    .push_str(&format!(", ended with \"{}\"", preview(&last.user_text, 60)));
            }
        }

        SessionSummary {
            session_id: Some(self.id.clone()),
            started_at: Some(self.started_at),
            ended_at: Some(ended_at),
            exchange_count: self.exchange_count,
            tier_counts: self.tier_counts.clone(),
            avg_latency_ms,
            agent_recreations: self.agent_recreations,
            summary_text,
        }
    }
}

// ─── Manager ────────────────────────────────────────────────────────────────

/// Owns the single active session.
pub struct ConversationSessionManager {
    config: SessionConfig,
    backend: Arc<dyn ReasoningBackend>,
    state: Mutex<Option<ConversationSession>>,
    journal: Option<SessionJournal>,
}

impl ConversationSessionManager {
    pub fn new(config: SessionConfig, backend: Arc<dyn ReasoningBackend>) -> Self {
        Self {
            config,
            backend,
            state: Mutex::new(None),
            journal: None,
        }
    }

    /// Mirror session activity into `journal`.
    pub fn with_journal(mut self, journal: SessionJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn journal(&self) -> Option<&SessionJournal> {
        self.journal.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ConversationSession>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Start a session, or return the active one with `resumed = true`.
    pub fn start_session(&self) -> SessionHandle {
        let mut state = self.lock();
        if let Some(session) = state.as_ref() {
            tracing::debug!(session_id = %session.id, "session already active");
            return SessionHandle {
                resumed: true,
                ..session.handle()
            };
        }

        let session = ConversationSession::new();
        let handle = session.handle();
        tracing::info!(session_id = %session.id, "session started");
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.begin_session(&session.id, session.started_at) {
                tracing::warn!(error = %e, "journal: failed to record session start");
            }
        }
        *state = Some(session);
        handle
    }

    /// End the active session, releasing its agent. Empty summary when idle.
    pub fn end_session(&self) -> SessionSummary {
        let Some(session) = self.lock().take() else {
            tracing::debug!("end_session with no active session");
            return SessionSummary::default();
        };

        let summary = session.summarize(Utc::now());
        tracing::info!(
            session_id = %session.id,
            exchanges = summary.exchange_count,
            agent_recreations = summary.agent_recreations,
            "session ended"
        );
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.end_session(
                &session.id,
                summary.ended_at.unwrap_or_else(Utc::now),
                summary.exchange_count,
                &summary.summary_text,
            ) {
                tracing::warn!(error = %e, "journal: failed to record session end");
            }
        }
        // Dropping the session drops the handle's sender; its worker exits.
        drop(session);
        summary
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Scoped access to the active session.
    pub fn with_session<T>(
        &self,
        f: impl FnOnce(&mut ConversationSession) -> T,
    ) -> Result<T, ExecutorError> {
        let mut state = self.lock();
        let session = state.as_mut().ok_or(ExecutorError::NoActiveSession)?;
        Ok(f(session))
    }

    // ─── Context ────────────────────────────────────────────────────────

    /// Most recent `context_window` exchanges, oldest first. Empty when idle.
    pub fn get_conversation_context(&self) -> String {
        let window = self.config.context_window;
        self.with_session(|session| {
            let start = session.exchanges.len().saturating_sub(window);
            session.exchanges[start..]
                .iter()
                .map(|ex| {
                    format!(
                        "User: {}\nAssistant: {}",
                        preview(&ex.user_text, CONTEXT_TEXT_LIMIT),
                        preview(&ex.response_text, CONTEXT_TEXT_LIMIT)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
    }

    // ─── Agent Handle ───────────────────────────────────────────────────

    /// Lease the session's agent, creating it on first use.
    ///
    /// An existing handle that lost its runtime is reported as
    /// `SessionUnusable`; it is never silently replaced here.
    pub fn lease_agent(&self) -> Result<AgentLease, ExecutorError> {
        let mut state = self.lock();
        let session = state.as_mut().ok_or(ExecutorError::NoActiveSession)?;

        if session.agent.is_none() {
            let handle = AgentHandle::spawn(self.backend.clone(), self.config.agent_memory_notes)?;
            tracing::debug!(
                session_id = %session.id,
                handle_id = handle.id(),
                "agent created lazily"
            );
            session.agent = Some(handle);
        }

        match &session.agent {
            Some(handle) => handle.lease(),
            None => Err(ExecutorError::SessionUnusable {
                reason: "agent handle missing".into(),
            }),
        }
    }

    /// Replace the agent after a `SessionUnusable` signal. Returns the new id.
    pub fn recreate_agent(&self, reason: &str) -> Result<u64, ExecutorError> {
        let mut state = self.lock();
        let session = state.as_mut().ok_or(ExecutorError::NoActiveSession)?;

        let handle = AgentHandle::spawn(self.backend.clone(), self.config.agent_memory_notes)?;
        let new_id = handle.id();
        let old_id = session.agent.replace(handle).map(|old| old.id());
        session.agent_recreations += 1;

        tracing::warn!(
            session_id = %session.id,
            old_handle = ?old_id,
            new_handle = new_id,
            recreations = session.agent_recreations,
            reason,
            "agent handle recreated"
        );
        Ok(new_id)
    }

    /// Add working-memory notes to the agent that produced them. Notes for a
    /// handle that has since been replaced are discarded.
    pub fn remember_notes(&self, handle_id: u64, notes: Vec<String>) {
        if notes.is_empty() {
            return;
        }
        let _ = self.with_session(|session| match session.agent.as_mut() {
            Some(agent) if agent.id() == handle_id => agent.remember(notes),
            _ => tracing::debug!(handle_id, "dropping notes for a replaced agent"),
        });
    }

    // ─── Recording ──────────────────────────────────────────────────────

    pub fn record_exchange(&self, exchange: Exchange) -> Result<(), ExecutorError> {
        let max_history = self.config.max_history;
        let session_id = self.with_session(|session| {
            session.exchange_count += 1;
            session.total_latency_ms += exchange.latency_ms;
            *session.tier_counts.entry(exchange.tier).or_insert(0) += 1;

            if let Some(journal) = &self.journal {
                if let Err(e) = journal.record_exchange(&session.id, &exchange) {
                    tracing::warn!(error = %e, "journal: failed to record exchange");
                }
            }

            session.exchanges.push(exchange);
            if max_history > 0 && session.exchanges.len() > max_history {
                let excess = session.exchanges.len() - max_history;
                session.exchanges.drain(..excess);
            }
            session.id.clone()
        })?;
        tracing::debug!(session_id = %session_id, "exchange recorded");
        Ok(())
    }

    /// Write tool invocations to the audit journal. No-op without a journal.
    pub fn record_tool_calls(&self, tier: ComplexityTier, calls: &[ToolInvocationRecord]) {
        let Some(journal) = &self.journal else {
            return;
        };
        if calls.is_empty() {
            return;
        }
        let Ok(session_id) = self.with_session(|s| s.id.clone()) else {
            return;
        };
        for call in calls {
            let status = if call.success {
                AuditStatus::Success
            } else {
                AuditStatus::Error
            };
            if let Err(e) = journal.record_tool_call(
                &session_id,
                tier,
                &call.tool,
                &call.arguments,
                status,
                &call.detail,
                call.elapsed_ms,
            ) {
                tracing::warn!(
                    error = %e,
                    tool = %call.tool,
                    "journal: failed to record tool call"
                );
            }
        }
    }

    // ─── Diagnostics ────────────────────────────────────────────────────

    pub fn stats(&self) -> SessionStats {
        let state = self.lock();
        match state.as_ref() {
            None => SessionStats::default(),
            Some(session) => SessionStats {
                active: true,
                session_id: Some(session.id.clone()),
                started_at: Some(session.started_at),
                exchange_count: session.exchange_count,
                agent_handle_id: session.agent_handle_id(),
                agent_created_at: session.agent.as_ref().map(AgentHandle::created_at),
                agent_usable: session.agent.as_ref().is_some_and(AgentHandle::is_usable),
                agent_memory_notes: session.agent.as_ref().map_or(0, AgentHandle::memory_len),
                agent_recreations: session.agent_recreations,
            },
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
