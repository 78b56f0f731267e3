//! ExecutionController — the single entry point for callers.
//!
//! One turn: classify → run the tier's executor under its hard timeout →
//! escalate on failure → record the exchange and a performance sample →
//! return text. The escalation chain is linear and bounded, so a turn runs
//! at most one executor per tier plus one agent-recovery rerun.
//!
//! Turns are serialized by an async gate. Under the `queue` policy a second
//! caller waits; under `reject` it gets `ControllerError::Busy`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use super::agent_handle::AgentLease;
use super::conversation::ConversationSessionManager;
use super::database::SessionJournal;
use super::errors::{ControllerError, ErrorKind, ExecutorError};
use super::executors::{
    ExecutorOutput, ExplicitFactExecutor, InstantExecutor, MultiStepExecutor, PathExecutor,
    SimpleReasoningExecutor, TurnContext,
};
use super::intent_router::IntentRouter;
use super::performance::{PerformanceMonitor, PerformanceSummary};
use super::tool_selector::{CacheStats, ToolSelection, ToolSelector};
use super::types::{
    ClassificationResult, ComplexityTier, Exchange, ExecutionResult, PerformanceSample, Query,
    SessionHandle, SessionStats, SessionSummary, TierAttempt,
};
use crate::config::{ConcurrencyPolicy, ConfigError, RuntimeConfig};
use crate::inference::backend::ReasoningBackend;
use crate::tools::errors::ToolError;
use crate::tools::registry::{ToolCatalog, ToolDescriptor};

/// Returned when every tier failed.
pub const APOLOGY_RESPONSE: &str =
    "Sorry, I wasn't able to finish that. Could you try again or rephrase it?";

// ─── Routing Stats ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RoutingCounters {
    total_turns: u64,
    classified: BTreeMap<ComplexityTier, u64>,
    served: BTreeMap<ComplexityTier, u64>,
    escalations: u64,
    ambiguous: u64,
    apologies: u64,
    agent_recoveries: u64,
    errors: BTreeMap<ErrorKind, u64>,
}

/// Read-only routing snapshot for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingStats {
    pub total_turns: u64,
    /// Turns per tier chosen by the router.
    pub classified: BTreeMap<ComplexityTier, u64>,
    /// Turns per tier that produced the final response.
    pub served: BTreeMap<ComplexityTier, u64>,
    pub escalations: u64,
    /// Turns that fell through to the default tier.
    pub ambiguous: u64,
    pub apologies: u64,
    pub agent_recoveries: u64,
    /// Failures per kind, across all attempts.
    pub errors: BTreeMap<ErrorKind, u64>,
    pub tool_cache: CacheStats,
    pub catalog_size: usize,
    pub performance: PerformanceSummary,
}

/// Borrowed per-turn inputs shared by every attempt.
struct TurnInputs<'a> {
    turn_id: &'a str,
    query: &'a Query,
    classification: &'a ClassificationResult,
    catalog: &'a ToolCatalog,
    conversation_context: &'a str,
}

// ─── ExecutionController ────────────────────────────────────────────────────

pub struct ExecutionController {
    config: RuntimeConfig,
    router: IntentRouter,
    selector: ToolSelector,
    /// Indexed by `ComplexityTier::index()`.
    executors: Vec<Box<dyn PathExecutor>>,
    sessions: ConversationSessionManager,
    monitor: PerformanceMonitor,
    /// Copy-on-write: each turn works on a snapshot.
    catalog: RwLock<Arc<ToolCatalog>>,
    turn_gate: tokio::sync::Mutex<()>,
    counters: Mutex<RoutingCounters>,
}

impl ExecutionController {
    pub fn new(
        config: RuntimeConfig,
        backend: Arc<dyn ReasoningBackend>,
        catalog: ToolCatalog,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let router = IntentRouter::from_config(&config.router)?;

        let mut sessions = ConversationSessionManager::new(config.session.clone(), backend);
        if let Some(path) = &config.session.journal_path {
            match SessionJournal::open(path) {
                Ok(journal) => {
                    tracing::info!(path = %path.display(), "session journal opened");
                    sessions = sessions.with_journal(journal);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "session journal unavailable; continuing without it"
                    );
                }
            }
        }

        let executors: Vec<Box<dyn PathExecutor>> = vec![
            Box::new(InstantExecutor),
            Box::new(ExplicitFactExecutor),
            Box::new(SimpleReasoningExecutor::new(config.session.system_prompt.clone())),
            Box::new(MultiStepExecutor::new(
                config.session.system_prompt.clone(),
                config.multi_step.clone(),
            )),
        ];
        debug_assert!(executors
            .iter()
            .enumerate()
            .all(|(i, e)| e.tier().index() == i));

        tracing::info!(
            tools = catalog.len(),
            rules = router.rules().len(),
            policy = ?config.concurrency,
            "execution controller ready"
        );

        Ok(Self {
            selector: ToolSelector::new(config.tool_selection.clone()),
            monitor: PerformanceMonitor::new(config.monitor.clone()),
            router,
            executors,
            sessions,
            catalog: RwLock::new(Arc::new(catalog)),
            turn_gate: tokio::sync::Mutex::new(()),
            counters: Mutex::new(RoutingCounters::default()),
            config,
        })
    }

    // ─── Tool Registration ──────────────────────────────────────────────

    /// Register a tool. In-flight turns keep their catalog snapshot.
    pub fn register_tool(&self, descriptor: ToolDescriptor) -> Result<(), ToolError> {
        let mut guard = self.catalog_write();
        let mut next = ToolCatalog::clone(&guard);
        let name = descriptor.name.clone();
        next.register(descriptor)?;
        *guard = Arc::new(next);
        tracing::info!(tool = %name, "tool registered");
        Ok(())
    }

    /// Remove a tool by name. Returns whether it was registered.
    pub fn unregister_tool(&self, name: &str) -> bool {
        let mut guard = self.catalog_write();
        let mut next = ToolCatalog::clone(&guard);
        let removed = next.unregister(name).is_some();
        if removed {
            *guard = Arc::new(next);
            tracing::info!(tool = %name, "tool unregistered");
        }
        removed
    }

    pub fn catalog(&self) -> Arc<ToolCatalog> {
        match self.catalog.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn catalog_write(&self) -> std::sync::RwLockWriteGuard<'_, Arc<ToolCatalog>> {
        match self.catalog.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ─── Sessions ───────────────────────────────────────────────────────

    pub fn start_session(&self) -> SessionHandle {
        self.sessions.start_session()
    }

    /// Ends the session once any in-flight turn has finished.
    pub async fn end_session(&self) -> SessionSummary {
        let _gate = self.turn_gate.lock().await;
        self.sessions.end_session()
    }

    // ─── Turns ──────────────────────────────────────────────────────────

    /// Answer one utterance. Failures become response text; only a missing
    /// session or a rejected concurrent turn are errors.
    pub async fn process_command(&self, text: &str) -> Result<String, ControllerError> {
        self.execute(text).await.map(|result| result.response_text)
    }

    /// Like `process_command`, returning the full result.
    pub async fn execute(&self, text: &str) -> Result<ExecutionResult, ControllerError> {
        let _gate = match self.config.concurrency {
            ConcurrencyPolicy::Queue => self.turn_gate.lock().await,
            ConcurrencyPolicy::Reject => self.turn_gate.try_lock().map_err(|_| {
                tracing::debug!("turn rejected: another turn is in flight");
                ControllerError::Busy
            })?,
        };

        if !self.sessions.is_active() {
            return Err(ControllerError::NoActiveSession);
        }

        let query = Query::new(text);
        let classification = self.router.classify(&query);
        let turn_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "turn",
            turn_id = %turn_id,
            tier = %classification.tier,
        );

        Ok(self
            .run_turn(turn_id, query, classification)
            .instrument(span)
            .await)
    }

    async fn run_turn(
        &self,
        turn_id: String,
        query: Query,
        classification: ClassificationResult,
    ) -> ExecutionResult {
        let started = Instant::now();
        let catalog = self.catalog();
        let conversation_context = self.sessions.get_conversation_context();
        let inputs = TurnInputs {
            turn_id: &turn_id,
            query: &query,
            classification: &classification,
            catalog: &catalog,
            conversation_context: &conversation_context,
        };

        tracing::info!(
            rule = %classification.matched_rule,
            confidence = classification.confidence,
            "turn classified"
        );

        let mut tier = classification.tier;
        let mut attempts: Vec<TierAttempt> = Vec::new();
        let mut recovered = false;

        let outcome: Result<(ExecutorOutput, Option<u64>), ExecutorError> = loop {
            let attempt_started = Instant::now();
            let result = self.run_tier(tier, &inputs).await;
            let elapsed_ms = attempt_started.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    attempts.push(TierAttempt {
                        tier,
                        elapsed_ms,
                        error: None,
                    });
                    break Ok(output);
                }
                Err(e) => {
                    attempts.push(TierAttempt {
                        tier,
                        elapsed_ms,
                        error: Some(e.kind()),
                    });

                    if e.kind() == ErrorKind::SessionUnusable && !recovered {
                        recovered = true;
                        match self.sessions.recreate_agent(&e.to_string()) {
                            Ok(_) => {
                                self.lock_counters().agent_recoveries += 1;
                                continue;
                            }
                            Err(re) => {
                                tracing::warn!(error = %re, "agent recreation failed");
                            }
                        }
                    }

                    match tier.next() {
                        Some(next) => {
                            tracing::warn!(
                                from = %tier,
                                to = %next,
                                error = %e,
                                elapsed_ms,
                                "escalating"
                            );
                            tier = next;
                        }
                        None => {
                            tracing::warn!(tier = %tier, error = %e, "all tiers failed");
                            break Err(e);
                        }
                    }
                }
            }
        };

        let (response_text, success, error, tool_rounds) = match outcome {
            Ok((output, handle_id)) => {
                if let Some(handle_id) = handle_id {
                    self.sessions.remember_notes(handle_id, output.notes);
                }
                self.sessions.record_tool_calls(tier, &output.tool_calls);
                tracing::debug!(
                    transcript_messages = output.transcript.len(),
                    tools_offered = ?output.tools_offered,
                    "executor finished"
                );
                (
                    output.text,
                    output.stopped.is_none(),
                    output.stopped,
                    output.tool_rounds,
                )
            }
            Err(e) => (APOLOGY_RESPONSE.to_string(), false, Some(e.kind()), 0),
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        let budget = self.config.tiers.budget(tier);
        self.monitor
            .record(PerformanceSample::new(tier, latency_ms, budget.target_ms));

        let exchange = Exchange {
            user_text: query.text().to_string(),
            response_text: response_text.clone(),
            tier,
            latency_ms,
            success,
            timestamp: query.received_at(),
        };
        if let Err(e) = self.sessions.record_exchange(exchange) {
            tracing::warn!(error = %e, "exchange not recorded");
        }

        let result = ExecutionResult {
            turn_id,
            response_text,
            tier_used: tier,
            latency_ms,
            success,
            error,
            classification,
            attempts,
            tool_rounds,
        };
        self.count_turn(&result);

        tracing::info!(
            tier_used = %result.tier_used,
            latency_ms,
            success,
            escalations = result.escalations(),
            target_ms = budget.target_ms,
            "turn complete"
        );
        result
    }

    /// Run one tier's executor under its hard timeout.
    ///
    /// Returns the output plus the id of the agent handle it leased, if any.
    async fn run_tier(
        &self,
        tier: ComplexityTier,
        inputs: &TurnInputs<'_>,
    ) -> Result<(ExecutorOutput, Option<u64>), ExecutorError> {
        let lease: Option<AgentLease> = if tier.uses_reasoning() {
            Some(self.sessions.lease_agent()?)
        } else {
            None
        };

        let selection = if tier == ComplexityTier::ComplexMultiStep {
            self.selector
                .select(inputs.query, inputs.catalog, self.selector.max_tools())
        } else {
            ToolSelection::default()
        };

        let rule = inputs.classification.matched_rule.as_str();
        let ctx = TurnContext {
            turn_id: inputs.turn_id,
            query: inputs.query,
            classification: inputs.classification,
            instant_reply: self.router.instant_reply(rule),
            fact_binding: self.router.fact_binding(rule),
            catalog: inputs.catalog,
            selection: &selection,
            agent: lease.as_ref(),
            conversation_context: inputs.conversation_context,
        };

        let budget = self.config.tiers.budget(tier);
        let executor = &self.executors[tier.index()];
        match tokio::time::timeout(Duration::from_millis(budget.timeout_ms), executor.execute(&ctx))
            .await
        {
            Ok(result) => result.map(|output| (output, lease.as_ref().map(AgentLease::handle_id))),
            Err(_) => Err(ExecutorError::Timeout {
                tier,
                timeout_ms: budget.timeout_ms,
            }),
        }
    }

    // ─── Diagnostics ────────────────────────────────────────────────────

    fn lock_counters(&self) -> MutexGuard<'_, RoutingCounters> {
        match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn count_turn(&self, result: &ExecutionResult) {
        let mut c = self.lock_counters();
        c.total_turns += 1;
        *c.classified.entry(result.classification.tier).or_insert(0) += 1;
        c.escalations += result.escalations() as u64;
        if result.classification.is_default() {
            c.ambiguous += 1;
        }
        for kind in result.attempts.iter().filter_map(|a| a.error) {
            *c.errors.entry(kind).or_insert(0) += 1;
        }
        if result.error == Some(ErrorKind::MaxIterationsExceeded) {
            *c.errors.entry(ErrorKind::MaxIterationsExceeded).or_insert(0) += 1;
        }
        let stopped = result.error == Some(ErrorKind::MaxIterationsExceeded);
        if !result.success && !stopped {
            c.apologies += 1;
        } else {
            *c.served.entry(result.tier_used).or_insert(0) += 1;
        }
    }

    pub fn get_routing_stats(&self) -> RoutingStats {
        let c = self.lock_counters();
        RoutingStats {
            total_turns: c.total_turns,
            classified: c.classified.clone(),
            served: c.served.clone(),
            escalations: c.escalations,
            ambiguous: c.ambiguous,
            apologies: c.apologies,
            agent_recoveries: c.agent_recoveries,
            errors: c.errors.clone(),
            tool_cache: self.selector.cache_stats(),
            catalog_size: self.catalog().len(),
            performance: self.monitor.get_overall_summary(),
        }
    }

    pub fn get_session_stats(&self) -> SessionStats {
        self.sessions.stats()
    }

    pub fn performance_monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn conversation_context(&self) -> String {
        self.sessions.get_conversation_context()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
