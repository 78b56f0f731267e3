//! Shared types for the agent core.
//!
//! Queries, complexity tiers, classification and execution results, session
//! metadata, and performance samples used across the router, executors,
//! session manager, and monitor.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ErrorKind;

// ─── Complexity Tiers ───────────────────────────────────────────────────────

/// Execution strategy for a query, ordered by increasing cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Instant,
    ExplicitFact,
    SimpleReasoning,
    ComplexMultiStep,
}

impl ComplexityTier {
    /// Every tier, cheapest first.
    pub const ALL: [ComplexityTier; 4] = [
        ComplexityTier::Instant,
        ComplexityTier::ExplicitFact,
        ComplexityTier::SimpleReasoning,
        ComplexityTier::ComplexMultiStep,
    ];

    /// The next tier up the escalation chain, or `None` at the top.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Instant => Some(Self::ExplicitFact),
            Self::ExplicitFact => Some(Self::SimpleReasoning),
            Self::SimpleReasoning => Some(Self::ComplexMultiStep),
            Self::ComplexMultiStep => None,
        }
    }

    /// Position in [`ComplexityTier::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Instant => "instant",
            Self::ExplicitFact => "explicit_fact",
            Self::SimpleReasoning => "simple_reasoning",
            Self::ComplexMultiStep => "complex_multi_step",
        }
    }

    /// Key of this tier's section in the `tiers:` config block.
    pub fn config_key(self) -> &'static str {
        self.as_str()
    }

    /// Whether this tier calls the reasoning backend.
    pub fn uses_reasoning(self) -> bool {
        matches!(self, Self::SimpleReasoning | Self::ComplexMultiStep)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Query ──────────────────────────────────────────────────────────────────

/// One utterance, created per turn and discarded after it.
#[derive(Debug, Clone)]
pub struct Query {
    text: String,
    normalized: String,
    received_at: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let normalized = normalize_text(&text);
        Self {
            text,
            normalized,
            received_at: Utc::now(),
        }
    }

    /// The raw utterance as received.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Lowercased, trimmed, whitespace-collapsed form with trailing
    /// punctuation removed.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// Normalize utterance text for matching and cache keys.
pub fn normalize_text(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| matches!(c, '?' | '!' | '.' | ','))
        .trim_end()
        .to_string()
}

// ─── Classification ─────────────────────────────────────────────────────────

/// Output of the intent router.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub tier: ComplexityTier,
    /// In `[0, 1]`; 0.0 means no rule matched.
    pub confidence: f64,
    /// Identifier of the winning rule, or `"default"`.
    pub matched_rule: String,
}

impl ClassificationResult {
    pub const DEFAULT_RULE: &'static str = "default";

    /// Whether the router fell back to its default tier.
    pub fn is_default(&self) -> bool {
        self.matched_rule == Self::DEFAULT_RULE
    }
}

// ─── Execution ──────────────────────────────────────────────────────────────

/// One tier tried during a turn and how it ended.
#[derive(Debug, Clone, Serialize)]
pub struct TierAttempt {
    pub tier: ComplexityTier,
    pub elapsed_ms: u64,
    /// `None` when the tier produced the response.
    pub error: Option<ErrorKind>,
}

/// Result of a complete turn.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub turn_id: String,
    pub response_text: String,
    /// Tier whose executor produced the response (or failed last).
    pub tier_used: ComplexityTier,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<ErrorKind>,
    pub classification: ClassificationResult,
    pub attempts: Vec<TierAttempt>,
    pub tool_rounds: usize,
}

impl ExecutionResult {
    /// Number of escalations that happened during the turn.
    pub fn escalations(&self) -> usize {
        self.attempts
            .iter()
            .zip(self.attempts.iter().skip(1))
            .filter(|(a, b)| b.tier > a.tier)
            .count()
    }
}

// ─── Sessions ───────────────────────────────────────────────────────────────

/// One completed user/assistant turn stored in session history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub user_text: String,
    pub response_text: String,
    pub tier: ComplexityTier,
    pub latency_ms: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Returned by `start_session`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionHandle {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    /// `true` when `start_session` found an already active session.
    pub resumed: bool,
}

/// Returned by `end_session`. Empty (no id) when no session was active.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSummary {
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exchange_count: usize,
    pub tier_counts: BTreeMap<ComplexityTier, usize>,
    pub avg_latency_ms: f64,
    pub agent_recreations: u32,
    pub summary_text: String,
}

impl SessionSummary {
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none()
    }
}

/// Read-only snapshot for diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub active: bool,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub exchange_count: usize,
    pub agent_handle_id: Option<u64>,
    /// When the current agent handle was spawned; moves forward on recreation.
    pub agent_created_at: Option<DateTime<Utc>>,
    pub agent_usable: bool,
    pub agent_memory_notes: usize,
    pub agent_recreations: u32,
}

// ─── Performance ────────────────────────────────────────────────────────────

/// One turn's latency measured against its tier target.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSample {
    pub tier: ComplexityTier,
    pub latency_ms: u64,
    pub target_ms: u64,
    pub met_target: bool,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceSample {
    pub fn new(tier: ComplexityTier, latency_ms: u64, target_ms: u64) -> Self {
        Self {
            tier,
            latency_ms,
            target_ms,
            met_target: latency_ms <= target_ms,
            timestamp: Utc::now(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_chain_is_linear_and_bounded() {
        let mut tier = ComplexityTier::Instant;
        let mut steps = 0;
        while let Some(next) = tier.next() {
            assert!(next > tier);
            tier = next;
            steps += 1;
        }
        assert_eq!(tier, ComplexityTier::ComplexMultiStep);
        assert_eq!(steps, ComplexityTier::ALL.len() - 1);
    }

    #[test]
    fn test_tier_parse_round_trips_names() {
        for tier in ComplexityTier::ALL {
            assert_eq!(ComplexityTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(ComplexityTier::parse("nope"), None);
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  What   time is it?? "), "what time is it");
        assert_eq!(normalize_text("Hi!"), "hi");
        assert_eq!(normalize_text("   "), "");
        assert_eq!(normalize_text("what's the date."), "what's the date");
    }

    #[test]
    fn test_sample_met_target_is_inclusive() {
        assert!(PerformanceSample::new(ComplexityTier::Instant, 50, 50).met_target);
        assert!(!PerformanceSample::new(ComplexityTier::Instant, 51, 50).met_target);
    }

    #[test]
    fn test_escalation_count() {
        let attempt = |tier, error| TierAttempt { tier, elapsed_ms: 1, error };
        let result = ExecutionResult {
            turn_id: "t".into(),
            response_text: "ok".into(),
            tier_used: ComplexityTier::ComplexMultiStep,
            latency_ms: 3,
            success: true,
            error: None,
            classification: ClassificationResult {
                tier: ComplexityTier::SimpleReasoning,
                confidence: 0.8,
                matched_rule: "r".into(),
            },
            attempts: vec![
                attempt(ComplexityTier::SimpleReasoning, Some(ErrorKind::ReasoningBackendError)),
                attempt(ComplexityTier::ComplexMultiStep, None),
            ],
            tool_rounds: 1,
        };
        assert_eq!(result.escalations(), 1);
    }
}
