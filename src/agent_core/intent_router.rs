//! Intent router — cheap, local classification of utterances into tiers.
//!
//! Rules are compiled once from [`RouterConfig`] and evaluated in declared
//! order, cheapest and most specific first:
//!
//! 1. empty utterance
//! 2. canned-reply exact phrases (Instant)
//! 3. fact rules in declared order, each phrases first (ExplicitFact)
//! 4. multi-step patterns (ComplexMultiStep)
//! 5. reasoning patterns (SimpleReasoning)
//! 6. long compound request heuristic (ComplexMultiStep)
//!
//! The first rule scoring at least `min_confidence` decides the tier. A later
//! rule of the same tier with higher specificity overrides it. No match falls
//! back to SimpleReasoning with confidence 0.0.

use std::collections::HashSet;

use regex::Regex;
use serde_json::Value;

use super::types::{ClassificationResult, ComplexityTier, Query};
use crate::config::{ConfigError, RouterConfig};

/// Rule id used for blank utterances.
pub const EMPTY_UTTERANCE_RULE: &str = "empty_utterance";

/// Canned reply for blank utterances.
const EMPTY_UTTERANCE_REPLY: &str = "Sorry, I didn't catch that.";

/// Confidence assigned to regex matches.
const PATTERN_CONFIDENCE: f64 = 0.8;

/// Keyword groups signalling a request made of several steps.
const CONNECTIVE_GROUPS: &[&[&str]] = &[
    &[" and "],
    &[" then ", "after that", "afterwards"],
    &[" also ", " plus "],
    &[" each ", " every ", " all "],
];

// ─── Rules ──────────────────────────────────────────────────────────────────

/// Structural heuristics that need no phrase table.
#[derive(Debug, Clone)]
pub enum Heuristic {
    /// Long utterances, boosted by connective keywords.
    LongCompound { min_words: usize },
}

/// How a rule recognizes an utterance.
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    Empty,
    ExactPhrase(HashSet<String>),
    Pattern(Regex),
    Heuristic(Heuristic),
}

impl RuleMatcher {
    /// Higher is more specific. Used only to break ties inside a tier.
    pub fn specificity(&self) -> u8 {
        match self {
            Self::Empty | Self::ExactPhrase(_) => 3,
            Self::Pattern(_) => 2,
            Self::Heuristic(_) => 1,
        }
    }

    /// Confidence in `[0, 1]` if the rule matches the normalized text.
    fn score(&self, normalized: &str) -> Option<f64> {
        match self {
            Self::Empty => normalized.is_empty().then_some(1.0),
            Self::ExactPhrase(phrases) => phrases.contains(normalized).then_some(1.0),
            Self::Pattern(re) => re.is_match(normalized).then_some(PATTERN_CONFIDENCE),
            Self::Heuristic(Heuristic::LongCompound { min_words }) => {
                let words = normalized.split_whitespace().count();
                if words < *min_words {
                    return None;
                }
                let padded = format!(" {normalized} ");
                let connectives = keyword_score(&padded, CONNECTIVE_GROUPS);
                Some((0.5 + 0.1 * connectives as f64).min(0.9))
            }
        }
    }
}

/// Score text against keyword groups: the number of groups with any hit.
fn keyword_score(text: &str, groups: &[&[&str]]) -> usize {
    groups
        .iter()
        .filter(|group| group.iter().any(|kw| text.contains(kw)))
        .count()
}

/// The single tool call an ExplicitFact rule stands for.
#[derive(Debug, Clone, PartialEq)]
pub struct FactBinding {
    pub tool: String,
    pub arguments: Value,
}

/// A compiled routing rule.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub id: String,
    pub tier: ComplexityTier,
    pub matcher: RuleMatcher,
    /// Canned reply (Instant rules).
    pub reply: Option<String>,
    /// Bound tool call (ExplicitFact rules).
    pub binding: Option<FactBinding>,
}

impl RoutingRule {
    fn new(id: impl Into<String>, tier: ComplexityTier, matcher: RuleMatcher) -> Self {
        Self {
            id: id.into(),
            tier,
            matcher,
            reply: None,
            binding: None,
        }
    }
}

// ─── IntentRouter ───────────────────────────────────────────────────────────

/// Deterministic, total classifier. Never blocks, never fails.
#[derive(Debug, Clone)]
pub struct IntentRouter {
    rules: Vec<RoutingRule>,
    min_confidence: f64,
}

impl IntentRouter {
    /// Compile rules from configuration. Fails only on invalid regexes.
    pub fn from_config(config: &RouterConfig) -> Result<Self, ConfigError> {
        let mut rules = Vec::new();

        let mut empty = RoutingRule::new(
            EMPTY_UTTERANCE_RULE,
            ComplexityTier::Instant,
            RuleMatcher::Empty,
        );
        empty.reply = Some(EMPTY_UTTERANCE_REPLY.to_string());
        rules.push(empty);

        for entry in &config.instant_responses {
            let mut rule = RoutingRule::new(
                entry.id.clone(),
                ComplexityTier::Instant,
                RuleMatcher::ExactPhrase(phrase_set(&entry.phrases)),
            );
            rule.reply = Some(entry.reply.clone());
            rules.push(rule);
        }

        for fact in &config.fact_rules {
            let binding = FactBinding {
                tool: fact.tool.clone(),
                arguments: fact.arguments.clone(),
            };
            if !fact.phrases.is_empty() {
                let mut rule = RoutingRule::new(
                    fact.id.clone(),
                    ComplexityTier::ExplicitFact,
                    RuleMatcher::ExactPhrase(phrase_set(&fact.phrases)),
                );
                rule.binding = Some(binding.clone());
                rules.push(rule);
            }
            for pattern in &fact.patterns {
                let field = format!("router.fact_rules.{}", fact.id);
                let mut rule = RoutingRule::new(
                    fact.id.clone(),
                    ComplexityTier::ExplicitFact,
                    RuleMatcher::Pattern(compile(&field, pattern)?),
                );
                rule.binding = Some(binding.clone());
                rules.push(rule);
            }
        }

        for (i, pattern) in config.complex_patterns.iter().enumerate() {
            rules.push(RoutingRule::new(
                format!("complex_pattern_{i}"),
                ComplexityTier::ComplexMultiStep,
                RuleMatcher::Pattern(compile("router.complex_patterns", pattern)?),
            ));
        }
        for (i, pattern) in config.reasoning_patterns.iter().enumerate() {
            rules.push(RoutingRule::new(
                format!("reasoning_pattern_{i}"),
                ComplexityTier::SimpleReasoning,
                RuleMatcher::Pattern(compile("router.reasoning_patterns", pattern)?),
            ));
        }

        rules.push(RoutingRule::new(
            "long_compound_request",
            ComplexityTier::ComplexMultiStep,
            RuleMatcher::Heuristic(Heuristic::LongCompound {
                min_words: config.complex_min_words.max(1),
            }),
        ));

        tracing::debug!(rule_count = rules.len(), "compiled routing rules");

        Ok(Self {
            rules,
            min_confidence: config.min_confidence,
        })
    }

    /// Classify a query. Total: always returns exactly one tier.
    pub fn classify(&self, query: &Query) -> ClassificationResult {
        let text = query.normalized();

        for (i, rule) in self.rules.iter().enumerate() {
            let Some(confidence) = rule.matcher.score(text) else {
                continue;
            };
            if confidence < self.min_confidence {
                tracing::debug!(rule = %rule.id, confidence, "rule matched below min confidence");
                continue;
            }

            let (winner, confidence) = self.tie_break(i, confidence, text);
            tracing::debug!(rule = %winner.id, tier = %winner.tier, confidence, "classified");
            return ClassificationResult {
                tier: winner.tier,
                confidence,
                matched_rule: winner.id.clone(),
            };
        }

        ClassificationResult {
            tier: ComplexityTier::SimpleReasoning,
            confidence: 0.0,
            matched_rule: ClassificationResult::DEFAULT_RULE.to_string(),
        }
    }

    /// Among later rules of the same tier that also match, prefer the most
    /// specific one (earliest on equal specificity).
    fn tie_break(&self, first: usize, confidence: f64, text: &str) -> (&RoutingRule, f64) {
        let mut best = (&self.rules[first], confidence);
        for rule in &self.rules[first + 1..] {
            if rule.tier != best.0.tier
                || rule.matcher.specificity() <= best.0.matcher.specificity()
            {
                continue;
            }
            if let Some(c) = rule.matcher.score(text) {
                if c >= self.min_confidence {
                    best = (rule, c);
                }
            }
        }
        best
    }

    /// Canned reply for an Instant rule.
    pub fn instant_reply(&self, rule_id: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.id == rule_id && r.reply.is_some())
            .and_then(|r| r.reply.as_deref())
    }

    /// Tool binding for an ExplicitFact rule.
    pub fn fact_binding(&self, rule_id: &str) -> Option<&FactBinding> {
        self.rules
            .iter()
            .find(|r| r.id == rule_id && r.binding.is_some())
            .and_then(|r| r.binding.as_ref())
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }
}

fn phrase_set(phrases: &[String]) -> HashSet<String> {
    phrases
        .iter()
        .map(|p| super::types::normalize_text(p))
        .filter(|p| !p.is_empty())
        .collect()
}

fn compile(field: &str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::Invalid {
        field: field.to_string(),
        reason: format!("bad pattern '{pattern}': {e}"),
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FactRuleConfig, InstantResponseConfig};

    fn router() -> IntentRouter {
        IntentRouter::from_config(&RouterConfig::default()).unwrap()
    }

    fn classify(text: &str) -> ClassificationResult {
        router().classify(&Query::new(text))
    }

    #[test]
    fn test_greeting_is_instant() {
        let result = classify("Hi!");
        assert_eq!(result.tier, ComplexityTier::Instant);
        assert_eq!(result.matched_rule, "greeting");
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_empty_utterance_is_instant() {
        for text in ["", "   ", "\n\t"] {
            let result = classify(text);
            assert_eq!(result.tier, ComplexityTier::Instant);
            assert_eq!(result.matched_rule, EMPTY_UTTERANCE_RULE);
        }
        assert!(router().instant_reply(EMPTY_UTTERANCE_RULE).is_some());
    }

    #[test]
    fn test_time_question_is_fact_with_binding() {
        let r = router();
        let result = r.classify(&Query::new("What time is it?"));
        assert_eq!(result.tier, ComplexityTier::ExplicitFact);
        let binding = r.fact_binding(&result.matched_rule).unwrap();
        assert_eq!(binding.tool, "clock.current_time");
    }

    #[test]
    fn test_fact_pattern_matches_variants() {
        let result = classify("hey what's the current time in here");
        assert_eq!(result.tier, ComplexityTier::ExplicitFact);
        assert_eq!(result.matched_rule, "current_time");
        assert_eq!(result.confidence, PATTERN_CONFIDENCE);
    }

    #[test]
    fn test_explanation_is_simple_reasoning() {
        let result = classify("explain how photosynthesis works");
        assert_eq!(result.tier, ComplexityTier::SimpleReasoning);
        assert!(result.matched_rule.starts_with("reasoning_pattern"));
    }

    #[test]
    fn test_file_task_is_complex() {
        let result = classify("find all text files on my desktop and summarize them");
        assert_eq!(result.tier, ComplexityTier::ComplexMultiStep);
    }

    #[test]
    fn test_long_compound_request_is_complex() {
        let text = "I need you to look at the budget numbers we talked about earlier \
                    and write up a short note for the team about the changes";
        let result = classify(text);
        assert_eq!(result.tier, ComplexityTier::ComplexMultiStep);
        assert_eq!(result.matched_rule, "long_compound_request");
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn test_unmatched_defaults_to_simple_reasoning() {
        let result = classify("penguins");
        assert_eq!(result.tier, ComplexityTier::SimpleReasoning);
        assert_eq!(result.confidence, 0.0);
        assert!(result.is_default());
    }

    #[test]
    fn test_totality_over_arbitrary_inputs() {
        let r = router();
        let inputs = [
            "", "?", "!!!", "a", "ok", "🙂", "what", "and and and and",
            "ÄÖÜ ß", "\u{0}", "what time is it and also what's the date",
            &"word ".repeat(500),
        ];
        for input in inputs {
            let result = r.classify(&Query::new(input));
            assert!(ComplexityTier::ALL.contains(&result.tier));
            assert!((0.0..=1.0).contains(&result.confidence), "{input:?}");
        }
    }

    #[test]
    fn test_classification_is_deterministic() {
        let r = router();
        let q = Query::new("find my downloads folder and list the pdfs");
        assert_eq!(r.classify(&q), r.classify(&q));
    }

    #[test]
    fn test_same_tier_prefers_higher_specificity() {
        // A pattern rule declared first and an exact phrase rule declared later,
        // both ExplicitFact: the exact phrase wins.
        let config = RouterConfig {
            instant_responses: vec![],
            fact_rules: vec![
                FactRuleConfig {
                    id: "weather_generic".into(),
                    phrases: vec![],
                    patterns: vec![r"weather".into()],
                    tool: "weather.forecast".into(),
                    arguments: serde_json::json!({}),
                },
                FactRuleConfig {
                    id: "weather_today".into(),
                    phrases: vec!["weather today".into()],
                    patterns: vec![],
                    tool: "weather.today".into(),
                    arguments: serde_json::json!({"day": 0}),
                },
            ],
            ..RouterConfig::default()
        };
        let r = IntentRouter::from_config(&config).unwrap();
        let result = r.classify(&Query::new("weather today"));
        assert_eq!(result.matched_rule, "weather_today");
        assert_eq!(r.fact_binding("weather_today").unwrap().arguments["day"], 0);
    }

    #[test]
    fn test_min_confidence_filters_weak_rules() {
        let config = RouterConfig {
            min_confidence: 0.95,
            ..RouterConfig::default()
        };
        let r = IntentRouter::from_config(&config).unwrap();
        // Pattern confidence (0.8) is below threshold; exact phrases still win.
        assert!(r.classify(&Query::new("explain gravity")).is_default());
        assert_eq!(r.classify(&Query::new("hello")).tier, ComplexityTier::Instant);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let config = RouterConfig {
            complex_patterns: vec!["(unclosed".into()],
            ..RouterConfig::default()
        };
        let err = IntentRouter::from_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_custom_instant_reply() {
        let config = RouterConfig {
            instant_responses: vec![InstantResponseConfig {
                id: "ping".into(),
                phrases: vec!["Ping".into()],
                reply: "Pong.".into(),
            }],
            ..RouterConfig::default()
        };
        let r = IntentRouter::from_config(&config).unwrap();
        let result = r.classify(&Query::new("ping"));
        assert_eq!(r.instant_reply(&result.matched_rule), Some("Pong."));
    }
}
