//! Runtime configuration.
//!
//! Everything the runtime can be tuned with lives in [`RuntimeConfig`], loaded
//! from a single YAML file. Every field has a safe default, so an empty file
//! (or no file at all) produces a working configuration.
//!
//! String values may reference environment variables as `${VAR}` or
//! `${VAR:-default}`; path values may start with `~`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::types::ComplexityTier;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Configuration loading or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ─── Top Level ───────────────────────────────────────────────────────────────

/// Complete runtime configuration, passed explicitly to the controller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tiers: TiersConfig,
    pub tool_selection: ToolSelectionConfig,
    pub session: SessionConfig,
    pub multi_step: MultiStepConfig,
    pub monitor: MonitorConfig,
    pub router: RouterConfig,
    pub concurrency: ConcurrencyPolicy,
    pub logging: LoggingConfig,
    /// Optional path to a models YAML file. Without it the reasoning tiers run
    /// against an unconfigured backend and always escalate to an apology.
    pub models: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Load, interpolate and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::from_yaml_str(&raw)?;
        tracing::info!(path = %path.display(), "loaded runtime config");
        Ok(config)
    }

    /// Parse configuration from YAML text. Performs env interpolation, tilde
    /// expansion on path fields, and validation.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(raw);
        // An empty document deserializes as unit; treat it as all-defaults.
        let mut config: RuntimeConfig = if interpolated.trim().is_empty() {
            RuntimeConfig::default()
        } else {
            serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
                reason: e.to_string(),
            })?
        };

        config.session.journal_path = config.session.journal_path.map(expand_tilde_path);
        config.logging.log_dir = config.logging.log_dir.map(expand_tilde_path);
        config.models = config.models.map(expand_tilde_path);

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for tier in ComplexityTier::ALL {
            let budget = self.tiers.budget(tier);
            let field = format!("tiers.{}", tier.config_key());
            if budget.timeout_ms == 0 {
                return Err(ConfigError::invalid(field, "timeout_ms must be > 0"));
            }
            if budget.target_ms > budget.timeout_ms {
                return Err(ConfigError::invalid(
                    field,
                    format!(
                        "target_ms ({}) exceeds timeout_ms ({})",
                        budget.target_ms, budget.timeout_ms
                    ),
                ));
            }
        }

        let ts = &self.tool_selection;
        if ts.max_tools == 0 {
            return Err(ConfigError::invalid("tool_selection.max_tools", "must be > 0"));
        }
        if ts.cache_capacity == 0 {
            return Err(ConfigError::invalid(
                "tool_selection.cache_capacity",
                "must be > 0",
            ));
        }
        for (field, weight) in [
            ("tool_selection.name_weight", ts.name_weight),
            ("tool_selection.description_weight", ts.description_weight),
            ("tool_selection.prefix_weight", ts.prefix_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::invalid(field, "must be a non-negative number"));
            }
        }

        if self.session.agent_memory_notes == 0 {
            return Err(ConfigError::invalid(
                "session.agent_memory_notes",
                "must be > 0",
            ));
        }
        if self.multi_step.max_iterations == 0 {
            return Err(ConfigError::invalid("multi_step.max_iterations", "must be > 0"));
        }

        let m = &self.monitor;
        if m.buffer_size == 0 {
            return Err(ConfigError::invalid("monitor.buffer_size", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&m.good_rate) || !(0.0..=1.0).contains(&m.excellent_rate) {
            return Err(ConfigError::invalid("monitor", "rates must be within [0, 1]"));
        }
        if m.good_rate > m.excellent_rate {
            return Err(ConfigError::invalid(
                "monitor.good_rate",
                "must not exceed excellent_rate",
            ));
        }

        if !(0.0..=1.0).contains(&self.router.min_confidence) {
            return Err(ConfigError::invalid(
                "router.min_confidence",
                "must be within [0, 1]",
            ));
        }

        Ok(())
    }
}

// ─── Tiers ───────────────────────────────────────────────────────────────────

/// Latency target (reported) and hard timeout (enforced) for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TierBudget {
    pub target_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TiersConfig {
    pub instant: TierBudget,
    pub explicit_fact: TierBudget,
    pub simple_reasoning: TierBudget,
    pub complex_multi_step: TierBudget,
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            instant: TierBudget {
                target_ms: 50,
                timeout_ms: 100,
            },
            explicit_fact: TierBudget {
                target_ms: 300,
                timeout_ms: 2_000,
            },
            simple_reasoning: TierBudget {
                target_ms: 1_000,
                timeout_ms: 8_000,
            },
            complex_multi_step: TierBudget {
                target_ms: 5_000,
                timeout_ms: 30_000,
            },
        }
    }
}

impl TiersConfig {
    pub fn budget(&self, tier: ComplexityTier) -> TierBudget {
        match tier {
            ComplexityTier::Instant => self.instant,
            ComplexityTier::ExplicitFact => self.explicit_fact,
            ComplexityTier::SimpleReasoning => self.simple_reasoning,
            ComplexityTier::ComplexMultiStep => self.complex_multi_step,
        }
    }
}

// ─── Tool Selection ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolSelectionConfig {
    pub max_tools: usize,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub name_weight: f64,
    pub description_weight: f64,
    pub prefix_weight: f64,
}

impl Default for ToolSelectionConfig {
    fn default() -> Self {
        Self {
            max_tools: 5,
            cache_capacity: 128,
            cache_ttl_secs: 300,
            name_weight: 2.0,
            description_weight: 1.0,
            prefix_weight: 0.5,
        }
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of most recent exchanges rendered into reasoning prompts.
    pub context_window: usize,
    /// Upper bound on working-memory notes held by the persistent agent.
    pub agent_memory_notes: usize,
    /// Full-history cap; 0 keeps every exchange for the session summary.
    pub max_history: usize,
    /// SQLite journal file. Journaling is disabled when unset.
    pub journal_path: Option<PathBuf>,
    pub system_prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context_window: 6,
            agent_memory_notes: 24,
            max_history: 0,
            journal_path: None,
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_system_prompt() -> String {
    "You are a concise voice assistant. Answer in one to three short sentences \
     suitable for being read aloud. When tools are available, call them to gather \
     facts instead of guessing, then answer from their results."
        .to_string()
}

// ─── Multi-Step ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MultiStepConfig {
    pub max_iterations: usize,
    pub max_tool_result_chars: usize,
}

impl Default for MultiStepConfig {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            max_tool_result_chars: 6_000,
        }
    }
}

// ─── Monitor ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub buffer_size: usize,
    pub excellent_rate: f64,
    pub good_rate: f64,
    pub min_samples_for_level: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            buffer_size: 200,
            excellent_rate: 0.95,
            good_rate: 0.80,
            min_samples_for_level: 5,
        }
    }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// A canned reply for a set of exact phrases.
#[derive(Debug, Clone, Deserialize)]
pub struct InstantResponseConfig {
    pub id: String,
    pub phrases: Vec<String>,
    pub reply: String,
}

/// A deterministic single-tool answer bound to phrases and patterns.
#[derive(Debug, Clone, Deserialize)]
pub struct FactRuleConfig {
    pub id: String,
    #[serde(default)]
    pub phrases: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    pub tool: String,
    #[serde(default = "empty_object")]
    pub arguments: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub min_confidence: f64,
    pub instant_responses: Vec<InstantResponseConfig>,
    pub fact_rules: Vec<FactRuleConfig>,
    pub complex_patterns: Vec<String>,
    pub reasoning_patterns: Vec<String>,
    /// Utterances at least this long are treated as multi-step requests.
    pub complex_min_words: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            instant_responses: default_instant_responses(),
            fact_rules: default_fact_rules(),
            complex_patterns: vec![
                r"\b(?:find|search|locate|list|scan|look for|organi[sz]e)\b.*\b(?:files?|folders?|director(?:y|ies)|desktop|documents|downloads)\b".into(),
                r"\b(?:and then|after that|and (?:summari[sz]e|compare|save|rename|move|copy|count))\b".into(),
                r"\bstep[- ]by[- ]step\b.*\b(?:files?|folders?)\b".into(),
            ],
            reasoning_patterns: vec![
                r"^(?:explain|describe|why|how|what is|what are|what's|who|tell me about|define|compare|summari[sz]e)\b".into(),
            ],
            complex_min_words: 18,
        }
    }
}

fn default_instant_responses() -> Vec<InstantResponseConfig> {
    let entry = |id: &str, phrases: &[&str], reply: &str| InstantResponseConfig {
        id: id.to_string(),
        phrases: phrases.iter().map(|p| p.to_string()).collect(),
        reply: reply.to_string(),
    };
    vec![
        entry(
            "greeting",
            &[
                "hi",
                "hello",
                "hey",
                "hey there",
                "hello there",
                "good morning",
                "good afternoon",
                "good evening",
            ],
            "Hello! How can I help?",
        ),
        entry("thanks", &["thanks", "thank you", "thanks a lot", "cheers"], "You're welcome."),
        entry("acknowledge", &["ok", "okay", "got it", "sounds good", "cool"], "Okay."),
        entry("farewell", &["bye", "goodbye", "see you", "good night"], "Goodbye!"),
        entry(
            "status",
            &["how are you", "how are you doing"],
            "I'm doing well and ready to help.",
        ),
    ]
}

fn default_fact_rules() -> Vec<FactRuleConfig> {
    vec![
        FactRuleConfig {
            id: "current_time".into(),
            phrases: vec![
                "what time is it".into(),
                "what's the time".into(),
                "what is the time".into(),
                "tell me the time".into(),
            ],
            patterns: vec![
                r"\bwhat(?:'s| is) the (?:current )?time\b".into(),
                r"\btime is it\b".into(),
            ],
            tool: "clock.current_time".into(),
            arguments: empty_object(),
        },
        FactRuleConfig {
            id: "current_date".into(),
            phrases: vec![
                "what's the date".into(),
                "what is the date".into(),
                "what day is it".into(),
                "what's today's date".into(),
            ],
            patterns: vec![
                r"\bwhat(?:'s| is) (?:the |today's )?date\b".into(),
                r"\bwhat day is (?:it|today)\b".into(),
            ],
            tool: "clock.current_date".into(),
            arguments: empty_object(),
        },
    ]
}

// ─── Concurrency / Logging ───────────────────────────────────────────────────

/// What to do with a turn that arrives while another is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// Wait for the in-flight turn to finish.
    #[default]
    Queue,
    /// Fail fast with a busy error.
    Reject,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
pub(crate) fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{}", home.display(), &path[1..]);
        }
    }
    path.to_string()
}

fn expand_tilde_path(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(expand_tilde(s)),
        None => path,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tool_selection.max_tools, 5);
        assert_eq!(config.tiers.budget(ComplexityTier::ExplicitFact).timeout_ms, 2_000);
        assert_eq!(config.concurrency, ConcurrencyPolicy::Queue);
    }

    #[test]
    fn test_empty_document_is_all_defaults() {
        let config = RuntimeConfig::from_yaml_str("").unwrap();
        assert_eq!(config.monitor.buffer_size, 200);
        assert_eq!(config.router.fact_rules.len(), 2);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let yaml = r#"
tiers:
  simple_reasoning: { target_ms: 500, timeout_ms: 4000 }
tool_selection:
  max_tools: 3
concurrency: reject
"#;
        let config = RuntimeConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.tiers.simple_reasoning.timeout_ms, 4_000);
        assert_eq!(config.tiers.instant.timeout_ms, 100);
        assert_eq!(config.tool_selection.max_tools, 3);
        assert_eq!(config.tool_selection.cache_capacity, 128);
        assert_eq!(config.concurrency, ConcurrencyPolicy::Reject);
    }

    #[test]
    fn test_target_above_timeout_rejected() {
        let yaml = "tiers:\n  instant: { target_ms: 500, timeout_ms: 100 }\n";
        let err = RuntimeConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "tiers.instant"));
    }

    #[test]
    fn test_zero_max_tools_rejected() {
        let err = RuntimeConfig::from_yaml_str("tool_selection:\n  max_tools: 0\n").unwrap_err();
        assert!(err.to_string().contains("max_tools"));
    }

    #[test]
    fn test_inverted_monitor_rates_rejected() {
        let yaml = "monitor:\n  excellent_rate: 0.5\n  good_rate: 0.9\n";
        assert!(RuntimeConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = RuntimeConfig::from_yaml_str("tiers: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_interpolates_and_expands_paths() {
        std::env::set_var("__TEST_RUNTIME_JOURNAL__", "~/runtime/journal.db");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "session:\n  journal_path: \"${{__TEST_RUNTIME_JOURNAL__}}\"").unwrap();

        let config = RuntimeConfig::load(file.path()).unwrap();
        let journal = config.session.journal_path.unwrap();
        assert!(!journal.to_string_lossy().starts_with('~'));
        assert!(journal.ends_with("runtime/journal.db"));
        std::env::remove_var("__TEST_RUNTIME_JOURNAL__");
    }

    #[test]
    fn test_load_missing_file() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/runtime.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__TEST_NONEXISTENT_VAR__");
        let result = interpolate_env_vars("${__TEST_NONEXISTENT_VAR__:-/fallback/path}");
        assert_eq!(result, "/fallback/path");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__TEST_RUNTIME_VAR__", "/custom/path");
        let result = interpolate_env_vars("dir: ${__TEST_RUNTIME_VAR__:-/fallback}/x");
        assert_eq!(result, "dir: /custom/path/x");
        std::env::remove_var("__TEST_RUNTIME_VAR__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain: text with $dollar";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde_leaves_other_users_alone() {
        assert_eq!(expand_tilde("~other/file"), "~other/file");
        assert_eq!(expand_tilde("/abs/path"), "/abs/path");
    }
}
