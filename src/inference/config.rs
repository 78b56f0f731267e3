//! Model configuration loading and validation.
//!
//! Reads a models YAML file (e.g. `models.yaml`) and resolves environment
//! variables. This file is the single source of truth for model endpoints and
//! fallback chains.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::errors::InferenceError;
use crate::config::interpolate_env_vars;

// ─── Public Types ────────────────────────────────────────────────────────────

/// A single model's runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub display_name: String,
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default)]
    pub model_name: Option<String>,
    pub base_url: String,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_runtime() -> String {
    "ollama".to_string()
}
fn default_context_window() -> u32 {
    8_192
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    1_024
}

/// Top-level model registry.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub active_model: String,
    pub models: HashMap<String, ModelConfig>,
    #[serde(default)]
    pub fallback_chain: Vec<String>,
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Load and parse the models configuration file.
///
/// Performs environment-variable interpolation on string values matching
/// `${VAR_NAME}` or `${VAR_NAME:-default}`.
pub fn load_models_config(path: &Path) -> Result<ModelsConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let interpolated = interpolate_env_vars(&raw);

    serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to parse models config: {e}"),
    })
}

/// Resolve the active model configuration, respecting the fallback chain.
///
/// Returns `(model_key, ModelConfig)` for the first model that exists in the
/// config. Actual connectivity is checked at runtime by the client.
pub fn resolve_active_model(
    config: &ModelsConfig,
) -> Result<(String, ModelConfig), InferenceError> {
    if let Some(model) = config.models.get(&config.active_model) {
        return Ok((config.active_model.clone(), model.clone()));
    }

    for key in &config.fallback_chain {
        if let Some(model) = config.models.get(key) {
            return Ok((key.clone(), model.clone()));
        }
    }

    Err(InferenceError::ConfigError {
        reason: format!(
            "active model '{}' not found in config and no fallback available",
            config.active_model
        ),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
