//! OpenAI-compatible inference client.
//!
//! Sends chat completion requests to an LLM endpoint and parses the complete
//! response. Handles the fallback chain when the primary model is unavailable.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use uuid::Uuid;

use super::backend::ReasoningBackend;
use super::config::{ModelConfig, ModelsConfig};
use super::errors::InferenceError;
use super::types::{ChatCompletionRequest, ChatMessage, Completion, ToolCall, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout.
///
/// The runtime enforces tighter per-tier deadlines on top of this; the client
/// timeout only guards against a hung socket outliving the process' interest.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Which model the client currently targets, plus the models already exhausted.
#[derive(Debug, Clone)]
struct ModelCursor {
    key: String,
    model: ModelConfig,
    exhausted: Vec<String>,
}

/// Client for an OpenAI-compatible inference endpoint.
///
/// Every `complete` call starts from the active model; fallbacks only apply
/// within the call that hit the failure.
pub struct InferenceClient {
    http: HttpClient,
    config: ModelsConfig,
    primary: ModelCursor,
    cursor: Mutex<ModelCursor>,
}

impl InferenceClient {
    /// Create a new inference client from the models configuration.
    ///
    /// Resolves the active model from config. Does NOT check connectivity —
    /// that happens on the first request.
    pub fn from_config(config: ModelsConfig) -> Result<Self, InferenceError> {
        Self::with_http_builder(
            config,
            HttpClient::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT),
        )
    }

    fn with_http_builder(
        config: ModelsConfig,
        builder: reqwest::ClientBuilder,
    ) -> Result<Self, InferenceError> {
        let (key, model) = super::config::resolve_active_model(&config)?;

        let http = builder.build().map_err(|e| InferenceError::ConnectionFailed {
            endpoint: model.base_url.clone(),
            reason: format!("failed to build HTTP client: {e}"),
        })?;

        let primary = ModelCursor {
            key,
            model,
            exhausted: Vec::new(),
        };
        Ok(Self {
            http,
            config,
            cursor: Mutex::new(primary.clone()),
            primary,
        })
    }

    /// The name of the currently selected model.
    pub fn current_model_name(&self) -> String {
        self.snapshot().model.display_name
    }

    /// The base URL of the current model's endpoint.
    pub fn current_base_url(&self) -> String {
        self.snapshot().model.base_url
    }

    fn snapshot(&self) -> ModelCursor {
        match self.cursor.lock() {
            Ok(cursor) => cursor.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    // ─── Chat Completion ─────────────────────────────────────────────────

    /// Attempt a single non-streaming request against `model`.
    async fn try_request(
        &self,
        key: &str,
        model: &ModelConfig,
        messages: &[ChatMessage],
        tools: &Option<Vec<ToolDefinition>>,
    ) -> Result<Completion, InferenceError> {
        let url = format!("{}/chat/completions", model.base_url);
        let body = ChatCompletionRequest {
            model: model.model_name.clone().unwrap_or_else(|| key.to_string()),
            messages: messages.to_vec(),
            tools: tools.clone(),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            temperature: model.temperature,
            max_tokens: model.max_tokens,
            stream: false,
        };

        tracing::debug!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "sending completion request"
        );

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout {
                        duration_secs: REQUEST_TIMEOUT.as_secs(),
                    }
                } else {
                    InferenceError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response.text().await.map_err(|e| InferenceError::ResponseParse {
            reason: format!("failed to read response body: {e}"),
        })?;

        let completion = parse_completion_response(&body_text)?;
        if completion.text.is_none() && completion.tool_calls.is_empty() {
            return Err(InferenceError::EmptyCompletion {
                model: model.display_name.clone(),
            });
        }
        Ok(completion)
    }

    // ─── Fallback Chain ──────────────────────────────────────────────────

    /// Move to the next model in the fallback chain.
    ///
    /// Returns `Err` if no more fallbacks are available.
    pub fn try_next_fallback(&self) -> Result<(), InferenceError> {
        let mut cursor = match self.cursor.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        let current = cursor.key.clone();
        cursor.exhausted.push(current);

        for key in &self.config.fallback_chain {
            if cursor.exhausted.contains(key) {
                continue;
            }
            if let Some(model) = self.config.models.get(key) {
                tracing::warn!(from = %cursor.key, to = %key, "falling back to next model");
                cursor.key = key.clone();
                cursor.model = model.clone();
                return Ok(());
            }
        }

        Err(InferenceError::AllModelsUnavailable {
            attempted: cursor.exhausted.clone(),
        })
    }

    /// Point the cursor back at the active model and forget exhausted ones.
    fn reset_to_primary(&self) {
        let mut cursor = match self.cursor.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        if cursor.key != self.primary.key || !cursor.exhausted.is_empty() {
            tracing::debug!(
                from = %cursor.key,
                to = %self.primary.key,
                "returning to active model"
            );
            *cursor = self.primary.clone();
        }
    }

    /// Number of remaining fallback models.
    fn remaining_fallbacks(&self) -> usize {
        let cursor = self.snapshot();
        self.config
            .fallback_chain
            .iter()
            .filter(|k| !cursor.exhausted.contains(k))
            .count()
    }

    /// Whether an error should trigger a fallback attempt.
    ///
    /// HTTP 404 is included because Ollama returns 404 when a model isn't
    /// pulled/installed — the next model in the chain may still be available.
    fn is_retriable(err: &InferenceError) -> bool {
        matches!(
            err,
            InferenceError::ConnectionFailed { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::HttpError { status: 404, .. }
                | InferenceError::HttpError { status: 500, .. }
                | InferenceError::HttpError { status: 502..=504, .. }
        )
    }
}

#[async_trait]
impl ReasoningBackend for InferenceClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Completion, InferenceError> {
        self.reset_to_primary();
        let mut last_error: Option<InferenceError> = None;

        for _attempt in 0..=self.remaining_fallbacks() {
            let cursor = self.snapshot();
            match self
                .try_request(&cursor.key, &cursor.model, &messages, &tools)
                .await
            {
                Ok(completion) => return Ok(completion),
                Err(e) if Self::is_retriable(&e) => {
                    tracing::warn!(model = %cursor.key, error = %e, "model request failed");
                    last_error = Some(e);
                    if self.try_next_fallback().is_err() {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(InferenceError::AllModelsUnavailable {
            attempted: self.snapshot().exhausted,
        }))
    }
}

// ─── Response Parsing ────────────────────────────────────────────────────────

/// Parse a non-streaming `/chat/completions` response body.
pub fn parse_completion_response(body: &str) -> Result<Completion, InferenceError> {
    #[derive(Deserialize)]
    struct Response {
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: Message,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct Message {
        content: Option<String>,
        tool_calls: Option<Vec<RawToolCall>>,
    }

    #[derive(Deserialize)]
    struct RawToolCall {
        id: Option<String>,
        function: RawFunction,
    }

    #[derive(Deserialize)]
    struct RawFunction {
        name: String,
        arguments: String,
    }

    let resp: Response = serde_json::from_str(body).map_err(|e| InferenceError::ResponseParse {
        reason: format!("failed to parse completion response: {e}"),
    })?;

    let choice = resp.choices.into_iter().next().ok_or(InferenceError::ResponseParse {
        reason: "empty choices array".into(),
    })?;

    let text = choice
        .message
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let mut tool_calls = Vec::new();
    for tc in choice.message.tool_calls.unwrap_or_default() {
        // Arguments arrive as a JSON-encoded string; an empty string means `{}`.
        let arguments = if tc.function.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&tc.function.arguments).map_err(|e| {
                InferenceError::ResponseParse {
                    reason: format!("invalid arguments for '{}': {e}", tc.function.name),
                }
            })?
        };
        tool_calls.push(ToolCall {
            id: tc.id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
            name: tc.function.name,
            arguments,
        });
    }

    Ok(Completion {
        text,
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
