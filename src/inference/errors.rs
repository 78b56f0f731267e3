//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility — these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur during reasoning-backend operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the client timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Every model in the fallback chain was unavailable.
    #[error("all models unavailable (tried: {})", attempted.join(", "))]
    AllModelsUnavailable {
        attempted: Vec<String>,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The response body could not be parsed into a completion.
    #[error("response parse error: {reason}")]
    ResponseParse {
        reason: String,
    },

    /// The model returned neither text nor tool calls.
    #[error("empty completion from {model}")]
    EmptyCompletion {
        model: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_http_error() {
        let err = InferenceError::HttpError {
            status: 500,
            body: "test body".to_string(),
        };
        assert_eq!(err.error_body(), Some("test body"));
    }

    #[test]
    fn test_error_body_non_http() {
        let err = InferenceError::Timeout { duration_secs: 5 };
        assert!(err.error_body().is_none());
    }

    #[test]
    fn test_all_models_unavailable_lists_attempts() {
        let err = InferenceError::AllModelsUnavailable {
            attempted: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "all models unavailable (tried: a, b)");
    }
}
