//! Runtime error taxonomy.

use serde_json::{Value, json};
use tessera_api::ApiError;
use thiserror::Error;

/// HTTP statuses worth another attempt.
pub const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Every failure the runtime can observe.
///
/// None of these escape a public entry point: actions route them into the error
/// continuation and data sources store them as structured results.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String, body: Value },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("GraphQL error: {0}")]
    Graphql(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Capability error: {capability} - {message}")]
    Capability { capability: String, message: String },

    #[error("Cancelled")]
    Cancelled,
}

impl RuntimeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the retry coordinator may try again after this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => RETRYABLE_STATUSES.contains(status),
            Self::Transport(_) | Self::Timeout | Self::Socket(_) => true,
            Self::Validation(_) | Self::Graphql(_) | Self::Mapping(_) | Self::Capability { .. } | Self::Cancelled => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// `{"ok": false, "error": <message>, "status": <status|null>}`.
    pub fn to_structured(&self) -> Value {
        json!({
            "ok": false,
            "error": self.to_string(),
            "status": self.status(),
        })
    }
}

impl From<ApiError> for RuntimeError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Timeout => RuntimeError::Timeout,
            ApiError::InvalidRequest(message) => RuntimeError::Validation(message),
            ApiError::Network(message) => RuntimeError::Transport(message),
            ApiError::Socket(message) => RuntimeError::Socket(message),
        }
    }
}
