//! Error types for the backend client.

use plaasjapie_core::sync::SyncEntityType;
use plaasjapie_core::Error;
use thiserror::Error;

/// Result type alias for backend calls.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Retry policy class for API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Errors that can occur while talking to the backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the backend
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (missing or invalid token)
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl BackendError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => ApiRetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => ApiRetryClass::Retryable,
                500..=599 => ApiRetryClass::Retryable,
                _ => ApiRetryClass::Permanent,
            },
            Self::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
                    ApiRetryClass::Retryable
                } else {
                    ApiRetryClass::Permanent
                }
            }
            Self::Json(_) => ApiRetryClass::Permanent,
            Self::InvalidRequest(_) => ApiRetryClass::Permanent,
            Self::Auth(_) => ApiRetryClass::ReauthRequired,
        }
    }

    /// Converts a failed read into the engine's per-entity fetch error.
    pub fn into_fetch_error(self, entity: SyncEntityType) -> Error {
        Error::remote_fetch(entity, self.to_string())
    }

    /// Converts a failed message submission into the engine's send error.
    pub fn into_send_error(self) -> Error {
        Error::remote_send(self.to_string())
    }
}
