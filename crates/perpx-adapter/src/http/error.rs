/*
[INPUT]:  Error sources (HTTP, API, serialization, auth, WebSocket)
[OUTPUT]: Structured error types with classification helpers
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the Perpx adapter
#[derive(Error, Debug)]
pub enum PerpxError {
    /// HTTP transport failed (includes connect errors and timeouts)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error (code {code}): {message}")]
    Api { code: i32, message: String },

    /// JWT token is expired or rejected
    #[error("JWT token expired, please re-authenticate")]
    TokenExpired,

    /// Request body signature was rejected
    #[error("Invalid request signature")]
    InvalidSignature,

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PerpxError {
    /// The venue does not know the referenced resource.
    ///
    /// Within the order grace window this is expected read-after-write lag,
    /// not a terminal condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PerpxError::Api { code: 404, .. })
    }

    /// Transport-level timeout. The request may still have reached the venue.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PerpxError::Http(err) if err.is_timeout())
    }

    /// Check if the error is transient and safe to retry on a later cycle
    pub fn is_retryable(&self) -> bool {
        match self {
            PerpxError::Http(_) | PerpxError::WebSocket(_) | PerpxError::InvalidResponse(_) => true,
            PerpxError::Api { code, .. } => *code >= 500,
            _ => false,
        }
    }

    /// Check if error indicates authentication failure
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            PerpxError::TokenExpired | PerpxError::InvalidSignature
        )
    }

    /// Create an API error from status code and message
    pub fn api_error(status: StatusCode, message: impl Into<String>) -> Self {
        PerpxError::Api {
            code: status.as_u16() as i32,
            message: message.into(),
        }
    }
}

/// Result type alias for Perpx operations
pub type Result<T> = std::result::Result<T, PerpxError>;
