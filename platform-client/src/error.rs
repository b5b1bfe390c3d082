//! Error types for the platform client.

use thiserror::Error;

/// Result type alias for platform operations.
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Retry policy class for API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
}

/// Errors that can occur while talking to the booking/commerce platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success response from the platform
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Still rate limited after every retry was spent
    #[error("Rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Token could not be obtained
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Every candidate endpoint for an operation failed
    #[error("All endpoints failed: {}", .attempts.join("; "))]
    AllEndpointsFailed { attempts: Vec<String> },

    /// Invalid request (bad configuration, missing data)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl PlatformError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                408 | 429 | 500..=599 => RetryClass::Retryable,
                _ => RetryClass::Permanent,
            },
            Self::Http(err) => {
                if err.is_timeout() || err.is_connect() || err.is_request() {
                    RetryClass::Retryable
                } else {
                    RetryClass::Permanent
                }
            }
            Self::RateLimited { .. } => RetryClass::Retryable,
            Self::Json(_)
            | Self::Auth(_)
            | Self::AllEndpointsFailed { .. }
            | Self::InvalidRequest(_) => RetryClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_class() == RetryClass::Retryable
    }
}
