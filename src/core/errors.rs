//! Custom error types for translation operations

use thiserror::Error;

/// Translation-related errors
///
/// Cloneable so that a single upstream failure can be reported on every
/// request that was merged into the failing call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslationError {
    /// Configuration error (including a missing API key)
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// Nothing to translate
    #[error("Input text is empty")]
    EmptyInput,

    /// Network error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
    },

    /// API request failed
    #[error("API error: {status} - {message}")]
    ApiError {
        status: u16,
        message: String,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded. Retry after {retry_after:?} seconds")]
    RateLimitError {
        retry_after: Option<u64>,
    },

    /// Credentials rejected by the backend
    #[error("Authentication failed: {message}")]
    AuthenticationError {
        message: String,
    },

    /// Backend temporarily unavailable
    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        message: String,
    },

    /// Request rejected as malformed
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
    },

    /// Invalid response from API
    #[error("Invalid response: {message}")]
    InvalidResponseError {
        message: String,
    },

    /// Request timeout
    #[error("Request timeout after {timeout_ms}ms")]
    TimeoutError {
        timeout_ms: u64,
    },

    /// No backend is registered
    #[error("No translation service available")]
    NoServiceAvailable,

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error (JSON / YAML)
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Wrapper for anyhow errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TranslationError {
    /// Short machine-readable code used by the HTTP surface
    pub fn code(&self) -> &'static str {
        match self {
            TranslationError::ConfigError { .. } => "config_error",
            TranslationError::EmptyInput => "empty_input",
            TranslationError::NetworkError { .. } => "network_error",
            TranslationError::ApiError { .. } => "api_error",
            TranslationError::RateLimitError { .. } => "rate_limited",
            TranslationError::AuthenticationError { .. } => "authentication_error",
            TranslationError::ServiceUnavailable { .. } => "service_unavailable",
            TranslationError::InvalidInput { .. } => "invalid_input",
            TranslationError::InvalidResponseError { .. } => "invalid_response",
            TranslationError::TimeoutError { .. } => "timeout",
            TranslationError::NoServiceAvailable => "no_service",
            TranslationError::IoError(_) => "io_error",
            TranslationError::SerializationError(_) => "serialization_error",
            TranslationError::InternalError(_) => "internal_error",
        }
    }
}

impl From<anyhow::Error> for TranslationError {
    fn from(err: anyhow::Error) -> Self {
        TranslationError::InternalError(err.to_string())
    }
}

impl From<std::io::Error> for TranslationError {
    fn from(err: std::io::Error) -> Self {
        TranslationError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for TranslationError {
    fn from(err: serde_json::Error) -> Self {
        TranslationError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for TranslationError {
    fn from(err: serde_yaml::Error) -> Self {
        TranslationError::SerializationError(err.to_string())
    }
}

impl From<config::ConfigError> for TranslationError {
    fn from(err: config::ConfigError) -> Self {
        TranslationError::ConfigError {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for TranslationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TranslationError::InvalidResponseError {
                message: err.to_string(),
            }
        } else {
            TranslationError::NetworkError {
                message: err.to_string(),
            }
        }
    }
}

/// Result type for translation operations
pub type Result<T> = std::result::Result<T, TranslationError>;
