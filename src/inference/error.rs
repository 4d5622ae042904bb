//! Inference error taxonomy
//!
//! `BackendError` is what a single service call can fail with. The gateway
//! folds those into `GatewayError` once retries are exhausted or the error
//! is known to be permanent.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by one call to an inference service
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum BackendError {
    /// API request failed with the given message
    #[error("API error{}: {message}", .status_code.map(|c| format!(" ({})", c)).unwrap_or_default())]
    ApiError {
        message: String,
        status_code: Option<u16>,
    },

    /// Authentication failed or credentials are invalid
    #[error("Authentication failed: {message}")]
    AuthenticationError { message: String },

    /// Request timed out after the specified duration (in seconds)
    #[error("Request timed out after {seconds} seconds")]
    TimeoutError { seconds: u64 },

    /// Rate limit exceeded, retry after the specified duration (in seconds)
    #[error("Rate limit exceeded{}", .retry_after.map(|s| format!(", retry after {} seconds", s)).unwrap_or_default())]
    RateLimitError { retry_after: Option<u64> },

    /// Empty or truncated response that is worth asking again for
    #[error("Invalid response from inference service: {message}")]
    InvalidResponse {
        message: String,
        raw_response: Option<String>,
    },

    /// Missing API keys, unreadable images and similar local problems
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Error: {message}")]
    Other { message: String },
}

impl BackendError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Timeouts, rate limits, network errors, malformed responses and
    /// 5xx/408/429 statuses are transient. API errors without a status are
    /// treated as transient since the provider gave no reason to stop.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::TimeoutError { .. }
            | BackendError::RateLimitError { .. }
            | BackendError::NetworkError { .. }
            | BackendError::InvalidResponse { .. } => true,
            BackendError::ApiError { status_code, .. } => match status_code {
                None => true,
                Some(code) => *code >= 500 || *code == 408 || *code == 429,
            },
            BackendError::AuthenticationError { .. }
            | BackendError::ConfigurationError { .. }
            | BackendError::Other { .. } => false,
        }
    }

    /// Server-provided backoff hint, if any.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            BackendError::RateLimitError { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Terminal outcome of a gateway call that did not produce a response
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Every attempt failed with a transient error
    #[error("Variant failed after {attempts} attempt(s): {last_error}")]
    VariantFailure {
        attempts: u32,
        last_error: BackendError,
    },

    /// The service returned an error that retrying will not fix
    #[error("Request rejected after {attempts} attempt(s): {error}")]
    Rejected { attempts: u32, error: BackendError },

    /// The process-wide limiter was shut down
    #[error("Concurrency limiter closed")]
    LimiterClosed,
}

impl GatewayError {
    pub fn attempts(&self) -> u32 {
        match self {
            GatewayError::VariantFailure { attempts, .. } | GatewayError::Rejected { attempts, .. } => {
                *attempts
            }
            GatewayError::LimiterClosed => 0,
        }
    }
}
