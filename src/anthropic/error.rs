//! Error types for the Anthropic API client.
//!
//! [`AnthropicError`] separates failures where no usable exchange happened
//! (network, timeout, rate limiting) from failures where the API answered
//! with something we cannot use. The reasoning adapter relies on that split.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnthropicError {
    /// HTTP 429. `retry_after_ms` is how long the server asked us to wait.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Any other non-success status (401 bad key, 500 internal error, ...).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Transport failure (DNS, refused connection, timeout) or an
    /// undecodable body.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl AnthropicError {
    /// True when no response reached us, so retrying later is the right move.
    pub fn is_unreachable(&self) -> bool {
        match self {
            AnthropicError::RateLimited { .. } => true,
            AnthropicError::ApiError { .. } => false,
            AnthropicError::NetworkError(e) => !e.is_decode() && e.status().is_none(),
        }
    }
}
