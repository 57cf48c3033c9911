//! Provider error taxonomy and retryability classification.
//!
//! The fallback loop in the routing core sorts every provider failure into
//! one of three buckets: rate-limited (retry with the provider's suggested
//! delay), transient (retry with exponential backoff), and non-retryable
//! (surface immediately, no fallback). The classification helpers here are
//! the single source of truth for that sorting.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when interacting with an LLM provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The request to the provider failed with an opaque message.
    /// Retryability is decided by substring classification of the message.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Authentication with the provider was rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The provider rejected the request as malformed (HTTP 400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The provider has not been configured (e.g. missing credentials).
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The provider returned a rate-limit response (HTTP 429).
    #[error("rate limited (status {status}): {message}")]
    RateLimited {
        /// HTTP status code, typically 429.
        status: u16,
        /// Suggested wait before retrying, in milliseconds, when the
        /// provider sent a `retry-after`.
        retry_after_ms: Option<u64>,
        /// Provider-supplied detail.
        message: String,
    },

    /// The provider returned a server-side error (HTTP 500/502/503/504).
    #[error("server error (status {status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Provider-supplied detail.
        message: String,
    },

    /// The provider reported itself overloaded.
    #[error("provider overloaded: {0}")]
    Overloaded(String),

    /// The request timed out.
    #[error("timeout")]
    Timeout,

    /// The provider returned a response that could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Every model in the fallback chain failed.
    #[error("all models exhausted after {attempts} attempts: {last}")]
    AllModelsExhausted {
        /// How many models were attempted, primary included.
        attempts: usize,
        /// The error from the final attempt.
        last: Box<ProviderError>,
    },
}

/// A convenience type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Substrings that mark an opaque provider message as rate-limited.
const RATE_LIMIT_MARKERS: [&str; 4] = ["429", "rate limit", "rate_limit", "too many requests"];

/// Substrings that mark an opaque provider message as transient.
const TRANSIENT_MARKERS: [&str; 7] = [
    "500",
    "502",
    "503",
    "504",
    "timeout",
    "timed out",
    "overloaded",
];

/// Whether an opaque message reads as a rate-limit response.
fn message_is_rate_limited(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Whether an opaque message reads as a transient failure.
fn message_is_transient(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Determines whether a [`ProviderError`] is worth retrying on another
/// model in the fallback chain.
pub fn is_retryable(err: &ProviderError) -> bool {
    match err {
        ProviderError::RateLimited { .. }
        | ProviderError::ServerError { .. }
        | ProviderError::Overloaded(_)
        | ProviderError::Timeout => true,
        ProviderError::RequestFailed(msg) => {
            message_is_rate_limited(msg) || message_is_transient(msg)
        }
        ProviderError::AuthFailed(_)
        | ProviderError::BadRequest(_)
        | ProviderError::NotConfigured(_)
        | ProviderError::InvalidResponse(_)
        | ProviderError::AllModelsExhausted { .. } => false,
    }
}

/// Whether the error is a rate-limit response (structured or by message).
pub fn is_rate_limited(err: &ProviderError) -> bool {
    match err {
        ProviderError::RateLimited { .. } => true,
        ProviderError::RequestFailed(msg) => message_is_rate_limited(msg),
        _ => false,
    }
}

/// The provider's explicit retry-after delay, when it sent one.
pub fn retry_after(err: &ProviderError) -> Option<Duration> {
    match err {
        ProviderError::RateLimited {
            retry_after_ms: Some(ms),
            ..
        } => Some(Duration::from_millis(*ms)),
        _ => None,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
