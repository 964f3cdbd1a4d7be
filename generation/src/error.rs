//! Error types for text generation.

use thiserror::Error;

/// Result type alias for generation operations.
pub type Result<T> = std::result::Result<T, GenerationError>;

/// Errors that can occur while calling a language model.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Provider has no credentials.
    #[error("generation provider not configured")]
    ProviderNotConfigured,

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Request carried no messages.
    #[error("completion request has no messages")]
    EmptyPrompt,

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
