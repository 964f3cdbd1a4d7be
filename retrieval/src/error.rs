//! Error types for indexing and retrieval.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur while provisioning, writing or querying the index.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] reviewqa_embeddings::EmbeddingError),

    /// The index API answered with an error.
    #[error("index API error: {0}")]
    IndexApi(String),

    /// Named index does not exist.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// Vector length does not match the index.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Index did not report ready within the provisioning bound.
    #[error("index '{index}' not ready after {waited:?}")]
    ProvisioningTimeout { index: String, waited: Duration },

    /// A remote call exceeded its deadline.
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    /// Client is missing credentials or settings.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
