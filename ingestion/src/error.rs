//! Error types for review ingestion.

use thiserror::Error;

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors that can occur while loading or ingesting reviews.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Input lacks required columns.
    #[error("missing required columns: {}", missing.join(", "))]
    Schema { missing: Vec<String> },

    /// Malformed CSV.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] reviewqa_embeddings::EmbeddingError),

    /// Index error.
    #[error("index error: {0}")]
    Retrieval(#[from] reviewqa_retrieval::RetrievalError),
}
