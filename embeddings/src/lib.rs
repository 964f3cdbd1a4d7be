//! # Embeddings
//!
//! Turns review text and user questions into dense vectors for the
//! review index.
//!
//! ## Features
//!
//! - **Providers**: OpenAI-compatible and Hugging Face feature-extraction APIs
//! - **Caching**: Repeated questions skip the remote call
//! - **Similarity**: Cosine, dot-product and euclidean scoring, top-k selection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings                                   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► EmbeddingResponse ──► Embedding          │
//! │       │                                         │               │
//! │       ▼                                         ▼               │
//! │  OpenAI / HuggingFace ◄── CachedProvider    similarity          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod provider;
pub mod similarity;

pub use cache::{CacheStats, CachedProvider, EmbeddingCache};
pub use error::{EmbeddingError, Result};
pub use provider::{
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, HuggingFaceProvider, OpenAIProvider,
};
pub use similarity::{DistanceMetric, SimilarityResult, cosine_similarity};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of `sentence-transformers/all-MiniLM-L6-v2`, the default model.
pub const DEFAULT_DIMENSION: usize = 384;
