//! # Retrieval
//!
//! Review documents, the vector index they live in, and the top-k
//! retriever the conversation engine queries.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Retrieval                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   query text ──► EmbeddingProvider ──► vector                   │
//! │                                          │                      │
//! │                                          ▼                      │
//! │                  ┌──────────────────────────────────┐           │
//! │                  │           VectorIndex            │           │
//! │                  │  PineconeIndex  │  InMemoryIndex │           │
//! │                  └──────────────────────────────────┘           │
//! │                                          │                      │
//! │                                          ▼                      │
//! │                              RetrievalResult (top k)            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use reviewqa_retrieval::{DocumentRetriever, IndexSpec, InMemoryIndex, Retriever};
//!
//! let retriever = Retriever::new(embedder, Arc::new(InMemoryIndex::new()), IndexSpec::default());
//! let result = retriever.retrieve("Can you tell me the low budget headphone?", 4).await?;
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod memory;
pub mod pinecone;
pub mod retriever;

pub use config::{DEFAULT_TOP_K, IndexSpec, ProvisionPolicy, RetrieverConfig};
pub use document::{Document, Metadata, MetadataValue, RetrievalResult, ScoredDocument, document_id};
pub use error::{Result, RetrievalError};
pub use index::{IndexDescription, VectorIndex, VectorRecord, ensure_index};
pub use memory::InMemoryIndex;
pub use pinecone::PineconeIndex;
pub use retriever::{DocumentRetriever, Retriever};
