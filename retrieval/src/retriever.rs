//! Top-k retrieval over the review index.

use std::sync::Arc;

use async_trait::async_trait;
use reviewqa_embeddings::{EmbeddingProvider, EmbeddingRequest};
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::{IndexSpec, ProvisionPolicy, RetrieverConfig};
use crate::document::RetrievalResult;
use crate::error::{Result, RetrievalError};
use crate::index::{IndexDescription, VectorIndex, ensure_index};

/// Anything that can turn a query into ranked documents.
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    /// At most `k` documents, most relevant first.
    async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult>;
}

/// Embeds the query and searches the vector index.
///
/// The index is attached on first use and the handle kept for the
/// lifetime of the retriever.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    spec: IndexSpec,
    policy: ProvisionPolicy,
    config: RetrieverConfig,
    handle: OnceCell<IndexDescription>,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        spec: IndexSpec,
    ) -> Self {
        Self {
            embedder,
            index,
            spec,
            policy: ProvisionPolicy::default(),
            config: RetrieverConfig::default(),
            handle: OnceCell::new(),
        }
    }

    /// Set the retriever configuration.
    pub fn with_config(mut self, config: RetrieverConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the provisioning backoff.
    pub fn with_policy(mut self, policy: ProvisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn index_spec(&self) -> &IndexSpec {
        &self.spec
    }

    /// Provision the index now instead of on the first query.
    pub async fn warm_up(&self) -> Result<()> {
        let description = self.handle().await?;
        info!(index = %description.name, dimension = description.dimension, "Retriever attached to index");
        Ok(())
    }

    /// Retrieve with the configured default `k`.
    pub async fn retrieve_default(&self, query: &str) -> Result<RetrievalResult> {
        self.retrieve(query, self.config.top_k).await
    }

    async fn handle(&self) -> Result<&IndexDescription> {
        // Failed attempts leave the cell empty so the next call retries.
        self.handle
            .get_or_try_init(|| ensure_index(self.index.as_ref(), &self.spec, &self.policy))
            .await
    }
}

#[async_trait]
impl DocumentRetriever for Retriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Ok(RetrievalResult::empty());
        }
        let handle = self.handle().await?;

        let embedding_timeout = self.config.embedding_timeout();
        let embedded = timeout(
            embedding_timeout,
            self.embedder.embed(EmbeddingRequest::new(query)),
        )
        .await
        .map_err(|_| RetrievalError::Timeout {
            stage: "query embedding",
            after: embedding_timeout,
        })??;

        if embedded.embedding.len() != handle.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: handle.dimension,
                actual: embedded.embedding.len(),
            });
        }

        let query_timeout = self.config.query_timeout();
        let mut hits = timeout(
            query_timeout,
            self.index.query(&handle.name, &embedded.embedding, k),
        )
        .await
        .map_err(|_| RetrievalError::Timeout {
            stage: "index query",
            after: query_timeout,
        })??;

        if let Some(min_score) = self.config.min_score {
            hits.retain(|hit| hit.score >= min_score);
        }

        let result = RetrievalResult::ranked(hits, k);
        debug!(
            index = %handle.name,
            k,
            hits = result.len(),
            top_score = result.top().map(|hit| hit.score),
            "Retrieved documents"
        );
        Ok(result)
    }
}
