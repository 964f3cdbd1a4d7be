//! The vector index abstraction and index provisioning.

use std::collections::HashSet;
use std::time::Instant;

use async_trait::async_trait;
use reviewqa_embeddings::{DistanceMetric, Embedding};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{IndexSpec, ProvisionPolicy};
use crate::document::{Document, ScoredDocument};
use crate::error::{Result, RetrievalError};

/// What the index reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescription {
    pub name: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub ready: bool,

    /// Data-plane address, when the backend has one.
    pub host: Option<String>,
}

/// A document paired with its content embedding.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub document: Document,
    pub values: Embedding,
}

impl VectorRecord {
    pub fn new(document: Document, values: Embedding) -> Self {
        Self { document, values }
    }

    pub fn id(&self) -> &str {
        &self.document.id
    }
}

/// A named collection of vectors searchable by similarity.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend name, for logging.
    fn name(&self) -> &str;

    /// Names of all indexes visible to this client.
    async fn list_indexes(&self) -> Result<Vec<String>>;

    /// Create an index. Creating one that already exists is not an error.
    async fn create_index(&self, spec: &IndexSpec) -> Result<()>;

    /// Describe an existing index.
    async fn describe_index(&self, index: &str) -> Result<IndexDescription>;

    /// Insert or overwrite records, returning the written ids.
    async fn upsert(&self, index: &str, records: &[VectorRecord]) -> Result<Vec<String>>;

    /// Subset of `ids` already present in the index.
    async fn fetch_existing(&self, index: &str, ids: &[String]) -> Result<HashSet<String>>;

    /// Up to `k` nearest documents, most similar first.
    async fn query(&self, index: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredDocument>>;

    /// Number of stored vectors.
    async fn record_count(&self, index: &str) -> Result<u64>;
}

/// Make sure the index described by `spec` exists and is ready.
///
/// Creates the index when it is missing, then polls readiness with the
/// policy's backoff. Fails with `ProvisioningTimeout` once the policy's
/// total wait is used up, and with `DimensionMismatch` when an existing
/// index was built for a different vector length.
pub async fn ensure_index(
    index: &dyn VectorIndex,
    spec: &IndexSpec,
    policy: &ProvisionPolicy,
) -> Result<IndexDescription> {
    let existing = index.list_indexes().await?;
    if existing.iter().any(|name| name == &spec.name) {
        debug!(index = %spec.name, "Index already exists");
    } else {
        info!(
            index = %spec.name,
            dimension = spec.dimension,
            metric = %spec.metric,
            backend = index.name(),
            "Creating index"
        );
        index.create_index(spec).await?;
    }

    let started = Instant::now();
    let mut delay = policy.initial_delay();
    loop {
        let description = index.describe_index(&spec.name).await?;
        if description.dimension != spec.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: spec.dimension,
                actual: description.dimension,
            });
        }
        if description.ready {
            info!(index = %spec.name, waited_ms = started.elapsed().as_millis() as u64, "Index ready");
            return Ok(description);
        }

        let waited = started.elapsed();
        if waited >= policy.timeout() {
            return Err(RetrievalError::ProvisioningTimeout {
                index: spec.name.clone(),
                waited,
            });
        }

        let pause = delay.min(policy.timeout() - waited);
        debug!(index = %spec.name, pause_ms = pause.as_millis() as u64, "Index not ready yet");
        tokio::time::sleep(pause).await;
        delay = policy.next_delay(delay);
    }
}
