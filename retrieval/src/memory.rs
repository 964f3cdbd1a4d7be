//! In-process vector index.
//!
//! Brute-force scan over every stored vector. Suitable for tests, local
//! demos and catalogues of a few thousand reviews.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use reviewqa_embeddings::Embedding;
use reviewqa_embeddings::similarity::find_top_k;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::IndexSpec;
use crate::document::{Document, ScoredDocument};
use crate::error::{Result, RetrievalError};
use crate::index::{IndexDescription, VectorIndex, VectorRecord};

struct Collection {
    spec: IndexSpec,
    // Keyed by id so scans and ties are deterministic.
    records: BTreeMap<String, (Embedding, Document)>,
}

/// A [`VectorIndex`] held entirely in memory.
#[derive(Default)]
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().await;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.entry(spec.name.clone()).or_insert_with(|| Collection {
            spec: spec.clone(),
            records: BTreeMap::new(),
        });
        Ok(())
    }

    async fn describe_index(&self, index: &str) -> Result<IndexDescription> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(index)
            .ok_or_else(|| RetrievalError::IndexNotFound(index.to_string()))?;
        Ok(IndexDescription {
            name: collection.spec.name.clone(),
            dimension: collection.spec.dimension,
            metric: collection.spec.metric,
            ready: true,
            host: None,
        })
    }

    async fn upsert(&self, index: &str, records: &[VectorRecord]) -> Result<Vec<String>> {
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(index)
            .ok_or_else(|| RetrievalError::IndexNotFound(index.to_string()))?;

        for record in records {
            if record.values.len() != collection.spec.dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: collection.spec.dimension,
                    actual: record.values.len(),
                });
            }
        }

        let mut written = Vec::with_capacity(records.len());
        for record in records {
            collection.records.insert(
                record.id().to_string(),
                (record.values.clone(), record.document.clone()),
            );
            written.push(record.id().to_string());
        }
        debug!(index, count = written.len(), "Upserted vectors");
        Ok(written)
    }

    async fn fetch_existing(&self, index: &str, ids: &[String]) -> Result<HashSet<String>> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(index)
            .ok_or_else(|| RetrievalError::IndexNotFound(index.to_string()))?;
        Ok(ids
            .iter()
            .filter(|id| collection.records.contains_key(id.as_str()))
            .cloned()
            .collect())
    }

    async fn query(&self, index: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredDocument>> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(index)
            .ok_or_else(|| RetrievalError::IndexNotFound(index.to_string()))?;
        if vector.len() != collection.spec.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: collection.spec.dimension,
                actual: vector.len(),
            });
        }

        let candidates = collection
            .records
            .iter()
            .map(|(id, (values, _))| (id.as_str(), values.as_slice()));
        let top = find_top_k(vector, candidates, k, collection.spec.metric)?;

        Ok(top
            .into_iter()
            .filter_map(|hit| {
                collection.records.get(&hit.id).map(|(_, document)| ScoredDocument {
                    document: document.clone(),
                    score: hit.score,
                })
            })
            .collect())
    }

    async fn record_count(&self, index: &str) -> Result<u64> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(index)
            .ok_or_else(|| RetrievalError::IndexNotFound(index.to_string()))?;
        Ok(collection.records.len() as u64)
    }
}
