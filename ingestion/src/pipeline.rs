//! Idempotent ingestion of review documents into the vector index.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use reviewqa_embeddings::{EmbeddingError, EmbeddingProvider, EmbeddingRequest};
use reviewqa_retrieval::{
    Document, IndexSpec, ProvisionPolicy, RetrievalError, VectorIndex, VectorRecord, ensure_index,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Default number of documents embedded and upserted together.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Documents handed to the run.
    pub total: usize,

    /// Repeats of an id already seen in the same input.
    pub duplicates: usize,

    /// Documents with blank content.
    pub skipped_empty: usize,

    /// Documents the index already held.
    pub existing: usize,

    /// Documents written by this run.
    pub upserted: usize,

    /// Index size after the run.
    pub record_count: u64,

    pub elapsed_ms: u64,
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} documents: {} upserted, {} already indexed, {} duplicates, {} empty; index holds {} vectors ({} ms)",
            self.total,
            self.upserted,
            self.existing,
            self.duplicates,
            self.skipped_empty,
            self.record_count,
            self.elapsed_ms
        )
    }
}

/// Embeds and upserts documents the index does not hold yet.
pub struct IngestionPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    spec: IndexSpec,
    policy: ProvisionPolicy,
    batch_size: usize,
}

impl IngestionPipeline {
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
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the provisioning backoff.
    pub fn with_policy(mut self, policy: ProvisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the batch size (at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Provision the index, then write every new document.
    pub async fn run(&self, documents: &[Document]) -> Result<IngestReport> {
        let started = Instant::now();
        let description = ensure_index(self.index.as_ref(), &self.spec, &self.policy).await?;

        let mut report = IngestReport {
            total: documents.len(),
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let mut pending: Vec<&Document> = Vec::with_capacity(documents.len());
        for document in documents {
            if !seen.insert(document.id.as_str()) {
                report.duplicates += 1;
            } else if document.content.trim().is_empty() {
                debug!(id = %document.id, "Skipping review with no text");
                report.skipped_empty += 1;
            } else {
                pending.push(document);
            }
        }
        if report.skipped_empty > 0 {
            warn!(count = report.skipped_empty, "Skipped reviews with no text");
        }

        for batch in pending.chunks(self.batch_size) {
            let ids: Vec<String> = batch.iter().map(|doc| doc.id.clone()).collect();
            let present = self.index.fetch_existing(&description.name, &ids).await?;

            let fresh: Vec<&Document> = batch
                .iter()
                .copied()
                .filter(|doc| !present.contains(&doc.id))
                .collect();
            report.existing += batch.len() - fresh.len();
            if fresh.is_empty() {
                continue;
            }

            let records = self.embed(&fresh, description.dimension).await?;
            let written = self.index.upsert(&description.name, &records).await?;
            report.upserted += written.len();
            debug!(batch = written.len(), upserted = report.upserted, "Upserted batch");
        }

        report.record_count = self.index.record_count(&description.name).await?;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            index = %description.name,
            total = report.total,
            upserted = report.upserted,
            existing = report.existing,
            record_count = report.record_count,
            elapsed_ms = report.elapsed_ms,
            "Ingestion finished"
        );
        Ok(report)
    }

    async fn embed(&self, documents: &[&Document], dimension: usize) -> Result<Vec<VectorRecord>> {
        let requests = documents
            .iter()
            .map(|doc| EmbeddingRequest::new(doc.content.clone()))
            .collect();
        let embeddings = self.embedder.embed_batch(requests).await?;
        if embeddings.len() != documents.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                documents.len(),
                embeddings.len()
            ))
            .into());
        }

        let mut records = Vec::with_capacity(documents.len());
        for (doc, response) in documents.iter().zip(embeddings) {
            if response.embedding.len() != dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimension,
                    actual: response.embedding.len(),
                }
                .into());
            }
            records.push(VectorRecord::new((*doc).clone(), response.embedding));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_report_display() {
        let report = IngestReport {
            total: 6,
            duplicates: 1,
            skipped_empty: 1,
            existing: 0,
            upserted: 4,
            record_count: 4,
            elapsed_ms: 12,
        };
        assert_eq!(
            report.to_string(),
            "6 documents: 4 upserted, 0 already indexed, 1 duplicates, 1 empty; index holds 4 vectors (12 ms)"
        );
    }

    #[test]
    fn test_report_serializes() {
        let report = IngestReport {
            upserted: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["upserted"], 3);
        assert_eq!(json["record_count"], 0);
    }
}
