//! Loading review CSVs and normalizing them into documents.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use reviewqa_retrieval::document::keys;
use reviewqa_retrieval::{Document, Metadata, MetadataValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{IngestError, Result};

/// Names of the CSV columns holding each review field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub product_title: String,
    pub rating: String,
    pub summary: String,
    pub review: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            product_title: "product_title".to_string(),
            rating: "rating".to_string(),
            summary: "summary".to_string(),
            review: "review".to_string(),
        }
    }
}

impl ColumnMapping {
    fn required(&self) -> [&str; 4] {
        [&self.product_title, &self.rating, &self.summary, &self.review]
    }
}

/// One row of the review table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRecord {
    pub product_title: String,
    pub rating: String,
    pub summary: String,
    pub review: String,
}

impl ReviewRecord {
    /// The review as a document: review text as content, the rest as metadata.
    pub fn to_document(&self) -> Document {
        let mut metadata = Metadata::new();
        metadata.insert(
            keys::PRODUCT_NAME.to_string(),
            MetadataValue::Text(self.product_title.clone()),
        );
        metadata.insert(
            keys::PRODUCT_RATING.to_string(),
            MetadataValue::infer(&self.rating),
        );
        metadata.insert(
            keys::PRODUCT_SUMMARY.to_string(),
            MetadataValue::Text(self.summary.clone()),
        );
        Document::new(self.review.clone(), metadata)
    }
}

/// Review records loaded from a table.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    records: Vec<ReviewRecord>,
}

impl DocumentStore {
    /// Load a CSV file with a header row.
    pub fn from_csv_path(path: impl AsRef<Path>, columns: &ColumnMapping) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let store = Self::from_reader(file, columns)?;
        info!(path = %path.display(), records = store.len(), "Loaded review CSV");
        Ok(store)
    }

    /// Load CSV data with a header row from any reader.
    ///
    /// Fails with [`IngestError::Schema`] naming every required column the
    /// header lacks.
    pub fn from_reader<R: Read>(reader: R, columns: &ColumnMapping) -> Result<Self> {
        let mut table = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers = table.headers()?.clone();
        let position = |name: &str| headers.iter().position(|header| header == name);

        let mut indexes = [0usize; 4];
        let mut missing = Vec::new();
        for (slot, name) in indexes.iter_mut().zip(columns.required()) {
            match position(name) {
                Some(idx) => *slot = idx,
                None => missing.push(name.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(IngestError::Schema { missing });
        }
        let [title, rating, summary, review] = indexes;

        let mut records = Vec::new();
        for row in table.records() {
            let row = row?;
            let field = |idx: usize| row.get(idx).unwrap_or_default().to_string();
            records.push(ReviewRecord {
                product_title: field(title),
                rating: field(rating),
                summary: field(summary),
                review: field(review),
            });
        }
        debug!(records = records.len(), "Parsed review rows");

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Exactly one document per record, in record order.
    pub fn normalize(&self) -> Vec<Document> {
        self.records.iter().map(ReviewRecord::to_document).collect()
    }
}
