//! Review documents and ranked retrieval results.

use std::collections::BTreeMap;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a raw cell: integer, then float, then text.
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Integer(i);
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => Self::Float(f),
            _ => Self::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) if x.fract() == 0.0 && x.abs() < 1e15 => write!(f, "{}", *x as i64),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Document metadata, ordered by key.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Well-known metadata keys written at ingestion time.
pub mod keys {
    pub const PRODUCT_NAME: &str = "product_name";
    pub const PRODUCT_RATING: &str = "product_rating";
    pub const PRODUCT_SUMMARY: &str = "product_summary";
}

/// One indexed review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Content-derived identity, see [`document_id`].
    pub id: String,

    /// Review text; the only field that is embedded.
    pub content: String,

    pub metadata: Metadata,
}

impl Document {
    /// Build a document and derive its id.
    ///
    /// Metadata text equal to the content is dropped so the review is never
    /// carried twice.
    pub fn new(content: impl Into<String>, mut metadata: Metadata) -> Self {
        let content = content.into();
        metadata.retain(|_, v| v.as_text() != Some(content.as_str()));
        let id = document_id(&content, &metadata);
        Self {
            id,
            content,
            metadata,
        }
    }

    /// Rebuild a document read back from an index, keeping the stored id.
    pub fn with_id(id: impl Into<String>, content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata,
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(key)
    }

    pub fn product_name(&self) -> Option<String> {
        self.get(keys::PRODUCT_NAME).map(ToString::to_string)
    }
}

/// Lowercase hex SHA-256 over the content and the metadata in key order.
pub fn document_id(content: &str, metadata: &Metadata) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    for (key, value) in metadata {
        hasher.update([0x1f]);
        hasher.update(key.as_bytes());
        hasher.update([0x1e]);
        hasher.update(value.to_string().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// A document with its relevance score (higher is more relevant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

/// At most `k` documents in non-increasing score order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    hits: Vec<ScoredDocument>,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rank `hits` by descending score and keep the best `k`.
    pub fn ranked(mut hits: Vec<ScoredDocument>, k: usize) -> Self {
        hits.sort_by(|a, b| OrderedFloat(b.score).cmp(&OrderedFloat(a.score)));
        hits.truncate(k);
        Self { hits }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredDocument> {
        self.hits.iter()
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.hits.iter().map(|hit| &hit.document)
    }

    pub fn top(&self) -> Option<&ScoredDocument> {
        self.hits.first()
    }
}
