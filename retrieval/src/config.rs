//! Configuration for the index and the retriever.

use std::time::Duration;

use reviewqa_embeddings::{DEFAULT_DIMENSION, DistanceMetric};
use serde::{Deserialize, Serialize};

/// Number of documents returned when the caller does not choose.
pub const DEFAULT_TOP_K: usize = 4;

/// Parameters of the index to provision or attach to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,

    /// Vector length; must equal the embedding model's output.
    pub dimension: usize,

    /// Similarity metric.
    pub metric: DistanceMetric,

    /// Cloud provider for serverless indexes.
    pub cloud: String,

    /// Cloud region for serverless indexes.
    pub region: String,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            ..Default::default()
        }
    }
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self {
            name: "product-reviews".to_string(),
            dimension: DEFAULT_DIMENSION,
            metric: DistanceMetric::Cosine,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

/// Backoff schedule used while waiting for an index to become ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionPolicy {
    /// First wait between readiness checks.
    pub initial_delay_ms: u64,

    /// Ceiling for a single wait.
    pub max_delay_ms: u64,

    /// Growth factor applied after each wait.
    pub multiplier: f64,

    /// Total time allowed before giving up.
    pub timeout_ms: u64,
}

/// Largest growth factor a schedule may use.
pub const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

/// Shortest wait between readiness checks.
const MIN_DELAY: Duration = Duration::from_millis(1);

impl ProvisionPolicy {
    /// Reject schedules that would spin or overflow.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.initial_delay_ms == 0 {
            return Err("initial_delay_ms must be positive".to_string());
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err("max_delay_ms must be at least initial_delay_ms".to_string());
        }
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&self.multiplier) {
            return Err(format!("multiplier must be between 1 and {MAX_BACKOFF_MULTIPLIER}"));
        }
        Ok(())
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms).max(MIN_DELAY)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.initial_delay_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay that follows `current` in the schedule.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let factor = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        Duration::try_from_secs_f64(current.as_secs_f64() * factor)
            .map_or(self.max_delay(), |next| next.min(self.max_delay()))
            .max(MIN_DELAY)
    }
}

impl Default for ProvisionPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
            timeout_ms: 120_000,
        }
    }
}

/// Retriever behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Documents returned per query.
    pub top_k: usize,

    /// Drop hits scoring below this value.
    pub min_score: Option<f32>,

    /// Deadline for embedding the query.
    pub embedding_timeout_ms: u64,

    /// Deadline for the index query.
    pub query_timeout_ms: u64,
}

impl RetrieverConfig {
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Set the score floor.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_score: None,
            embedding_timeout_ms: 10_000,
            query_timeout_ms: 10_000,
        }
    }
}
