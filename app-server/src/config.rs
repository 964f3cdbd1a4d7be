//! Service configuration loaded from YAML, with secrets from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reviewqa_conversation::EngineConfig;
use reviewqa_embeddings::{DEFAULT_DIMENSION, DistanceMetric};
use reviewqa_ingestion::{ColumnMapping, DEFAULT_BATCH_SIZE};
use reviewqa_retrieval::{DEFAULT_TOP_K, IndexSpec, ProvisionPolicy, RetrieverConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Path used when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {} is empty", .0.display())]
    Empty(PathBuf),

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("environment variable {0} is not set")]
    MissingSecret(&'static str),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Where review vectors are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Pinecone,
    Memory,
}

/// Which embedding API to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    HuggingFace,
    OpenAI,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataIngestionConfig {
    /// Vector index name. Required.
    pub index_name: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub cloud: String,
    pub region: String,

    /// Review table used by the ingestion CLI.
    pub csv_path: PathBuf,
    pub batch_size: usize,
    pub columns: ColumnMapping,

    /// Load `csv_path` into the in-memory index when the server starts.
    pub seed_memory_index: bool,
}

impl Default for DataIngestionConfig {
    fn default() -> Self {
        let spec = IndexSpec::default();
        Self {
            index_name: String::new(),
            dimension: DEFAULT_DIMENSION,
            metric: spec.metric,
            cloud: spec.cloud,
            region: spec.region,
            csv_path: PathBuf::from("data/flipkart_product_review.csv"),
            batch_size: DEFAULT_BATCH_SIZE,
            columns: ColumnMapping::default(),
            seed_memory_index: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelLoaderConfig {
    pub embedding_provider: EmbeddingBackend,

    /// Embedding model; its output length must equal `data_ingestion.dimension`.
    pub model_name: String,
    pub embedding_base_url: Option<String>,

    /// Entries kept by the embedding cache. 0 disables the cache.
    pub embedding_cache_entries: usize,

    pub llm_model_name: String,
    pub llm_base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for ModelLoaderConfig {
    fn default() -> Self {
        Self {
            embedding_provider: EmbeddingBackend::HuggingFace,
            model_name: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            embedding_base_url: None,
            embedding_cache_entries: 1024,
            llm_model_name: "llama-3.1-8b-instant".to_string(),
            llm_base_url: None,
            temperature: Some(0.0),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    pub namespace: Option<String>,

    /// Control-plane URL override, used for self-hosted or mocked indexes.
    pub control_url: Option<String>,
    pub provisioning: ProvisionPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverSection {
    pub top_k: usize,
    pub min_score: Option<f32>,
    pub include_metadata: bool,
}

impl Default for RetrieverSection {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_score: None,
            include_metadata: true,
        }
    }
}

/// Per-call deadlines in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub embedding_ms: u64,
    pub query_ms: u64,
    pub retrieval_ms: u64,
    pub rewrite_ms: u64,
    pub generation_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        let retriever = RetrieverConfig::default();
        Self {
            embedding_ms: retriever.embedding_timeout_ms,
            query_ms: retriever.query_timeout_ms,
            retrieval_ms: engine.retrieval_timeout_ms,
            rewrite_ms: engine.rewrite_timeout_ms,
            generation_ms: engine.generation_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Idle sessions older than this are dropped. `None` keeps them forever.
    pub session_ttl_secs: Option<u64>,
    pub sweep_interval_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: Some(3600),
            sweep_interval_secs: 60,
        }
    }
}

impl ConversationConfig {
    pub fn session_ttl(&self) -> Option<Duration> {
        self.session_ttl_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Full service configuration. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub data_ingestion: DataIngestionConfig,
    #[serde(alias = "Model_loader")]
    pub model_loader: ModelLoaderConfig,
    pub index: IndexConfig,
    pub retriever: RetrieverSection,
    pub timeouts: TimeoutConfig,
    pub conversation: ConversationConfig,
    pub server: ServerConfig,
}

impl ServiceConfig {
    /// Read and validate the YAML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Err(ConfigError::Empty(path.to_path_buf()));
        }
        let config = Self::from_yaml_str(&raw)?;
        info!(path = %path.display(), index = %config.data_ingestion.index_name, "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let ingestion = &self.data_ingestion;
        if ingestion.index_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "data_ingestion.index_name is required".to_string(),
            ));
        }
        if ingestion.dimension == 0 {
            return Err(ConfigError::Invalid(
                "data_ingestion.dimension must be positive".to_string(),
            ));
        }
        if ingestion.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "data_ingestion.batch_size must be positive".to_string(),
            ));
        }
        if self.retriever.top_k == 0 {
            return Err(ConfigError::Invalid(
                "retriever.top_k must be positive".to_string(),
            ));
        }
        if self.retriever.min_score.is_some_and(|score| !score.is_finite()) {
            return Err(ConfigError::Invalid(
                "retriever.min_score must be a finite number".to_string(),
            ));
        }
        self.index
            .provisioning
            .validate()
            .map_err(|reason| ConfigError::Invalid(format!("index.provisioning: {reason}")))?;
        Ok(())
    }

    pub fn index_spec(&self) -> IndexSpec {
        let ingestion = &self.data_ingestion;
        IndexSpec {
            name: ingestion.index_name.clone(),
            dimension: ingestion.dimension,
            metric: ingestion.metric,
            cloud: ingestion.cloud.clone(),
            region: ingestion.region.clone(),
        }
    }

    pub fn retriever_config(&self) -> RetrieverConfig {
        RetrieverConfig {
            top_k: self.retriever.top_k,
            min_score: self.retriever.min_score,
            embedding_timeout_ms: self.timeouts.embedding_ms,
            query_timeout_ms: self.timeouts.query_ms,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            top_k: self.retriever.top_k,
            include_metadata: self.retriever.include_metadata,
            rewrite_timeout_ms: self.timeouts.rewrite_ms,
            retrieval_timeout_ms: self.timeouts.retrieval_ms,
            generation_timeout_ms: self.timeouts.generation_ms,
            temperature: self.model_loader.temperature,
            max_tokens: self.model_loader.max_tokens,
        }
    }
}

/// API credentials. Never read from the YAML file.
#[derive(Clone, Default)]
pub struct Secrets {
    pub pinecone_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub embedding_api_key: Option<String>,
    pub hf_token: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Self {
            pinecone_api_key: get("PINECONE_API_KEY"),
            groq_api_key: get("GROQ_API_KEY"),
            embedding_api_key: get("EMBEDDING_API_KEY"),
            hf_token: get("HF_TOKEN"),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |value: &Option<String>| value.as_ref().map(|_| "***");
        f.debug_struct("Secrets")
            .field("pinecone_api_key", &mask(&self.pinecone_api_key))
            .field("groq_api_key", &mask(&self.groq_api_key))
            .field("embedding_api_key", &mask(&self.embedding_api_key))
            .field("hf_token", &mask(&self.hf_token))
            .finish()
    }
}
