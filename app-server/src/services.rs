//! Builds the long-lived service objects from configuration.
//!
//! Everything here is constructed once at startup and shared behind `Arc`.

use std::path::Path;
use std::sync::Arc;

use reviewqa_conversation::{ConversationEngine, SessionHistoryStore};
use reviewqa_embeddings::{
    CachedProvider, EmbeddingCache, EmbeddingProvider, HuggingFaceProvider, OpenAIProvider,
};
use reviewqa_generation::{ChatCompletionsProvider, GenerationProvider};
use reviewqa_ingestion::{DocumentStore, IngestReport, IngestionPipeline};
use reviewqa_retrieval::{InMemoryIndex, PineconeIndex, Retriever, VectorIndex};
use tracing::info;

use crate::config::{
    ConfigError, EmbeddingBackend, IndexBackend, Result, Secrets, ServiceConfig,
};

/// Embedding client for the configured provider, cached when enabled.
pub fn build_embedder(
    config: &ServiceConfig,
    secrets: &Secrets,
) -> Result<Arc<dyn EmbeddingProvider>> {
    let models = &config.model_loader;
    let dimension = config.data_ingestion.dimension;

    let provider: Arc<dyn EmbeddingProvider> = match models.embedding_provider {
        EmbeddingBackend::HuggingFace => {
            let mut provider =
                HuggingFaceProvider::new().with_model(models.model_name.clone(), dimension);
            if let Some(token) = &secrets.hf_token {
                provider = provider.with_token(token.clone());
            }
            if let Some(url) = &models.embedding_base_url {
                provider = provider.with_base_url(url.clone());
            }
            Arc::new(provider)
        }
        EmbeddingBackend::OpenAI => {
            let key = secrets
                .embedding_api_key
                .clone()
                .ok_or(ConfigError::MissingSecret("EMBEDDING_API_KEY"))?;
            let mut provider = OpenAIProvider::new()
                .with_api_key(key)
                .with_model(models.model_name.clone())
                .with_dimensions(dimension);
            if let Some(url) = &models.embedding_base_url {
                provider = provider.with_base_url(url.clone());
            }
            Arc::new(provider)
        }
    };

    if models.embedding_cache_entries == 0 {
        return Ok(provider);
    }
    let cache = EmbeddingCache::new(models.embedding_cache_entries);
    Ok(Arc::new(CachedProvider::new(provider, cache)))
}

/// Vector index client for the configured backend.
pub fn build_index(config: &ServiceConfig, secrets: &Secrets) -> Result<Arc<dyn VectorIndex>> {
    match config.index.backend {
        IndexBackend::Memory => Ok(Arc::new(InMemoryIndex::new())),
        IndexBackend::Pinecone => {
            let key = secrets
                .pinecone_api_key
                .clone()
                .ok_or(ConfigError::MissingSecret("PINECONE_API_KEY"))?;
            let mut index = PineconeIndex::new().with_api_key(key);
            if let Some(url) = &config.index.control_url {
                index = index.with_control_url(url.clone());
            }
            if let Some(namespace) = &config.index.namespace {
                index = index.with_namespace(namespace.clone());
            }
            Ok(Arc::new(index))
        }
    }
}

/// Chat-completions client used for both rewriting and answering.
pub fn build_generator(
    config: &ServiceConfig,
    secrets: &Secrets,
) -> Result<Arc<dyn GenerationProvider>> {
    let key = secrets
        .groq_api_key
        .clone()
        .ok_or(ConfigError::MissingSecret("GROQ_API_KEY"))?;
    let mut provider = ChatCompletionsProvider::new()
        .with_api_key(key)
        .with_model(config.model_loader.llm_model_name.clone());
    if let Some(url) = &config.model_loader.llm_base_url {
        provider = provider.with_base_url(url.clone());
    }
    Ok(Arc::new(provider))
}

/// Normalize the review table at `path` and write new documents to `index`.
pub async fn ingest_csv(
    config: &ServiceConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    path: &Path,
    batch_size: usize,
) -> reviewqa_ingestion::Result<IngestReport> {
    let documents = DocumentStore::from_csv_path(path, &config.data_ingestion.columns)?.normalize();
    IngestionPipeline::new(embedder, index, config.index_spec())
        .with_policy(config.index.provisioning.clone())
        .with_batch_size(batch_size)
        .run(&documents)
        .await
}

/// The wired service graph.
pub struct Services {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
    pub retriever: Arc<Retriever>,
    pub sessions: Arc<SessionHistoryStore>,
    pub engine: Arc<ConversationEngine>,
}

impl Services {
    /// Build every client from configuration and secrets.
    pub fn build(config: &ServiceConfig, secrets: &Secrets) -> Result<Self> {
        let embedder = build_embedder(config, secrets)?;
        let index = build_index(config, secrets)?;
        let generator = build_generator(config, secrets)?;
        Ok(Self::from_parts(config, embedder, index, generator))
    }

    /// Wire already-built clients together.
    pub fn from_parts(
        config: &ServiceConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        let retriever = Arc::new(
            Retriever::new(embedder.clone(), index.clone(), config.index_spec())
                .with_config(config.retriever_config())
                .with_policy(config.index.provisioning.clone()),
        );
        let sessions = Arc::new(SessionHistoryStore::new());
        let engine = Arc::new(
            ConversationEngine::new(generator, retriever.clone(), sessions.clone())
                .with_config(config.engine_config()),
        );
        info!(
            index = %config.data_ingestion.index_name,
            backend = ?config.index.backend,
            model = %config.model_loader.llm_model_name,
            "Services ready"
        );
        Self {
            embedder,
            index,
            retriever,
            sessions,
            engine,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> ServiceConfig {
        ServiceConfig::from_yaml_str(
            "data_ingestion:\n  index_name: reviews\nindex:\n  backend: memory\n",
        )
        .unwrap()
    }

    fn all_secrets() -> Secrets {
        Secrets::from_lookup(|name| Some(format!("{name}-value")))
    }

    #[test]
    fn test_pinecone_requires_key() {
        let config = ServiceConfig::from_yaml_str("data_ingestion:\n  index_name: reviews\n")
            .unwrap();
        let err = build_index(&config, &Secrets::default()).err().unwrap();
        assert!(matches!(err, ConfigError::MissingSecret("PINECONE_API_KEY")));
    }

    #[test]
    fn test_memory_index_needs_no_key() {
        let index = build_index(&memory_config(), &Secrets::default()).unwrap();
        assert_eq!(index.name(), "memory");
    }

    #[test]
    fn test_generator_requires_key() {
        let err = build_generator(&memory_config(), &Secrets::default())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::MissingSecret("GROQ_API_KEY")));
    }

    #[test]
    fn test_openai_embedder_requires_key() {
        let mut config = memory_config();
        config.model_loader.embedding_provider = EmbeddingBackend::OpenAI;
        let err = build_embedder(&config, &Secrets::default()).err().unwrap();
        assert!(matches!(err, ConfigError::MissingSecret("EMBEDDING_API_KEY")));
    }

    #[test]
    fn test_embedder_dimension_follows_config() {
        let mut config = memory_config();
        config.data_ingestion.dimension = 768;
        let embedder = build_embedder(&config, &Secrets::default()).unwrap();
        assert_eq!(embedder.default_dimension(), 768);
    }

    #[tokio::test]
    async fn test_build_all() {
        let services = Services::build(&memory_config(), &all_secrets()).unwrap();
        assert_eq!(services.retriever.index_spec().name, "reviews");
        assert!(services.sessions.is_empty().await);
        assert_eq!(services.engine.config().top_k, 4);
    }
}
