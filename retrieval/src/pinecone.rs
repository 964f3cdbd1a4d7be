//! Pinecone REST client.
//!
//! Control-plane calls go to `api.pinecone.io`; data-plane calls go to the
//! per-index host returned by `describe_index`. Review text is stored in the
//! reserved `text` metadata field and lifted back out on read.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use reviewqa_embeddings::DistanceMetric;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::IndexSpec;
use crate::document::{Document, Metadata, MetadataValue, ScoredDocument};
use crate::error::{Result, RetrievalError};
use crate::index::{IndexDescription, VectorIndex, VectorRecord};

const API_VERSION: &str = "2024-07";
const TEXT_KEY: &str = "text";
const DEFAULT_UPSERT_BATCH: usize = 100;

/// Pinecone-backed [`VectorIndex`].
pub struct PineconeIndex {
    api_key: Option<String>,
    control_url: String,
    client: reqwest::Client,
    namespace: Option<String>,
    upsert_batch: usize,
    hosts: RwLock<HashMap<String, String>>,
}

impl PineconeIndex {
    /// Create a client reading its key from `PINECONE_API_KEY`.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("PINECONE_API_KEY").ok(),
            control_url: "https://api.pinecone.io".to_string(),
            client: reqwest::Client::new(),
            namespace: None,
            upsert_batch: DEFAULT_UPSERT_BATCH,
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the control-plane URL.
    pub fn with_control_url(mut self, url: impl Into<String>) -> Self {
        self.control_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Scope data-plane calls to a namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self
    }

    /// Maximum vectors per upsert request.
    pub fn with_upsert_batch(mut self, size: usize) -> Self {
        self.upsert_batch = size.max(1);
        self
    }

    fn request(&self, method: Method, url: String) -> Result<RequestBuilder> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| RetrievalError::Config("PINECONE_API_KEY is not set".to_string()))?;
        Ok(self
            .client
            .request(method, url)
            .header("Api-Key", api_key)
            .header("X-Pinecone-API-Version", API_VERSION))
    }

    async fn data_url(&self, index: &str, path: &str) -> Result<String> {
        if let Some(host) = self.hosts.read().await.get(index) {
            return Ok(join_host(host, path));
        }
        let description = self.describe_index(index).await?;
        let host = description
            .host
            .ok_or_else(|| RetrievalError::IndexApi(format!("index '{index}' has no host yet")))?;
        let url = join_host(&host, path);
        self.hosts.write().await.insert(index.to_string(), host);
        Ok(url)
    }

    fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }
}

impl Default for PineconeIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn join_host(host: &str, path: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{host}{path}")
    } else {
        format!("https://{host}{path}")
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(RetrievalError::IndexApi(format!("{status}: {body}")))
}

fn to_metadata(document: &Document) -> Value {
    let mut map = Map::new();
    for (key, value) in &document.metadata {
        map.insert(key.clone(), json!(value));
    }
    map.insert(TEXT_KEY.to_string(), Value::String(document.content.clone()));
    Value::Object(map)
}

fn from_metadata(id: String, metadata: Option<Map<String, Value>>) -> Document {
    let mut metadata = metadata.unwrap_or_default();
    let content = match metadata.remove(TEXT_KEY) {
        Some(Value::String(text)) => text,
        _ => {
            warn!(id = %id, "Stored vector has no text field");
            String::new()
        }
    };
    let metadata: Metadata = metadata
        .into_iter()
        .filter_map(|(key, value)| {
            serde_json::from_value::<MetadataValue>(value)
                .ok()
                .map(|value| (key, value))
        })
        .collect();
    Document::with_id(id, content, metadata)
}

#[derive(Debug, Deserialize)]
struct IndexModel {
    name: String,
    dimension: usize,
    metric: DistanceMetric,
    host: Option<String>,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Deserialize)]
struct ListIndexesResponse {
    #[serde(default)]
    indexes: Vec<IndexModel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    total_vector_count: u64,
    #[serde(default)]
    namespaces: HashMap<String, NamespaceStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    #[serde(default)]
    vector_count: u64,
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn name(&self) -> &str {
        "pinecone"
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        let response = self
            .request(Method::GET, format!("{}/indexes", self.control_url))?
            .send()
            .await?;
        let listing: ListIndexesResponse = check_status(response).await?.json().await?;
        Ok(listing.indexes.into_iter().map(|index| index.name).collect())
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        let body = json!({
            "name": spec.name,
            "dimension": spec.dimension,
            "metric": spec.metric,
            "spec": {
                "serverless": {
                    "cloud": spec.cloud,
                    "region": spec.region,
                }
            }
        });
        let response = self
            .request(Method::POST, format!("{}/indexes", self.control_url))?
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            debug!(index = %spec.name, "Index was created concurrently");
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }

    async fn describe_index(&self, index: &str) -> Result<IndexDescription> {
        let response = self
            .request(Method::GET, format!("{}/indexes/{index}", self.control_url))?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RetrievalError::IndexNotFound(index.to_string()));
        }
        let model: IndexModel = check_status(response).await?.json().await?;
        Ok(IndexDescription {
            name: model.name,
            dimension: model.dimension,
            metric: model.metric,
            ready: model.status.ready,
            host: model.host,
        })
    }

    async fn upsert(&self, index: &str, records: &[VectorRecord]) -> Result<Vec<String>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.data_url(index, "/vectors/upsert").await?;

        let mut written = Vec::with_capacity(records.len());
        for chunk in records.chunks(self.upsert_batch) {
            let vectors: Vec<Value> = chunk
                .iter()
                .map(|record| {
                    json!({
                        "id": record.id(),
                        "values": record.values,
                        "metadata": to_metadata(&record.document),
                    })
                })
                .collect();
            let body = json!({ "vectors": vectors, "namespace": self.namespace() });

            let response = self
                .request(Method::POST, url.clone())?
                .json(&body)
                .send()
                .await?;
            let result: UpsertResponse = check_status(response).await?.json().await?;
            if result.upserted_count != chunk.len() {
                warn!(
                    index,
                    sent = chunk.len(),
                    upserted = result.upserted_count,
                    "Upsert count differs from batch size"
                );
            }
            written.extend(chunk.iter().map(|record| record.id().to_string()));
        }
        debug!(index, count = written.len(), "Upserted vectors");
        Ok(written)
    }

    async fn fetch_existing(&self, index: &str, ids: &[String]) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut params: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        if let Some(namespace) = &self.namespace {
            params.push(("namespace", namespace.as_str()));
        }

        let url = self.data_url(index, "/vectors/fetch").await?;
        let response = self.request(Method::GET, url)?.query(&params).send().await?;
        let result: FetchResponse = check_status(response).await?.json().await?;
        Ok(result.vectors.into_keys().collect())
    }

    async fn query(&self, index: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredDocument>> {
        let body = json!({
            "vector": vector,
            "topK": k,
            "includeMetadata": true,
            "includeValues": false,
            "namespace": self.namespace(),
        });

        let url = self.data_url(index, "/query").await?;
        let response = self.request(Method::POST, url)?.json(&body).send().await?;
        let result: QueryResponse = check_status(response).await?.json().await?;

        Ok(result
            .matches
            .into_iter()
            .map(|hit| ScoredDocument {
                score: hit.score,
                document: from_metadata(hit.id, hit.metadata),
            })
            .collect())
    }

    async fn record_count(&self, index: &str) -> Result<u64> {
        let url = self.data_url(index, "/describe_index_stats").await?;
        let response = self.request(Method::POST, url)?.json(&json!({})).send().await?;
        let stats: StatsResponse = check_status(response).await?.json().await?;

        Ok(match &self.namespace {
            Some(namespace) => stats
                .namespaces
                .get(namespace)
                .map(|ns| ns.vector_count)
                .unwrap_or(0),
            None => stats.total_vector_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::keys;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn index_on(server: &MockServer) -> PineconeIndex {
        Mock::given(method("GET"))
            .and(path("/indexes/reviews"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "reviews",
                "dimension": 3,
                "metric": "cosine",
                "host": server.uri(),
                "status": {"ready": true, "state": "Ready"}
            })))
            .mount(server)
            .await;

        PineconeIndex::new()
            .with_api_key("pc-test")
            .with_control_url(server.uri())
    }

    fn review() -> Document {
        let mut metadata = Metadata::new();
        metadata.insert(keys::PRODUCT_NAME.into(), "BudgetBuds X1".into());
        metadata.insert(keys::PRODUCT_RATING.into(), 4i64.into());
        Document::new("Good sound for the price.", metadata)
    }

    #[tokio::test]
    async fn test_describe_index() {
        let server = MockServer::start().await;
        let index = index_on(&server).await;

        let description = index.describe_index("reviews").await.unwrap();

        assert_eq!(description.dimension, 3);
        assert_eq!(description.metric, DistanceMetric::Cosine);
        assert!(description.ready);
    }

    #[tokio::test]
    async fn test_missing_index_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexes/nope"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let index = index_on(&server).await;

        let err = index.describe_index("nope").await.unwrap_err();
        assert!(matches!(err, RetrievalError::IndexNotFound(_)));
    }

    #[tokio::test]
    async fn test_create_conflict_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/indexes"))
            .and(body_partial_json(json!({
                "name": "reviews",
                "dimension": 3,
                "metric": "cosine",
                "spec": {"serverless": {"cloud": "aws", "region": "us-east-1"}}
            })))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&server)
            .await;
        let index = index_on(&server).await;

        index.create_index(&IndexSpec::new("reviews", 3)).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_stores_text_in_metadata() {
        let server = MockServer::start().await;
        let doc = review();
        Mock::given(method("POST"))
            .and(path("/vectors/upsert"))
            .and(header("api-key", "pc-test"))
            .and(body_partial_json(json!({
                "vectors": [{
                    "id": doc.id,
                    "metadata": {
                        "text": "Good sound for the price.",
                        "product_name": "BudgetBuds X1",
                        "product_rating": 4
                    }
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"upsertedCount": 1})))
            .expect(1)
            .mount(&server)
            .await;
        let index = index_on(&server).await;

        let ids = index
            .upsert("reviews", &[VectorRecord::new(doc.clone(), vec![0.1, 0.2, 0.3])])
            .await
            .unwrap();
        assert_eq!(ids, vec![doc.id]);
    }

    #[tokio::test]
    async fn test_upsert_splits_into_batches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/vectors/upsert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"upsertedCount": 2})))
            .expect(3)
            .mount(&server)
            .await;
        let index = index_on(&server).await.with_upsert_batch(2);

        let records: Vec<VectorRecord> = (0..5)
            .map(|i| {
                let doc = Document::new(format!("review {i}"), Metadata::new());
                VectorRecord::new(doc, vec![0.0, 0.0, 1.0])
            })
            .collect();
        let ids = index.upsert("reviews", &records).await.unwrap();
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn test_query_lifts_text_out_of_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query"))
            .and(body_partial_json(json!({"topK": 2, "includeMetadata": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "matches": [{
                    "id": "abc",
                    "score": 0.91,
                    "metadata": {
                        "text": "Good sound for the price.",
                        "product_name": "BudgetBuds X1",
                        "product_rating": 4
                    }
                }]
            })))
            .mount(&server)
            .await;
        let index = index_on(&server).await;

        let hits = index.query("reviews", &[0.1, 0.2, 0.3], 2).await.unwrap();

        assert_eq!(hits.len(), 1);
        let doc = &hits[0].document;
        assert_eq!(doc.id, "abc");
        assert_eq!(doc.content, "Good sound for the price.");
        assert_eq!(doc.get(TEXT_KEY), None);
        assert_eq!(doc.get(keys::PRODUCT_RATING), Some(&MetadataValue::Integer(4)));
    }

    #[tokio::test]
    async fn test_fetch_existing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vectors/fetch"))
            .and(query_param("ids", "a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vectors": {"a": {"id": "a", "values": [0.1, 0.2, 0.3]}}
            })))
            .mount(&server)
            .await;
        let index = index_on(&server).await;

        let found = index
            .fetch_existing("reviews", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(found, HashSet::from(["a".to_string()]));
    }

    #[tokio::test]
    async fn test_record_count_for_namespace() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/describe_index_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "dimension": 3,
                "totalVectorCount": 10,
                "namespaces": {"reviews-ns": {"vectorCount": 7}}
            })))
            .mount(&server)
            .await;
        let index = index_on(&server).await.with_namespace("reviews-ns");

        assert_eq!(index.record_count("reviews").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let index = PineconeIndex {
            api_key: None,
            ..PineconeIndex::new()
        };
        let err = index.list_indexes().await.unwrap_err();
        assert!(matches!(err, RetrievalError::Config(_)));
    }
}
