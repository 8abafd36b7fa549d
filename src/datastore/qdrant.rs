use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use super::VectorStore;
use super::filter::{ResolvedFilter, indexed_timestamp, resolve_filter};
use crate::models::document::{
    ChunkedDocument, DateField, DocumentChunk, DocumentChunkMetadata, DocumentChunkWithScore,
    DocumentMetadataFilter, MetadataField, QueryResult, QueryWithEmbedding,
};
use crate::retry::{Attempt, backoff_policy, classify_status, send_json, with_retry};

/// Namespace for deriving point UUIDs from chunk ids.
const POINT_NAMESPACE: Uuid = Uuid::from_u128(0x3896d314_1e95_4a3a_b45a_945f9f0b541d);

pub struct QdrantSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub vector_size: u32,
    pub distance: String,
    pub recreate_collection: bool,
    pub upsert_batch_size: usize,
    pub retry_timeout: Duration,
}

/// Qdrant over its REST API.
pub struct QdrantStore {
    settings: QdrantSettings,
    http_client: reqwest::Client,
}

#[derive(Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Deserialize)]
struct VectorParams {
    size: u64,
    distance: String,
}

#[derive(Deserialize)]
struct UpdateResult {
    status: String,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f64,
    #[serde(default)]
    payload: Option<PointPayload>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PointPayload {
    #[serde(default)]
    id: Option<String>,
    text: String,
    metadata: DocumentChunkMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified_at: Option<i64>,
}

/// Deterministic point id for a chunk id.
fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&POINT_NAMESPACE, chunk_id.as_bytes()).to_string()
}

fn to_point(chunk: &DocumentChunk) -> anyhow::Result<Value> {
    let id = chunk
        .id
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("Chunk has no id"))?;
    let vector = chunk
        .embedding
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Chunk {id} has no embedding"))?;
    let payload = PointPayload {
        id: Some(id.to_string()),
        text: chunk.text.clone(),
        metadata: chunk.metadata.clone(),
        created_at: indexed_timestamp(&chunk.metadata, DateField::Created),
        modified_at: indexed_timestamp(&chunk.metadata, DateField::Modified),
    };
    Ok(json!({
        "id": point_id(id),
        "vector": vector,
        "payload": payload,
    }))
}

/// Qdrant filter: document ids go to `should`, every metadata condition to `must`.
fn to_qdrant_filter(filter: Option<&ResolvedFilter>, ids: Option<&[String]>) -> Option<Value> {
    let should: Vec<Value> = ids
        .unwrap_or_default()
        .iter()
        .map(|id| json!({"key": payload_key(MetadataField::DocumentId), "match": {"value": id}}))
        .collect();

    let mut must = Vec::new();
    if let Some(filter) = filter {
        for (field, value) in &filter.equals {
            must.push(json!({"key": payload_key(*field), "match": {"value": value}}));
        }
        for range in &filter.ranges {
            let mut bounds = serde_json::Map::new();
            if let Some(gte) = range.gte {
                bounds.insert("gte".to_string(), json!(gte));
            }
            if let Some(lte) = range.lte {
                bounds.insert("lte".to_string(), json!(lte));
            }
            must.push(json!({"key": range.field.key(), "range": bounds}));
        }
    }

    if must.is_empty() && should.is_empty() {
        return None;
    }
    Some(json!({"must": must, "should": should}))
}

fn payload_key(field: MetadataField) -> String {
    format!("metadata.{}", field.key())
}

impl QdrantStore {
    pub fn new(settings: QdrantSettings) -> Self {
        Self {
            settings: QdrantSettings {
                url: settings.url.trim_end_matches('/').to_string(),
                upsert_batch_size: settings.upsert_batch_size.max(1),
                ..settings
            },
            http_client: reqwest::Client::new(),
        }
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{suffix}", self.settings.url, self.settings.collection)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.http_client.request(method, url);
        match &self.settings.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        what: &str,
        method: Method,
        url: &str,
        body: &Value,
    ) -> anyhow::Result<T> {
        let response: QdrantResponse<T> = send_json(what, backoff_policy(self.settings.retry_timeout), || {
            self.request(method.clone(), url).json(body)
        })
        .await?;
        Ok(response.result)
    }

    async fn collection_params(&self) -> anyhow::Result<Option<VectorParams>> {
        let url = self.collection_url("");
        let (url, this) = (&url, self);
        with_retry(
            "Qdrant get collection",
            backoff_policy(self.settings.retry_timeout),
            move || async move {
                let resp = match this.request(Method::GET, url).send().await {
                    Ok(resp) => resp,
                    Err(e) => return Attempt::Transient(e.into()),
                };
                let status = resp.status();
                if status == StatusCode::NOT_FOUND {
                    return Attempt::Done(None);
                }
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return classify_status(status, anyhow::anyhow!("Qdrant error ({status}): {body}"));
                }
                match resp.json::<QdrantResponse<CollectionInfo>>().await {
                    Ok(info) => Attempt::Done(Some(info.result.config.params.vectors)),
                    Err(e) => Attempt::Permanent(e.into()),
                }
            },
        )
        .await
    }

    async fn create_collection(&self) -> anyhow::Result<()> {
        let url = self.collection_url("");
        let body = json!({
            "vectors": {"size": self.settings.vector_size, "distance": self.settings.distance}
        });
        let _: Value = self.call("Qdrant create collection", Method::PUT, &url, &body).await?;

        // document_id backs deletes, the timestamps back range filters.
        let index_url = self.collection_url("/index");
        let indexes = [
            (payload_key(MetadataField::DocumentId), "keyword"),
            (DateField::Created.key().to_string(), "integer"),
            (DateField::Modified.key().to_string(), "integer"),
        ];
        for (field_name, schema) in indexes {
            let body = json!({"field_name": field_name, "field_schema": schema});
            let _: Value = self
                .call("Qdrant create payload index", Method::PUT, &index_url, &body)
                .await?;
        }

        info!("Created Qdrant collection {}", self.settings.collection);
        Ok(())
    }

    async fn drop_collection(&self) -> anyhow::Result<()> {
        let url = self.collection_url("");
        let _: Value = self
            .call("Qdrant delete collection", Method::DELETE, &url, &json!({}))
            .await?;
        Ok(())
    }

    async fn delete_points(&self, filter: Value) -> anyhow::Result<bool> {
        let url = self.collection_url("/points/delete?wait=true");
        let result: UpdateResult = self
            .call("Qdrant delete points", Method::POST, &url, &json!({"filter": filter}))
            .await?;
        Ok(result.status.eq_ignore_ascii_case("completed"))
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        if self.settings.recreate_collection && self.collection_params().await?.is_some() {
            warn!("Recreating Qdrant collection {}", self.settings.collection);
            self.drop_collection().await?;
        }

        match self.collection_params().await? {
            None => self.create_collection().await,
            Some(params) => {
                if !params.distance.eq_ignore_ascii_case(&self.settings.distance) {
                    anyhow::bail!(
                        "Collection '{}' already exists in Qdrant with distance '{}'; set recreate_collection to use '{}'",
                        self.settings.collection,
                        params.distance,
                        self.settings.distance
                    );
                }
                if params.size != self.settings.vector_size as u64 {
                    anyhow::bail!(
                        "Collection '{}' already exists in Qdrant with vector size {}; set recreate_collection to use {}",
                        self.settings.collection,
                        params.size,
                        self.settings.vector_size
                    );
                }
                info!("Using existing Qdrant collection {}", self.settings.collection);
                Ok(())
            }
        }
    }

    async fn upsert_chunks(&self, documents: &[ChunkedDocument]) -> anyhow::Result<Vec<String>> {
        let points = documents
            .iter()
            .flat_map(|doc| doc.chunks.iter())
            .map(to_point)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let url = self.collection_url("/points?wait=true");
        for batch in points.chunks(self.settings.upsert_batch_size) {
            let _: Value = self
                .call("Qdrant upsert", Method::PUT, &url, &json!({"points": batch}))
                .await?;
        }

        Ok(documents.iter().map(|d| d.document_id.clone()).collect())
    }

    async fn query_embeddings(&self, queries: &[QueryWithEmbedding]) -> anyhow::Result<Vec<QueryResult>> {
        let mut searches = Vec::with_capacity(queries.len());
        for q in queries {
            let filter = resolve_filter(q.query.filter.as_ref())?;
            let mut search = json!({
                "vector": q.embedding,
                "limit": q.query.top_k,
                "with_payload": true,
                "with_vector": false,
            });
            if let Some(filter) = to_qdrant_filter(filter.as_ref(), None) {
                search["filter"] = filter;
            }
            searches.push(search);
        }

        let url = self.collection_url("/points/search/batch");
        let batches: Vec<Vec<ScoredPoint>> = self
            .call("Qdrant search", Method::POST, &url, &json!({"searches": searches}))
            .await?;

        Ok(queries
            .iter()
            .zip(batches)
            .map(|(q, points)| QueryResult {
                query: q.query.query.clone(),
                results: points
                    .into_iter()
                    .filter_map(|p| {
                        let payload = p.payload?;
                        Some(DocumentChunkWithScore {
                            chunk: DocumentChunk {
                                id: payload.id,
                                text: payload.text,
                                metadata: payload.metadata,
                                embedding: None,
                            },
                            score: p.score,
                        })
                    })
                    .collect(),
            })
            .collect())
    }

    async fn delete(
        &self,
        ids: Option<&[String]>,
        filter: Option<&DocumentMetadataFilter>,
        delete_all: bool,
    ) -> anyhow::Result<bool> {
        if delete_all {
            return self.delete_points(json!({})).await;
        }
        let filter = resolve_filter(filter)?;
        match to_qdrant_filter(filter.as_ref(), ids) {
            Some(qdrant_filter) => self.delete_points(qdrant_filter).await,
            None => Ok(true),
        }
    }

    fn provider_name(&self) -> &'static str {
        "qdrant"
    }
}
