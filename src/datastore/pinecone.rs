use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::VectorStore;
use super::filter::{ResolvedFilter, indexed_timestamp, resolve_filter};
use crate::models::document::{
    ChunkedDocument, DateField, DocumentChunk, DocumentChunkWithScore, DocumentMetadataFilter, MetadataField,
    QueryResult, QueryWithEmbedding,
};
use crate::retry::{backoff_policy, send_json};

pub struct PineconeSettings {
    /// Data-plane host of the index, e.g. `https://my-index-abc123.svc.pinecone.io`.
    pub index_host: String,
    pub api_key: String,
    pub namespace: Option<String>,
    pub dimensions: u32,
    pub upsert_batch_size: usize,
    pub retry_timeout: Duration,
}

/// Pinecone over its REST data-plane API.
pub struct PineconeStore {
    settings: PineconeSettings,
    http_client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
    dimension: u32,
    #[serde(default)]
    total_vector_count: u64,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<Match>,
}

#[derive(Deserialize)]
struct Match {
    id: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

/// Flat metadata stored with each vector: the chunk metadata, its text and
/// the indexed timestamps. Pinecone rejects nulls, so unset fields are left out.
fn to_vector(chunk: &DocumentChunk, document_id: &str) -> anyhow::Result<Value> {
    let id = chunk
        .id
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("Chunk of document {document_id} has no id"))?;
    let values = chunk
        .embedding
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Chunk {id} has no embedding"))?;

    let mut metadata = Map::new();
    for field in MetadataField::ALL {
        if let Some(v) = chunk.metadata.get(field) {
            metadata.insert(field.key().to_string(), json!(v));
        }
    }
    metadata.insert("document_id".to_string(), json!(document_id));
    metadata.insert("text".to_string(), json!(chunk.text));
    for field in [DateField::Created, DateField::Modified] {
        if let Some(ts) = indexed_timestamp(&chunk.metadata, field) {
            metadata.insert(field.key().to_string(), json!(ts));
        }
    }

    Ok(json!({"id": id, "values": values, "metadata": metadata}))
}

/// `$eq` on every equality field, `$gte`/`$lte` on the indexed timestamps.
fn to_pinecone_filter(filter: &ResolvedFilter) -> Map<String, Value> {
    let mut out = Map::new();
    for (field, value) in &filter.equals {
        out.insert(field.key().to_string(), json!({"$eq": value}));
    }
    for range in &filter.ranges {
        let mut bounds = Map::new();
        if let Some(gte) = range.gte {
            bounds.insert("$gte".to_string(), json!(gte));
        }
        if let Some(lte) = range.lte {
            bounds.insert("$lte".to_string(), json!(lte));
        }
        out.insert(range.field.key().to_string(), Value::Object(bounds));
    }
    out
}

fn from_match(m: Match) -> DocumentChunkWithScore {
    let mut metadata = m.metadata.unwrap_or_default();
    let text = match metadata.remove("text") {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    let metadata = serde_json::from_value(Value::Object(metadata)).unwrap_or_else(|e| {
        warn!("Ignoring unreadable metadata on match {}: {e}", m.id);
        Default::default()
    });
    DocumentChunkWithScore {
        chunk: DocumentChunk {
            id: Some(m.id),
            text,
            metadata,
            embedding: None,
        },
        score: m.score,
    }
}

impl PineconeStore {
    pub fn new(settings: PineconeSettings) -> Self {
        Self {
            settings: PineconeSettings {
                index_host: settings.index_host.trim_end_matches('/').to_string(),
                upsert_batch_size: settings.upsert_batch_size.max(1),
                ..settings
            },
            http_client: reqwest::Client::new(),
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, what: &str, path: &str, mut body: Value) -> anyhow::Result<T> {
        if let (Some(ns), Some(obj)) = (&self.settings.namespace, body.as_object_mut()) {
            obj.insert("namespace".to_string(), json!(ns));
        }
        let url = format!("{}{path}", self.settings.index_host);
        send_json(what, backoff_policy(self.settings.retry_timeout), || {
            self.http_client
                .post(&url)
                .header("Api-Key", &self.settings.api_key)
                .json(&body)
        })
        .await
    }

    async fn query_one(&self, q: &QueryWithEmbedding) -> anyhow::Result<QueryResult> {
        let mut body = json!({
            "vector": q.embedding,
            "topK": q.query.top_k,
            "includeMetadata": true,
        });
        if let Some(filter) = resolve_filter(q.query.filter.as_ref())? {
            body["filter"] = Value::Object(to_pinecone_filter(&filter));
        }
        let response: QueryResponse = self.post("Pinecone query", "/query", body).await?;
        Ok(QueryResult {
            query: q.query.query.clone(),
            results: response.matches.into_iter().map(from_match).collect(),
        })
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        let stats: IndexStats = self
            .post("Pinecone describe index", "/describe_index_stats", json!({}))
            .await?;
        if stats.dimension != self.settings.dimensions {
            anyhow::bail!(
                "Pinecone index has dimension {}, embeddings have {}",
                stats.dimension,
                self.settings.dimensions
            );
        }
        info!("Connected to Pinecone index ({} vectors)", stats.total_vector_count);
        Ok(())
    }

    async fn upsert_chunks(&self, documents: &[ChunkedDocument]) -> anyhow::Result<Vec<String>> {
        let vectors = documents
            .iter()
            .flat_map(|doc| doc.chunks.iter().map(|c| to_vector(c, &doc.document_id)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        for batch in vectors.chunks(self.settings.upsert_batch_size) {
            debug!("Upserting batch of {} vectors", batch.len());
            let _: Value = self
                .post("Pinecone upsert", "/vectors/upsert", json!({"vectors": batch}))
                .await?;
        }

        Ok(documents.iter().map(|d| d.document_id.clone()).collect())
    }

    async fn query_embeddings(&self, queries: &[QueryWithEmbedding]) -> anyhow::Result<Vec<QueryResult>> {
        try_join_all(queries.iter().map(|q| self.query_one(q))).await
    }

    async fn delete(
        &self,
        ids: Option<&[String]>,
        filter: Option<&DocumentMetadataFilter>,
        delete_all: bool,
    ) -> anyhow::Result<bool> {
        if delete_all {
            let _: Value = self
                .post("Pinecone delete", "/vectors/delete", json!({"deleteAll": true}))
                .await?;
            info!("Deleted all vectors");
            return Ok(true);
        }

        if let Some(filter) = resolve_filter(filter)? {
            let body = json!({"filter": to_pinecone_filter(&filter)});
            let _: Value = self.post("Pinecone delete", "/vectors/delete", body).await?;
        }

        if let Some(ids) = ids.filter(|ids| !ids.is_empty()) {
            let body = json!({"filter": {"document_id": {"$in": ids}}});
            let _: Value = self.post("Pinecone delete", "/vectors/delete", body).await?;
        }

        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "pinecone"
    }
}
