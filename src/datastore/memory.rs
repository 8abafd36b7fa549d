use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::filter::resolve_filter;
use super::{VectorStore, cosine_similarity};
use crate::models::document::{
    ChunkedDocument, DocumentChunk, DocumentChunkWithScore, DocumentMetadataFilter, QueryResult,
    QueryWithEmbedding,
};

/// In-process store: brute-force cosine search over a map of chunks.
/// Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    chunks: RwLock<BTreeMap<String, DocumentChunk>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryStore {
    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    /// Stored chunk ids, sorted.
    pub async fn chunk_ids(&self) -> Vec<String> {
        self.chunks.read().await.keys().cloned().collect()
    }

    pub async fn chunk(&self, id: &str) -> Option<DocumentChunk> {
        self.chunks.read().await.get(id).cloned()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn upsert_chunks(&self, documents: &[ChunkedDocument]) -> anyhow::Result<Vec<String>> {
        let mut chunks = self.chunks.write().await;
        for doc in documents {
            for chunk in &doc.chunks {
                let id = chunk
                    .id
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("Chunk of document {} has no id", doc.document_id))?;
                chunks.insert(id, chunk.clone());
            }
        }
        Ok(documents.iter().map(|d| d.document_id.clone()).collect())
    }

    async fn query_embeddings(&self, queries: &[QueryWithEmbedding]) -> anyhow::Result<Vec<QueryResult>> {
        let chunks = self.chunks.read().await;
        let mut results = Vec::with_capacity(queries.len());

        for q in queries {
            let filter = resolve_filter(q.query.filter.as_ref())?;
            let mut scored: Vec<DocumentChunkWithScore> = chunks
                .values()
                .filter(|c| filter.as_ref().is_none_or(|f| f.matches(&c.metadata)))
                .filter_map(|c| {
                    let embedding = c.embedding.as_deref()?;
                    Some(DocumentChunkWithScore {
                        score: cosine_similarity(&q.embedding, embedding),
                        chunk: DocumentChunk {
                            embedding: None,
                            ..c.clone()
                        },
                    })
                })
                .collect();
            scored.sort_by(|a, b| b.score.total_cmp(&a.score));
            scored.truncate(q.query.top_k);

            results.push(QueryResult {
                query: q.query.query.clone(),
                results: scored,
            });
        }

        Ok(results)
    }

    async fn delete(
        &self,
        ids: Option<&[String]>,
        filter: Option<&DocumentMetadataFilter>,
        delete_all: bool,
    ) -> anyhow::Result<bool> {
        let mut chunks = self.chunks.write().await;
        if delete_all {
            chunks.clear();
            return Ok(true);
        }

        if let Some(ids) = ids.filter(|ids| !ids.is_empty()) {
            chunks.retain(|_, c| {
                c.metadata
                    .document_id
                    .as_ref()
                    .is_none_or(|doc_id| !ids.contains(doc_id))
            });
        }

        if let Some(filter) = resolve_filter(filter)? {
            chunks.retain(|_, c| !filter.matches(&c.metadata));
        }

        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
