pub mod filter;
pub mod memory;
pub mod pinecone;
pub mod postgres;
pub mod qdrant;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info};

use crate::chunker::Chunker;
use crate::embedding::EmbeddingModel;
use crate::models::document::{
    ChunkedDocument, Document, DocumentMetadataFilter, Query, QueryResult, QueryWithEmbedding,
};

use self::filter::resolve_filter;

/// A vector database backend. Each provider translates filters and batches
/// writes in its own way.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Prepare the backend (create tables, collections, indexes).
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Write embedded chunks, replacing any with the same chunk id. Returns
    /// the document ids in input order.
    async fn upsert_chunks(&self, documents: &[ChunkedDocument]) -> anyhow::Result<Vec<String>>;

    /// One result per query, in order, best match first.
    async fn query_embeddings(&self, queries: &[QueryWithEmbedding]) -> anyhow::Result<Vec<QueryResult>>;

    /// Remove chunks by document ids, by filter, or everything.
    async fn delete(
        &self,
        ids: Option<&[String]>,
        filter: Option<&DocumentMetadataFilter>,
        delete_all: bool,
    ) -> anyhow::Result<bool>;

    fn provider_name(&self) -> &'static str;
}

/// Chunks, embeds and stores documents; embeds and runs queries.
pub struct DataStore {
    store: Arc<dyn VectorStore>,
    embedding_model: Arc<dyn EmbeddingModel>,
    chunker: Chunker,
}

impl DataStore {
    pub fn new(store: Arc<dyn VectorStore>, embedding_model: Arc<dyn EmbeddingModel>, chunker: Chunker) -> Self {
        Self {
            store,
            embedding_model,
            chunker,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.store.provider_name()
    }

    /// Replace the stored chunks of every document and return their ids.
    pub async fn upsert(&self, documents: &[Document], chunk_token_size: Option<usize>) -> anyhow::Result<Vec<String>> {
        let mut chunked = self.chunker.get_document_chunks(documents, chunk_token_size);

        let texts: Vec<String> = chunked
            .iter()
            .flat_map(|doc| doc.chunks.iter().map(|c| c.text.clone()))
            .collect();
        debug!("Embedding {} chunks from {} documents", texts.len(), chunked.len());

        let embeddings = self.embedding_model.embed_for_ingestion(&texts).await?;
        if embeddings.len() != texts.len() {
            anyhow::bail!(
                "Embedding count mismatch: {} chunks, {} embeddings",
                texts.len(),
                embeddings.len()
            );
        }

        let mut embeddings = embeddings.into_iter();
        for chunk in chunked.iter_mut().flat_map(|doc| doc.chunks.iter_mut()) {
            chunk.embedding = embeddings.next();
        }

        // Stale chunks go only once the replacements are ready to write.
        try_join_all(documents.iter().filter_map(|doc| doc.id.as_deref()).map(|id| {
            let filter = DocumentMetadataFilter::for_document(id);
            async move { self.store.delete(None, Some(&filter), false).await }
        }))
        .await?;

        let ids = self.store.upsert_chunks(&chunked).await?;
        info!("Upserted {} documents into {}", ids.len(), self.provider_name());
        Ok(ids)
    }

    /// Embed the queries (in one request when there are several) and search the store.
    pub async fn query(&self, queries: &[Query]) -> anyhow::Result<Vec<QueryResult>> {
        if queries.is_empty() {
            return Ok(vec![]);
        }
        // Reject bad filters before paying for embeddings.
        for query in queries {
            resolve_filter(query.filter.as_ref())?;
        }

        let embeddings = match queries {
            [single] => vec![self.embedding_model.embed_for_query(&single.query).await?],
            _ => {
                let texts: Vec<String> = queries.iter().map(|q| q.query.clone()).collect();
                self.embedding_model.embed_queries(&texts).await?
            }
        };
        if embeddings.len() != queries.len() {
            anyhow::bail!(
                "Embedding count mismatch: {} queries, {} embeddings",
                queries.len(),
                embeddings.len()
            );
        }

        let with_embeddings: Vec<QueryWithEmbedding> = queries
            .iter()
            .cloned()
            .zip(embeddings)
            .map(|(query, embedding)| QueryWithEmbedding { query, embedding })
            .collect();

        self.store.query_embeddings(&with_embeddings).await
    }

    pub async fn delete(
        &self,
        ids: Option<&[String]>,
        filter: Option<&DocumentMetadataFilter>,
        delete_all: bool,
    ) -> anyhow::Result<bool> {
        let has_ids = ids.is_some_and(|ids| !ids.is_empty());
        if !has_ids && filter.is_none() && !delete_all {
            anyhow::bail!("One of ids, filter, or delete_all is required");
        }
        if let Some(filter) = filter {
            resolve_filter(Some(filter))?;
        }
        self.store.delete(ids, filter, delete_all).await
    }
}

/// Cosine similarity of two vectors; zero when either has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkingSettings;
    use crate::datastore::filter::FilterError;
    use crate::datastore::memory::MemoryStore;
    use crate::embedding::testing::HashingEmbeddingModel;
    use crate::models::document::DocumentMetadata;

    fn datastore() -> (DataStore, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let chunker = Chunker::new(ChunkingSettings::default()).unwrap();
        let ds = DataStore::new(store.clone(), Arc::new(HashingEmbeddingModel::new(64)), chunker);
        (ds, store)
    }

    fn doc(id: Option<&str>, text: &str, name: &str) -> Document {
        Document {
            id: id.map(str::to_string),
            text: text.to_string(),
            metadata: Some(DocumentMetadata {
                name: Some(name.to_string()),
                ..Default::default()
            }),
        }
    }

    fn query(text: &str, filter: Option<DocumentMetadataFilter>) -> Query {
        Query {
            query: text.to_string(),
            filter,
            top_k: 3,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_upsert_returns_ids_in_order() {
        let (ds, store) = datastore();
        let ids = ds
            .upsert(
                &[
                    doc(Some("b"), "Bananas are yellow fruit grown in the tropics.", "b.txt"),
                    doc(Some("a"), "Apples grow on trees in cooler climates.", "a.txt"),
                    doc(None, "A document without an id still gets stored.", "c.txt"),
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(&ids[..2], &["b".to_string(), "a".to_string()]);
        assert_eq!(store.len().await, 3);
        assert!(store.chunk_ids().await.contains(&"b_0".to_string()));
    }

    #[tokio::test]
    async fn test_reupsert_replaces_chunks() {
        let (ds, store) = datastore();
        let long = "Sentence about rivers and lakes. ".repeat(200);
        ds.upsert(&[doc(Some("doc"), &long, "long.txt")], Some(50)).await.unwrap();
        assert!(store.len().await > 1);

        ds.upsert(&[doc(Some("doc"), "Now a single short chunk of text.", "short.txt")], None)
            .await
            .unwrap();
        assert_eq!(store.chunk_ids().await, vec!["doc_0".to_string()]);
    }

    struct FailingEmbeddingModel;

    #[async_trait]
    impl EmbeddingModel for FailingEmbeddingModel {
        async fn embed_for_ingestion(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("embedding API down")
        }

        async fn embed_for_query(&self, _query: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("embedding API down")
        }

        fn dimensions(&self) -> u32 {
            64
        }
    }

    #[tokio::test]
    async fn test_failed_reupsert_keeps_old_chunks() {
        let (ds, store) = datastore();
        ds.upsert(&[doc(Some("doc"), "The original text that must survive.", "doc.txt")], None)
            .await
            .unwrap();

        let failing = DataStore::new(
            store.clone(),
            Arc::new(FailingEmbeddingModel),
            Chunker::new(ChunkingSettings::default()).unwrap(),
        );
        let err = failing
            .upsert(&[doc(Some("doc"), "A replacement that never gets embedded.", "doc.txt")], None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("embedding API down"));
        assert_eq!(store.chunk_ids().await, vec!["doc_0".to_string()]);
        assert!(store.chunk("doc_0").await.unwrap().text.contains("original text"));
    }

    #[tokio::test]
    async fn test_single_query_matches_batch_ranking() {
        let (ds, _) = datastore();
        ds.upsert(
            &[
                doc(Some("fruit"), "Bananas and apples are popular fruit.", "fruit.txt"),
                doc(Some("cars"), "Engines and wheels make cars move.", "cars.txt"),
            ],
            None,
        )
        .await
        .unwrap();

        let single = ds.query(&[query("engines wheels", None)]).await.unwrap();
        let batch = ds
            .query(&[query("engines wheels", None), query("fruit", None)])
            .await
            .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].results[0].chunk.id.as_deref(), Some("cars_0"));
        assert_eq!(single[0].results[0].score, batch[0].results[0].score);
    }

    #[tokio::test]
    async fn test_query_ranks_and_filters() {
        let (ds, _) = datastore();
        ds.upsert(
            &[
                doc(Some("fruit"), "Bananas and apples are popular fruit.", "fruit.txt"),
                doc(Some("cars"), "Engines and wheels make cars move.", "cars.txt"),
            ],
            None,
        )
        .await
        .unwrap();

        let results = ds
            .query(&[
                query("bananas fruit", None),
                query(
                    "bananas fruit",
                    Some(DocumentMetadataFilter {
                        name: Some("cars.txt".to_string()),
                        ..Default::default()
                    }),
                ),
            ])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].query, "bananas fruit");
        assert_eq!(results[0].results[0].chunk.metadata.document_id.as_deref(), Some("fruit"));
        assert!(results[1]
            .results
            .iter()
            .all(|r| r.chunk.metadata.document.name.as_deref() == Some("cars.txt")));
    }

    #[tokio::test]
    async fn test_query_rejects_bad_filter_date() {
        let (ds, _) = datastore();
        let err = ds
            .query(&[query(
                "x",
                Some(DocumentMetadataFilter {
                    created_time_start_date: Some("not a date".to_string()),
                    ..Default::default()
                }),
            )])
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<FilterError>().is_some());
    }

    #[tokio::test]
    async fn test_delete_requires_target() {
        let (ds, store) = datastore();
        ds.upsert(&[doc(Some("a"), "Some text worth keeping around.", "a.txt")], None)
            .await
            .unwrap();

        assert!(ds.delete(None, None, false).await.is_err());
        assert!(ds.delete(Some(&[][..]), None, false).await.is_err());

        assert!(ds.delete(Some(&["a".to_string()][..]), None, false).await.unwrap());
        assert_eq!(store.len().await, 0);
    }
}
