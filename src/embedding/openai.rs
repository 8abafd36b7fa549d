use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::EmbeddingModel;
use crate::retry::{backoff_policy, send_json};

/// OpenAI-compatible embedding model via API.
pub struct OpenAIEmbeddingModel {
    model_name: String,
    api_key: String,
    api_base: String,
    dimensions: u32,
    batch_size: usize,
    retry_timeout: Duration,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbeddingModel {
    pub fn new(
        model_name: &str,
        api_key: &str,
        api_base: &str,
        dimensions: u32,
        batch_size: usize,
        retry_timeout: Duration,
    ) -> Self {
        Self {
            model_name: model_name.to_string(),
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            dimensions,
            batch_size: batch_size.max(1),
            retry_timeout,
            http_client: reqwest::Client::new(),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.api_base);
        let request = EmbeddingRequest {
            model: &self.model_name,
            input: texts,
        };

        let response: EmbeddingResponse = send_json(
            "OpenAI embedding API",
            backoff_policy(self.retry_timeout),
            || {
                self.http_client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&request)
            },
        )
        .await?;

        if response.data.len() != texts.len() {
            anyhow::bail!(
                "Embedding count mismatch: sent {}, received {}",
                texts.len(),
                response.data.len()
            );
        }

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingModel for OpenAIEmbeddingModel {
    async fn embed_for_ingestion(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            debug!("Embedding batch of {} texts", batch.len());
            let embeddings = self.embed_batch(batch).await?;

            // Validate dimensions.
            for emb in &embeddings {
                if emb.len() != self.dimensions as usize {
                    anyhow::bail!(
                        "Embedding dimension mismatch: expected {}, got {}",
                        self.dimensions,
                        emb.len()
                    );
                }
            }

            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    async fn embed_for_query(&self, query: &str) -> anyhow::Result<Vec<f32>> {
        let results = self.embed_batch(&[query.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned for query"))
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_request_serialization() {
        let input = vec!["hello world".to_string()];
        let req = EmbeddingRequest {
            model: "text-embedding-ada-002",
            input: &input,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "text-embedding-ada-002");
        assert_eq!(json["input"][0], "hello world");
    }

    #[test]
    fn test_embedding_response_deserialization() {
        let json = r#"{
            "data": [
                {"embedding": [0.4, 0.5], "index": 1, "object": "embedding"},
                {"embedding": [0.1, 0.2], "index": 0, "object": "embedding"}
            ],
            "model": "text-embedding-ada-002",
            "object": "list",
            "usage": {"prompt_tokens": 2, "total_tokens": 2}
        }"#;
        let resp: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.data.len(), 2);
        assert_eq!(resp.data[0].index, 1);
    }

    #[test]
    fn test_api_base_trailing_slash() {
        let model = OpenAIEmbeddingModel::new(
            "text-embedding-ada-002",
            "key",
            "https://api.openai.com/v1/",
            1536,
            0,
            Duration::from_secs(1),
        );
        assert_eq!(model.api_base, "https://api.openai.com/v1");
        assert_eq!(model.batch_size, 1);
        assert_eq!(model.dimensions(), 1536);
    }
}
