use serde::{Deserialize, Serialize};

use super::document::{Document, DocumentMetadataFilter, Query, QueryResult};

// ──────────────────────────── Upsert ────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UpsertRequest {
    pub documents: Vec<Document>,
    /// Overrides the configured chunk size for this request.
    #[serde(default)]
    pub chunk_token_size: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpsertResponse {
    pub ids: Vec<String>,
}

// ──────────────────────────── Query ────────────────────────────

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub queries: Vec<Query>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
pub struct QueryGptRequest {
    pub queries: Vec<Query>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryGptResponse {
    pub result: String,
}

// ──────────────────────────── Delete ────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub ids: Option<Vec<String>>,
    #[serde(default)]
    pub filter: Option<DocumentMetadataFilter>,
    #[serde(default)]
    pub delete_all: bool,
}

impl DeleteRequest {
    /// True when the request names something to delete.
    pub fn has_target(&self) -> bool {
        self.delete_all
            || self.ids.as_ref().is_some_and(|ids| !ids.is_empty())
            || self.filter.is_some()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
}

// ──────────────────────────── Auth ────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthContext {
    pub subject: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub app_role: Option<String>,
}

// ──────────────────────────── Health ────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub environment: String,
    pub datastore: String,
}
