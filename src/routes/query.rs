use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{authorize, datastore_error};
use crate::app::AppState;
use crate::completion::Message;
use crate::models::api::{QueryGptRequest, QueryGptResponse, QueryRequest, QueryResponse};
use crate::models::document::Query;

const SUB_QUERY_PROMPT: &str = "You write search queries for a vector database of documents. \
Given the user's question, reply with at most {max} short queries that together help answer it, \
one per line. Do not number them and do not explain them.";

const ANSWER_PROMPT: &str = "Answer the question using the context passages provided before it. \
If the context contains the answer directly or indirectly, the answer must reflect it. \
If it does not, say that the documents do not cover the question.";

/// Retrieval routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/query", post(query))
        .route("/sub/query", post(query))
        .route("/querygpt", post(querygpt))
}

/// POST /query and /sub/query - Similarity search for each query.
async fn query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, (StatusCode, String)> {
    authorize(&state, &headers)?;

    let results = state
        .datastore
        .query(&req.queries)
        .await
        .map_err(|e| datastore_error("Query", e))?;

    Ok(Json(QueryResponse { results }))
}

/// Split a completion reply into queries: one per line, list numbering removed.
fn parse_sub_queries(reply: &str, max: usize) -> Vec<String> {
    reply
        .lines()
        .map(|line| {
            let line = line.trim().trim_start_matches(['-', '*']).trim_start();
            match line.split_once(". ") {
                Some((n, rest)) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => rest,
                _ => line,
            }
        })
        .map(|line| line.trim().trim_matches('"').trim().to_string())
        .filter(|line| !line.is_empty())
        .take(max)
        .collect()
}

/// POST /querygpt - Break the last question into sub-queries, retrieve, and answer.
async fn querygpt(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<QueryGptRequest>,
) -> Result<Json<QueryGptResponse>, (StatusCode, String)> {
    authorize(&state, &headers)?;

    let mut queries = req.queries;
    let question = queries
        .pop()
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "At least one query is required".to_string()))?;

    // 1. Generate sub-queries.
    let max = state.settings.querygpt_max_sub_queries.max(1);
    let prompt = SUB_QUERY_PROMPT.replace("{max}", &max.to_string());
    let reply = state
        .completion_model
        .complete(
            &[Message::system(prompt), Message::user(question.query.clone())],
            None,
            Some(0.0),
        )
        .await
        .map_err(|e| {
            error!("Completion error: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Completion error: {e}"),
            )
        })?;
    let mut sub_queries = parse_sub_queries(&reply.content, max);
    if sub_queries.is_empty() {
        sub_queries.push(question.query.clone());
    }
    debug!("Sub-queries for {:?}: {sub_queries:?}", question.query);

    // 2. Retrieve, keeping the caller's filter and top_k.
    let sub_queries: Vec<Query> = sub_queries
        .into_iter()
        .map(|q| Query {
            query: q,
            filter: question.filter.clone(),
            top_k: question.top_k,
        })
        .collect();
    let results = state
        .datastore
        .query(&sub_queries)
        .await
        .map_err(|e| datastore_error("Query", e))?;

    let min_score = state.settings.querygpt_min_score;
    let passages: Vec<String> = results
        .into_iter()
        .flat_map(|r| r.results)
        .filter(|c| c.score >= min_score)
        .map(|c| c.chunk.text)
        .collect();
    info!("querygpt answering with {} passages", passages.len());

    // 3. Answer from the retrieved passages.
    let mut messages = vec![Message::system(ANSWER_PROMPT)];
    messages.extend(passages.into_iter().map(Message::user));
    messages.push(Message::user(format!("Question: {}", question.query)));

    let answer = state
        .completion_model
        .complete(&messages, None, None)
        .await
        .map_err(|e| {
            error!("Completion error: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Completion error: {e}"),
            )
        })?;

    Ok(Json(QueryGptResponse {
        result: answer.content,
    }))
}
