use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{authorize, datastore_error};
use crate::app::AppState;
use crate::models::api::{UpsertRequest, UpsertResponse};
use crate::models::document::{Document, DocumentMetadata};
use crate::services::file::document_from_upload;

/// Document ingestion routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/upsert", post(upsert))
        .route("/upsert-file", post(upsert_file))
}

/// Preprocess, then hand documents to the queue or write them directly.
async fn store_documents(
    state: &AppState,
    documents: Vec<Document>,
    chunk_token_size: Option<usize>,
) -> Result<Vec<String>, (StatusCode, String)> {
    let documents = match &state.preprocessor {
        Some(preprocessor) => preprocessor.process(documents).await.map_err(|e| {
            error!("Preprocessing error: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Preprocessing error: {e}"),
            )
        })?,
        None => documents,
    };

    if let Some(queue) = &state.queue {
        return queue
            .produce(documents, chunk_token_size)
            .await
            .map_err(|e| datastore_error("Queue", e));
    }

    state
        .datastore
        .upsert(&documents, chunk_token_size)
        .await
        .map_err(|e| datastore_error("Upsert", e))
}

/// POST /upsert - Store JSON documents.
async fn upsert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<UpsertRequest>,
) -> Result<Json<UpsertResponse>, (StatusCode, String)> {
    let auth = authorize(&state, &headers)?;

    if req.chunk_token_size == Some(0) {
        return Err((
            StatusCode::BAD_REQUEST,
            "chunk_token_size must be positive".to_string(),
        ));
    }

    let count = req.documents.len();
    let ids = store_documents(&state, req.documents, req.chunk_token_size).await?;
    info!(
        "Upsert by {} accepted {count} documents, stored {}",
        auth.subject,
        ids.len()
    );

    Ok(Json(UpsertResponse { ids }))
}

/// POST /upsert-file - Extract text from an uploaded file and store it.
async fn upsert_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UpsertResponse>, (StatusCode, String)> {
    let auth = authorize(&state, &headers)?;

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut metadata: Option<DocumentMetadata> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart field: {e}"),
        )
    })? {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read file: {e}")))?
                        .to_vec(),
                );
            }
            "metadata" => {
                let text = field.text().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read metadata: {e}"),
                    )
                })?;
                // Unparseable metadata is ignored rather than failing the upload.
                metadata = serde_json::from_str(&text)
                    .inspect_err(|e| warn!("Ignoring invalid upload metadata: {e}"))
                    .ok();
            }
            _ => {}
        }
    }

    let file_data = file_bytes.ok_or_else(|| (StatusCode::BAD_REQUEST, "No file provided".to_string()))?;

    let document = document_from_upload(&file_data, content_type.as_deref(), filename.as_deref(), metadata)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let ids = store_documents(&state, vec![document], None).await?;
    info!(
        "Stored uploaded file {} for {}",
        filename.as_deref().unwrap_or("<unnamed>"),
        auth.subject
    );

    Ok(Json(UpsertResponse { ids }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthMode, test_settings};
    use crate::routes::testing::{json_request, send, test_app, test_app_with};
    use crate::services::file::testing::build_pdf;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;

    fn multipart_request(parts: &[(&str, Option<&str>, &str, &[u8])]) -> Request<Body> {
        let boundary = "retrieval-test-boundary";
        let mut body = Vec::new();
        for (name, filename, content_type, data) in parts {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match filename {
                Some(f) => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n").as_bytes(),
                ),
                None => body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{name}\"\r\n").as_bytes()),
            }
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upsert-file")
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_documents() {
        let app = test_app(&[]);
        let request = json_request(
            "POST",
            "/upsert",
            json!({"documents": [
                {"id": "doc1", "text": "The durian tree needs plenty of water in the dry season."},
                {"id": "doc2", "text": "Rice paddies are flooded before planting seedlings."}
            ]}),
        );
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        let response: UpsertResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(response.ids, vec!["doc1", "doc2"]);
        assert_eq!(app.store.chunk_ids().await, vec!["doc1_0", "doc2_0"]);
    }

    #[tokio::test]
    async fn test_upsert_requires_bearer_token() {
        let mut settings = test_settings();
        settings.auth_mode = AuthMode::Bearer;
        settings.bearer_token = Some("token".to_string());
        let app = test_app_with(settings, &[]);

        let request = json_request("POST", "/upsert", json!({"documents": [{"text": "some text here"}]}));
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut request = json_request("POST", "/upsert", json!({"documents": [{"text": "some text here"}]}));
        request
            .headers_mut()
            .insert("authorization", "Bearer token".parse().unwrap());
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upsert_rejects_zero_chunk_size() {
        let app = test_app(&[]);
        let request = json_request(
            "POST",
            "/upsert",
            json!({"documents": [{"text": "some text here"}], "chunk_token_size": 0}),
        );
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upsert_file_text() {
        let app = test_app(&[]);
        let request = multipart_request(&[
            (
                "file",
                Some("notes.txt"),
                "text/plain",
                b"Coffee plants prefer shade and well drained soil.".as_slice(),
            ),
            ("metadata", None, "application/json", br#"{"originalOwnersName": "Lan"}"#.as_slice()),
        ]);
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        let response: UpsertResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(response.ids.len(), 1);
        assert_eq!(app.store.len().await, 1);

        let chunk = app
            .store
            .chunk(&format!("{}_0", response.ids[0]))
            .await
            .unwrap();
        let meta = &chunk.metadata.document;
        assert_eq!(meta.name.as_deref(), Some("notes.txt"));
        assert_eq!(meta.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(meta.original_owners_name.as_deref(), Some("Lan"));
    }

    #[tokio::test]
    async fn test_upsert_file_pdf() {
        let app = test_app(&[]);
        let pdf = build_pdf(&["Cocoa pods ripen for five months before harvest."]);
        let request = multipart_request(&[("file", Some("cocoa.pdf"), "application/pdf", pdf.as_slice())]);
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        let response: UpsertResponse = serde_json::from_slice(&body).unwrap();

        let chunk = app
            .store
            .chunk(&format!("{}_0", response.ids[0]))
            .await
            .unwrap();
        assert!(chunk.text.contains("Cocoa pods ripen"));
        assert_eq!(chunk.metadata.document.mime_type.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn test_upsert_file_rejects_unsupported_type() {
        let app = test_app(&[]);
        let request = multipart_request(&[("file", Some("photo.png"), "image/png", b"\x89PNG\r\n".as_slice())]);
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("image/png"));
        assert_eq!(app.store.len().await, 0);
    }

    #[tokio::test]
    async fn test_upsert_file_requires_file() {
        let app = test_app(&[]);
        let request = multipart_request(&[("metadata", None, "application/json", b"{}".as_slice())]);
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
