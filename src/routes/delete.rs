use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::delete as delete_route;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::info;

use super::{authorize, datastore_error};
use crate::app::AppState;
use crate::models::api::{DeleteRequest, DeleteResponse};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/delete", delete_route(delete))
}

/// DELETE /delete - Remove documents by id, by filter, or everything.
async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, (StatusCode, String)> {
    let auth = authorize(&state, &headers)?;

    if !req.has_target() {
        return Err((
            StatusCode::BAD_REQUEST,
            "One of ids, filter, or delete_all is required".to_string(),
        ));
    }

    let success = state
        .datastore
        .delete(req.ids.as_deref(), req.filter.as_ref(), req.delete_all)
        .await
        .map_err(|e| datastore_error("Delete", e))?;
    info!(
        "Delete by {} (ids={:?}, filter={}, delete_all={}) succeeded={success}",
        auth.subject,
        req.ids,
        req.filter.is_some(),
        req.delete_all
    );

    Ok(Json(DeleteResponse { success }))
}
