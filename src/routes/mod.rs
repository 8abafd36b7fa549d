pub mod delete;
pub mod health;
pub mod query;
pub mod upsert;

use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::{debug, error};

use crate::app::AppState;
use crate::auth::extract_auth_from_header;
use crate::datastore::filter::FilterError;
use crate::models::api::AuthContext;

/// Build all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let well_known = ServeDir::new(&state.settings.well_known_dir);
    Router::new()
        .merge(upsert::routes())
        .merge(query::routes())
        .merge(delete::routes())
        .merge(health::routes())
        .nest_service("/.well-known", well_known)
        .with_state(state)
}

/// Authenticate a request against the configured auth mode.
pub(crate) fn authorize(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, (StatusCode, String)> {
    let auth = extract_auth_from_header(
        headers.get("authorization").and_then(|v| v.to_str().ok()),
        &state.settings,
    )?;
    debug!(
        "Authorized {} (account={:?}, organization={:?}, role={:?})",
        auth.subject, auth.account_id, auth.organization_id, auth.app_role
    );
    Ok(auth)
}

/// Map a datastore failure to a response. Bad filters are the caller's fault.
pub(crate) fn datastore_error(context: &str, e: anyhow::Error) -> (StatusCode, String) {
    if let Some(filter_error) = e.downcast_ref::<FilterError>() {
        return (StatusCode::BAD_REQUEST, filter_error.to_string());
    }
    error!("{context} error: {e:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{context} error: {e}"),
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::chunker::{Chunker, ChunkingSettings};
    use crate::completion::CompletionModel;
    use crate::completion::testing::ScriptedCompletionModel;
    use crate::config::{Settings, test_settings};
    use crate::datastore::DataStore;
    use crate::datastore::memory::MemoryStore;
    use crate::embedding::testing::HashingEmbeddingModel;

    pub struct TestApp {
        pub store: Arc<MemoryStore>,
        pub completion: Arc<ScriptedCompletionModel>,
        pub router: Router,
    }

    pub fn test_app(replies: &[(&str, &str)]) -> TestApp {
        test_app_with(test_settings(), replies)
    }

    pub fn test_app_with(settings: Settings, replies: &[(&str, &str)]) -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let completion = Arc::new(ScriptedCompletionModel::new(replies));
        let datastore = Arc::new(DataStore::new(
            store.clone(),
            Arc::new(HashingEmbeddingModel::new(64)),
            Chunker::new(ChunkingSettings::default()).unwrap(),
        ));
        let completion_model: Arc<dyn CompletionModel> = completion.clone();
        let state = Arc::new(AppState {
            settings,
            datastore,
            completion_model,
            preprocessor: None,
            queue: None,
        });
        TestApp {
            store,
            completion,
            router: build_router(state),
        }
    }

    pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}
