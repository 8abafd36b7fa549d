mod app;
mod auth;
mod chunker;
mod completion;
mod config;
mod datastore;
mod embedding;
mod models;
mod queue;
mod retry;
mod routes;
mod services;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use app::AppState;
use chunker::Chunker;
use completion::openai::OpenAICompletionModel;
use config::{Settings, config_path, load_settings_from_path};
use datastore::memory::MemoryStore;
use datastore::pinecone::{PineconeSettings, PineconeStore};
use datastore::postgres::PostgresStore;
use datastore::qdrant::{QdrantSettings, QdrantStore};
use datastore::{DataStore, VectorStore};
use embedding::openai::OpenAIEmbeddingModel;
use queue::UpsertQueue;
use services::preprocess::Preprocessor;

/// Build the configured vector store.
async fn build_vector_store(settings: &Settings) -> anyhow::Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match settings.datastore_provider.as_str() {
        "memory" => {
            warn!("Using the in-memory datastore; nothing is persisted");
            Arc::new(MemoryStore::new())
        }
        "postgres" => {
            let uri = settings
                .postgres_uri
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("POSTGRES_URI is not set"))?;
            Arc::new(
                PostgresStore::new(
                    uri,
                    settings.postgres_pool_size,
                    settings.ivfflat_probes,
                    settings.embedding_dimensions,
                )
                .await?,
            )
        }
        "qdrant" => Arc::new(QdrantStore::new(QdrantSettings {
            url: settings.qdrant_url.clone(),
            api_key: settings.qdrant_api_key.clone(),
            collection: settings.qdrant_collection.clone(),
            vector_size: settings.embedding_dimensions,
            distance: settings.qdrant_distance.clone(),
            recreate_collection: settings.qdrant_recreate_collection,
            upsert_batch_size: settings.qdrant_upsert_batch_size,
            retry_timeout: settings.retry_timeout,
        })),
        "pinecone" => Arc::new(PineconeStore::new(PineconeSettings {
            index_host: settings
                .pinecone_index_host
                .clone()
                .ok_or_else(|| anyhow::anyhow!("pinecone.index_host is not set"))?,
            api_key: settings
                .pinecone_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("PINECONE_API_KEY is not set"))?,
            namespace: settings.pinecone_namespace.clone(),
            dimensions: settings.embedding_dimensions,
            upsert_batch_size: settings.pinecone_upsert_batch_size,
            retry_timeout: settings.retry_timeout,
        })),
        other => anyhow::bail!("Unknown datastore provider: {other}"),
    };
    store.initialize().await?;
    info!("Datastore initialized: {}", store.provider_name());
    Ok(store)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting retrieval plugin server...");

    // Load configuration.
    let path = config_path();
    let settings = load_settings_from_path(&path)?;
    info!(
        "Configuration loaded from {}: environment={}, host={}, port={}",
        path.display(),
        settings.environment,
        settings.host,
        settings.port
    );
    if settings.openai_api_key.is_empty() {
        warn!("OPENAI_API_KEY is not set; embedding and completion calls will fail");
    }

    // Initialize datastore.
    let store = build_vector_store(&settings).await?;

    let embedding_model: Arc<dyn embedding::EmbeddingModel> = Arc::new(OpenAIEmbeddingModel::new(
        &settings.embedding_model,
        &settings.openai_api_key,
        &settings.embedding_api_base,
        settings.embedding_dimensions,
        settings.embedding_batch_size,
        settings.retry_timeout,
    ));
    info!(
        "Embedding model initialized: {} ({} dimensions)",
        settings.embedding_model,
        embedding_model.dimensions()
    );

    let completion_model: Arc<dyn completion::CompletionModel> = Arc::new(OpenAICompletionModel::new(
        &settings.completion_model,
        &settings.openai_api_key,
        &settings.completion_api_base,
        settings.default_max_tokens,
        settings.default_temperature,
        settings.retry_timeout,
    ));
    info!("Completion model initialized: {}", settings.completion_model);

    let chunker = Chunker::new(settings.chunking.clone())?;
    let datastore = Arc::new(DataStore::new(store, embedding_model, chunker));

    let preprocessor = if settings.preprocess.is_enabled() {
        info!("Preprocessing enabled: {:?}", settings.preprocess);
        Some(Preprocessor::new(completion_model.clone(), settings.preprocess.clone())?)
    } else {
        None
    };

    let queue = settings.queue_enabled.then(|| {
        info!("Queued ingestion enabled (capacity={})", settings.queue_capacity);
        UpsertQueue::spawn(datastore.clone(), settings.queue_capacity)
    });

    // Build application state.
    let state = Arc::new(AppState {
        settings: settings.clone(),
        datastore,
        completion_model,
        preprocessor,
        queue,
    });

    // Build router.
    let app = routes::build_router(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server.
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(queue) = &state.queue {
        info!("Draining upsert queue...");
        queue.shutdown().await;
    }

    Ok(())
}
