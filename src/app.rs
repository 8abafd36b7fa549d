use std::sync::Arc;

use crate::completion::CompletionModel;
use crate::config::Settings;
use crate::datastore::DataStore;
use crate::queue::UpsertQueue;
use crate::services::preprocess::Preprocessor;

/// Shared application state passed to all route handlers.
pub struct AppState {
    pub settings: Settings,
    pub datastore: Arc<DataStore>,
    pub completion_model: Arc<dyn CompletionModel>,
    /// Present when any preprocessing step is enabled.
    pub preprocessor: Option<Preprocessor>,
    /// Present when queued ingestion is enabled.
    pub queue: Option<UpsertQueue>,
}
