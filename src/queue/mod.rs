use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::datastore::DataStore;
use crate::models::document::Document;

/// One queued upsert request.
struct UpsertJob {
    documents: Vec<Document>,
    chunk_token_size: Option<usize>,
}

/// Asynchronous ingestion: `produce` returns ids right away and a background
/// worker writes the documents into the datastore in arrival order.
pub struct UpsertQueue {
    sender: Mutex<Option<mpsc::Sender<UpsertJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Id assigned to a document queued without one: hex sha256 of its text.
pub fn content_id(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

impl UpsertQueue {
    pub fn spawn(datastore: Arc<DataStore>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<UpsertJob>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let count = job.documents.len();
                match datastore.upsert(&job.documents, job.chunk_token_size).await {
                    Ok(ids) => info!("Queued upsert stored {} documents", ids.len()),
                    Err(e) => error!("Queued upsert of {count} documents failed: {e:#}"),
                }
            }
            info!("Upsert queue drained");
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Assign missing ids, enqueue, and return the ids in input order.
    pub async fn produce(
        &self,
        mut documents: Vec<Document>,
        chunk_token_size: Option<usize>,
    ) -> anyhow::Result<Vec<String>> {
        let ids: Vec<String> = documents
            .iter_mut()
            .map(|doc| doc.id.get_or_insert_with(|| content_id(&doc.text)).clone())
            .collect();

        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Upsert queue is shut down"))?;
        sender
            .send(UpsertJob {
                documents,
                chunk_token_size,
            })
            .await
            .map_err(|_| anyhow::anyhow!("Upsert queue worker stopped"))?;

        Ok(ids)
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                error!("Upsert queue worker panicked: {e}");
            }
        }
    }
}
