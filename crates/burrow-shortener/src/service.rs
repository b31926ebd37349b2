use crate::settings::ShortenerSettings;
use crate::worker::{DeleteWorker, WorkerStats};
use async_trait::async_trait;
use burrow_core::{
    DeleteRequest, Insertion, Lookup, Repository, ShortCode, Shortened, Shortener,
    ShortenerError, UrlRecord,
};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// The `Shortener` facade over a single repository backend.
///
/// The service owns:
/// - the repository, shared with the delete worker
/// - the delete worker that applies soft deletes in the background
///
/// Creates and lookups go straight to the repository and storage errors
/// are returned as they are; there are no retries at this layer.
#[derive(Debug)]
pub struct ShortenerService<R> {
    repository: Arc<R>,
    worker: DeleteWorker,
}

impl<R: Repository> ShortenerService<R> {
    /// Wraps `repository` and spawns the delete worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(repository: R, settings: ShortenerSettings) -> Self {
        Self::start_shared(Arc::new(repository), settings)
    }

    /// Like [`start`](Self::start) for a repository the caller keeps a
    /// handle to, e.g. to drive journal checkpoints.
    pub fn start_shared(repository: Arc<R>, settings: ShortenerSettings) -> Self {
        let worker = DeleteWorker::spawn(Arc::clone(&repository), settings.delete_queue_capacity);
        info!("shortener service started");
        Self { repository, worker }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn worker(&self) -> &DeleteWorker {
        &self.worker
    }

    pub fn worker_stats(&self) -> &WorkerStats {
        self.worker.stats()
    }

    /// Stops the delete worker, then closes the repository.
    ///
    /// Deletes still queued at this point are discarded.
    pub async fn shutdown(&self) -> Result<(), ShortenerError> {
        self.worker.stop().await;
        self.repository.close().await?;
        info!("shortener service stopped");
        Ok(())
    }
}

#[async_trait]
impl<R: Repository> Shortener for ShortenerService<R> {
    async fn shorten(&self, owner_id: &str, original_url: &str) -> Result<Shortened, ShortenerError> {
        let shortened = match self.repository.create(owner_id, original_url).await? {
            Insertion::Created(code) => Shortened::Created(code),
            Insertion::Existing(code) => Shortened::Conflict(code),
        };
        debug!(owner = owner_id, code = %shortened.code(), conflict = shortened.is_conflict(), "shortened url");
        Ok(shortened)
    }

    async fn resolve(&self, code: &ShortCode) -> Result<Lookup, ShortenerError> {
        trace!(code = %code, "resolving short code");
        Ok(self.repository.get(code).await?)
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<UrlRecord>, ShortenerError> {
        Ok(self.repository.list_by_owner(owner_id).await?)
    }

    async fn delete(&self, owner_id: &str, codes: Vec<ShortCode>) -> Result<(), ShortenerError> {
        if codes.is_empty() {
            return Ok(());
        }

        debug!(owner = owner_id, codes = codes.len(), "queueing delete request");
        self.worker
            .enqueue(DeleteRequest {
                owner_id: owner_id.to_string(),
                codes,
            })
            .await
    }

    async fn ping(&self) -> Result<(), ShortenerError> {
        Ok(self.repository.ping().await?)
    }
}
