//! Background soft-delete worker.
//!
//! Producers push [`DeleteRequest`]s onto a bounded queue and return as soon
//! as the request is accepted. A single consumer task applies the queued
//! requests one at a time, in queue order, on its own task rather than the
//! caller's. While a batch is being applied the queue fills up, so a slow
//! backend pushes back on producers.
//!
//! Delivery is at-most-once: a request whose backend call fails is logged,
//! counted in [`WorkerStats::dropped`] and forgotten. Stopping abandons the
//! batch in flight and discards the queued ones; both are counted the same way.

use burrow_core::{DeleteRequest, Repository, ShortenerError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Result<T> = std::result::Result<T, ShortenerError>;

/// Counters describing what the worker has done so far.
#[derive(Debug, Default)]
pub struct WorkerStats {
    applied: AtomicU64,
    flipped: AtomicU64,
    dropped: AtomicU64,
}

impl WorkerStats {
    /// Requests whose backend call succeeded.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Records actually flipped to deleted across all applied requests.
    pub fn flipped(&self) -> u64 {
        self.flipped.load(Ordering::Relaxed)
    }

    /// Requests lost to a backend failure or discarded on stop.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Requests that reached a final outcome, applied or dropped.
    pub fn processed(&self) -> u64 {
        self.applied() + self.dropped()
    }

    fn record_applied(&self, flipped: u64) {
        self.applied.fetch_add(1, Ordering::Relaxed);
        self.flipped.fetch_add(flipped, Ordering::Relaxed);
    }

    fn record_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }
}

/// Handle to the running delete worker.
#[derive(Debug)]
pub struct DeleteWorker {
    sender: mpsc::Sender<DeleteRequest>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<WorkerStats>,
}

impl DeleteWorker {
    /// Spawns the consumer task on the current Tokio runtime.
    pub fn spawn<R: Repository>(repository: Arc<R>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(WorkerStats::default());

        let task = tokio::spawn(run(repository, receiver, shutdown_rx, Arc::clone(&stats)));
        info!(capacity, "delete worker started");

        Self {
            sender,
            shutdown,
            task: Mutex::new(Some(task)),
            stats,
        }
    }

    /// Queues `request`, waiting for space if the queue is full.
    ///
    /// Dropping the returned future abandons the request.
    pub async fn enqueue(&self, request: DeleteRequest) -> Result<()> {
        self.sender
            .send(request)
            .await
            .map_err(|_| ShortenerError::WorkerStopped)
    }

    /// Queues `request` only if there is room right now.
    pub fn try_enqueue(&self, request: DeleteRequest) -> Result<()> {
        self.sender.try_send(request).map_err(|err| match err {
            TrySendError::Full(_) => ShortenerError::QueueFull,
            TrySendError::Closed(_) => ShortenerError::WorkerStopped,
        })
    }

    /// Queues `request`, giving up with [`ShortenerError::QueueFull`] once
    /// `timeout` elapses.
    pub async fn enqueue_timeout(&self, request: DeleteRequest, timeout: Duration) -> Result<()> {
        self.sender
            .send_timeout(request, timeout)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => ShortenerError::QueueFull,
                SendTimeoutError::Closed(_) => ShortenerError::WorkerStopped,
            })
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn is_stopped(&self) -> bool {
        self.sender.is_closed()
    }

    /// Stops the consumer and waits for it to exit. A batch still being
    /// applied is abandoned; whether the backend saw it is unspecified.
    ///
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };

        let _ = self.shutdown.send(true);
        if let Err(e) = task.await {
            warn!(error = %e, "delete worker task failed");
        }
        info!(
            applied = self.stats.applied(),
            flipped = self.stats.flipped(),
            dropped = self.stats.dropped(),
            "delete worker stopped"
        );
    }
}

async fn run<R: Repository>(
    repository: Arc<R>,
    mut receiver: mpsc::Receiver<DeleteRequest>,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<WorkerStats>,
) {
    loop {
        let request = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            request = receiver.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => {
                warn!(owner = %request.owner_id, codes = request.codes.len(), "abandoning in-flight delete request");
                stats.record_dropped(1);
                break;
            }
            _ = apply(repository.as_ref(), &request, &stats) => {}
        }
    }

    receiver.close();
    let mut discarded = 0;
    while let Ok(request) = receiver.try_recv() {
        warn!(owner = %request.owner_id, codes = request.codes.len(), "discarding queued delete request");
        discarded += 1;
    }
    stats.record_dropped(discarded);
}

async fn apply<R: Repository>(repository: &R, request: &DeleteRequest, stats: &WorkerStats) {
    match repository.delete_batch(&request.owner_id, &request.codes).await {
        Ok(flipped) => {
            debug!(owner = %request.owner_id, requested = request.codes.len(), flipped, "applied delete request");
            stats.record_applied(flipped);
        }
        Err(err) => {
            error!(owner = %request.owner_id, codes = request.codes.len(), error = %err, "dropping delete request");
            stats.record_dropped(1);
        }
    }
}

/// Resolves once the watch channel turns `true` or its sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
