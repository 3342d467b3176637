use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::Indexer;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexJob {
    pub namespace: String,
    pub archive: PathBuf,
}

/// Background index refresh for archives that were stored without waiting
/// on the indexer, such as mirror downloads.
///
/// Delivery is at least once: a failed job is retried once, before the next
/// job is taken. The index is eventually consistent with the store.
#[derive(Clone)]
pub struct ReindexQueue {
    tx: mpsc::UnboundedSender<ReindexJob>,
}

impl ReindexQueue {
    pub fn spawn(indexer: Arc<Indexer>, shutdown: broadcast::Receiver<()>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(indexer, rx, shutdown));
        (Self { tx }, handle)
    }

    pub fn enqueue(&self, namespace: &str, archive: PathBuf) {
        let job = ReindexJob {
            namespace: namespace.to_string(),
            archive,
        };
        debug!(namespace = %job.namespace, archive = %job.archive.display(), "queued reindex");
        if let Err(e) = self.tx.send(job) {
            warn!(archive = %e.0.archive.display(), "reindex worker stopped; job dropped");
        }
    }
}

async fn run_worker(
    indexer: Arc<Indexer>,
    mut rx: mpsc::UnboundedReceiver<ReindexJob>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut retry: Option<ReindexJob> = None;
    loop {
        if let Some(job) = retry.take() {
            if let Err(e) = process(&indexer, job.clone()).await {
                error!(namespace = %job.namespace, archive = %job.archive.display(), error = %e, "reindex retry failed; giving up");
            }
        }

        tokio::select! {
            job = rx.recv() => {
                let Some(job) = job else {
                    debug!("reindex queue closed");
                    break;
                };
                if let Err(e) = process(&indexer, job.clone()).await {
                    warn!(namespace = %job.namespace, archive = %job.archive.display(), error = %e, "reindex failed; will retry");
                    retry = Some(job);
                }
            }
            _ = shutdown.recv() => {
                info!("reindex worker received shutdown signal");
                break;
            }
        }
    }
}

async fn process(indexer: &Arc<Indexer>, job: ReindexJob) -> AppResult<()> {
    let indexer = Arc::clone(indexer);
    match tokio::task::spawn_blocking(move || indexer.add_to_index(&job.namespace, &job.archive)).await {
        Ok(Ok(meta)) => {
            debug!(gem = %meta.full_name, "reindex complete");
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(e) => Err(AppError::InternalError(format!("reindex task panicked: {e}"))),
    }
}
