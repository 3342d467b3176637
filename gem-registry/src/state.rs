//! # Application State
//!
//! [`AppState`] owns every long-lived component the handlers share: the
//! metadata store, the indexer and its background queue, and the optional
//! mirror. Components are built once here and passed by `Arc`; nothing is a
//! process-wide global.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::advisory::AdvisoryLookup;
use crate::config::Config;
use crate::error::AppResult;
use crate::filter::Filter;
use crate::indexer::{Indexer, ReindexQueue};
use crate::mirror::MirrorCache;
use crate::store::MetadataStore;
use crate::upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<MetadataStore>,
    pub indexer: Arc<Indexer>,
    pub reindex: ReindexQueue,
    /// Present when mirroring is enabled.
    pub mirror: Option<Arc<MirrorCache>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Open the store and wire up the indexer, reindex worker and mirror.
    ///
    /// Must run inside a tokio runtime; the reindex worker is spawned here and
    /// stops when `shutdown` fires.
    pub fn new(
        config: Config,
        advisories: Arc<dyn AdvisoryLookup>,
        shutdown: broadcast::Receiver<()>,
    ) -> AppResult<(Self, JoinHandle<()>)> {
        config.validate()?;
        let store = Arc::new(MetadataStore::open_dir(&config.db_dir())?);
        let indexer = Arc::new(Indexer::new(
            Arc::clone(&store),
            config.gem_dir(),
            config.index_dir(),
        ));
        let (reindex, worker) = ReindexQueue::spawn(Arc::clone(&indexer), shutdown);

        let mirror = if config.mirror.enabled {
            let filter = Arc::new(Filter::from_config(&config.filter)?);
            let ceiling = if config.cve.enabled {
                Some(config.max_severity()?)
            } else {
                None
            };
            let upstream = UpstreamClient::new(&config.mirror.upstream, config.mirror_timeout())?;
            let namespace = config.mirror_namespace()?;
            info!(upstream = %config.mirror.upstream, namespace = %namespace, cve_ceiling = ?ceiling, "mirror enabled");
            Some(Arc::new(MirrorCache::new(
                namespace,
                Arc::clone(&store),
                Arc::clone(&indexer),
                reindex.clone(),
                filter,
                advisories,
                ceiling,
                upstream,
            )))
        } else {
            info!("mirror disabled");
            None
        };

        let state = Self {
            config: Arc::new(config),
            store,
            indexer,
            reindex,
            mirror,
            started_at: Utc::now(),
        };
        Ok((state, worker))
    }

    pub fn private_namespace(&self) -> &str {
        &self.config.private_namespace
    }
}

/// Uniform body for operations that return no data.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub message: String,
}
