//! Pull-through cache for an upstream gem registry.
//!
//! A request for `/gems/<file>` or `/quick/Marshal.4.8/<file>` passes the
//! content filter, then the CVE gate, then is served from the local copy or
//! fetched from upstream. Downloaded archives are recorded in the store
//! immediately and indexed in the background through the [`ReindexQueue`].

mod inflight;

pub use inflight::{InFlight, InFlightGuard};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::advisory::{blocking, AdvisoryLookup, Severity};
use crate::error::{AppError, AppResult};
use crate::filter::Filter;
use crate::indexer::{Indexer, ReindexQueue, QUICK_MARSHAL_DIR};
use crate::spec::{self, split_file_stem};
use crate::storage::{gem_path, is_cached, remove_if_exists, validate_file_name};
use crate::store::MetadataStore;
use crate::upstream::UpstreamClient;

const GEM_SUFFIX: &str = ".gem";
const GEMSPEC_SUFFIX: &str = ".gemspec.rz";

/// Which upstream artifact a request names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Artifact {
    Gem,
    Gemspec,
}

impl Artifact {
    fn suffix(self) -> &'static str {
        match self {
            Artifact::Gem => GEM_SUFFIX,
            Artifact::Gemspec => GEMSPEC_SUFFIX,
        }
    }

    fn noun(self) -> &'static str {
        match self {
            Artifact::Gem => "gem",
            Artifact::Gemspec => "gemspec",
        }
    }
}

pub struct MirrorCache {
    namespace: String,
    store: Arc<MetadataStore>,
    indexer: Arc<Indexer>,
    reindex: ReindexQueue,
    filter: Arc<Filter>,
    advisories: Arc<dyn AdvisoryLookup>,
    /// `None` disables the CVE gate.
    ceiling: Option<Severity>,
    upstream: UpstreamClient,
    in_flight: InFlight,
}

impl MirrorCache {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        namespace: String,
        store: Arc<MetadataStore>,
        indexer: Arc<Indexer>,
        reindex: ReindexQueue,
        filter: Arc<Filter>,
        advisories: Arc<dyn AdvisoryLookup>,
        ceiling: Option<Severity>,
        upstream: UpstreamClient,
    ) -> Self {
        Self {
            namespace,
            store,
            indexer,
            reindex,
            filter,
            advisories,
            ceiling,
            upstream,
            in_flight: InFlight::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn upstream(&self) -> &UpstreamClient {
        &self.upstream
    }

    /// Filter first, then advisories. A filtered name never reaches the
    /// advisory lookup.
    fn admit(&self, file_name: &str, artifact: Artifact) -> AppResult<()> {
        if !self.filter.is_allowed(file_name) {
            info!(file = %file_name, "refused by filter");
            return Err(AppError::FilteredOrVulnerable(format!(
                "Refusing to download {} {file_name} due to filter",
                artifact.noun()
            )));
        }

        let Some(ceiling) = self.ceiling else {
            return Ok(());
        };
        let stem = file_name.strip_suffix(artifact.suffix()).unwrap_or(file_name);
        let (name, version) = split_file_stem(stem);
        let blocked = blocking(self.advisories.advisories(&name, &version), ceiling);
        if let Some(worst) = blocked.first() {
            warn!(file = %file_name, advisory = %worst.id(), severity = %worst.severity(), ceiling = %ceiling, "refused by CVE gate");
            return Err(AppError::FilteredOrVulnerable(format!(
                "Refusing to download {} {file_name} due to CVE {} ({} severity): {}",
                artifact.noun(),
                worst.id(),
                worst.severity(),
                worst.url
            )));
        }
        Ok(())
    }

    fn check_name(file_name: &str, artifact: Artifact) -> AppResult<()> {
        validate_file_name(file_name)?;
        if !file_name.ends_with(artifact.suffix()) {
            return Err(AppError::BadRequest(format!(
                "{file_name} is not a {} file",
                artifact.noun()
            )));
        }
        Ok(())
    }

    /// Resolve `/gems/<file_name>` to a local path, fetching it on a miss.
    pub async fn fetch_gem(&self, file_name: &str) -> AppResult<PathBuf> {
        Self::check_name(file_name, Artifact::Gem)?;
        self.admit(file_name, Artifact::Gem)?;

        let dest = gem_path(self.indexer.gem_dir(), &self.namespace, file_name)?;
        if is_cached(&dest).await {
            debug!(file = %file_name, "serving cached gem");
            return Ok(dest);
        }

        let _flight = self.in_flight.acquire(file_name).await;
        if is_cached(&dest).await {
            debug!(file = %file_name, "gem cached by a concurrent request");
            return Ok(dest);
        }

        self.upstream
            .download_to(&format!("gems/{file_name}"), &dest)
            .await?;

        let archive = dest.clone();
        let recorded = tokio::task::spawn_blocking(move || spec::extract(&archive))
            .await
            .map_err(|e| AppError::InternalError(format!("extract task failed: {e}")))?
            .and_then(|meta| self.store.save_metadata(&self.namespace, &meta));
        if let Err(e) = recorded {
            warn!(file = %file_name, error = %e, "discarding downloaded gem that could not be recorded");
            remove_if_exists(&dest)?;
            return Err(e);
        }

        self.reindex.enqueue(&self.namespace, dest.clone());
        Ok(dest)
    }

    /// Resolve `/quick/Marshal.4.8/<file_name>`, fetching it on a miss.
    pub async fn fetch_gemspec(&self, file_name: &str) -> AppResult<PathBuf> {
        Self::check_name(file_name, Artifact::Gemspec)?;
        self.admit(file_name, Artifact::Gemspec)?;

        let dest = self.indexer.gemspec_path(&self.namespace, file_name);
        if is_cached(&dest).await {
            debug!(file = %file_name, "serving cached gemspec");
            return Ok(dest);
        }

        let _flight = self.in_flight.acquire(file_name).await;
        if !is_cached(&dest).await {
            self.upstream
                .download_to(&format!("{QUICK_MARSHAL_DIR}/{file_name}"), &dest)
                .await?;
        }
        Ok(dest)
    }

    /// Upstream location for index endpoints the mirror does not serve itself.
    pub fn redirect_url(&self, path_and_query: &str) -> AppResult<String> {
        Ok(self.upstream.url_for(path_and_query)?.to_string())
    }
}
