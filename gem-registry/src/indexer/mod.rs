//! Binary spec index generation.
//!
//! Each namespace owns an artifact root under `<dir>/index/<namespace>/`:
//!
//! ```text
//! specs.4.8(.gz)              released versions
//! latest_specs.4.8(.gz)       newest released version per name
//! prerelease_specs.4.8(.gz)   versions containing a letter
//! quick/Marshal.4.8/*.gemspec.rz
//! ```
//!
//! Every artifact is written to a temporary file and renamed into place, so a
//! reader never sees a partially written index.

mod queue;

pub use queue::{ReindexJob, ReindexQueue};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::{AppError, AppResult};
use crate::marshal::{encode_gemspec_rz, encode_specs, IndexEntry};
use crate::spec::{self, full_name, is_prerelease, PackageMetadata, DEFAULT_PLATFORM};
use crate::storage::{gem_path, remove_if_exists, validate_file_name, write_atomic};
use crate::store::{MetadataStore, PackageVersion};
use crate::version::compare_versions;

pub const SPECS: &str = "specs.4.8";
pub const LATEST_SPECS: &str = "latest_specs.4.8";
pub const PRERELEASE_SPECS: &str = "prerelease_specs.4.8";
pub const QUICK_MARSHAL_DIR: &str = "quick/Marshal.4.8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Empty,
    Building,
    Ready,
}

/// Entries split the way the three spec files need them.
#[derive(Debug, Default, PartialEq)]
pub struct Partitions {
    pub released: Vec<IndexEntry>,
    pub prerelease: Vec<IndexEntry>,
    pub latest: Vec<IndexEntry>,
}

/// Split entries into prerelease and released; `latest` keeps the greatest
/// released version of each name.
pub fn partition(mut entries: Vec<IndexEntry>) -> Partitions {
    entries.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| compare_versions(&a.version, &b.version))
            .then_with(|| a.platform.cmp(&b.platform))
    });

    let (prerelease, released): (Vec<_>, Vec<_>) =
        entries.into_iter().partition(|e| is_prerelease(&e.version));

    let mut newest: BTreeMap<&str, &IndexEntry> = BTreeMap::new();
    for entry in &released {
        // Sorted ascending, so the last one seen per name wins.
        newest.insert(entry.name.as_str(), entry);
    }
    let latest = newest.into_values().cloned().collect();

    Partitions {
        released,
        prerelease,
        latest,
    }
}

fn normalized(platform: &str) -> String {
    if platform.is_empty() {
        DEFAULT_PLATFORM.to_string()
    } else {
        platform.to_string()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Stored versions dropped because their archive is gone.
    pub pruned: usize,
}

pub struct Indexer {
    store: Arc<MetadataStore>,
    gem_dir: PathBuf,
    index_dir: PathBuf,
    states: Mutex<HashMap<String, IndexState>>,
    // Serializes artifact writers; full rebuilds must not overlap.
    writer: Mutex<()>,
}

impl Indexer {
    pub fn new(store: Arc<MetadataStore>, gem_dir: PathBuf, index_dir: PathBuf) -> Self {
        Self {
            store,
            gem_dir,
            index_dir,
            states: Mutex::new(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn gem_dir(&self) -> &Path {
        &self.gem_dir
    }

    pub fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.index_dir.join(namespace)
    }

    pub fn artifact_path(&self, namespace: &str, file: &str) -> PathBuf {
        self.namespace_dir(namespace).join(file)
    }

    pub fn gemspec_path(&self, namespace: &str, file: &str) -> PathBuf {
        self.namespace_dir(namespace).join(QUICK_MARSHAL_DIR).join(file)
    }

    pub fn has_artifacts(&self, namespace: &str) -> bool {
        [SPECS, LATEST_SPECS, PRERELEASE_SPECS]
            .iter()
            .all(|f| self.artifact_path(namespace, &format!("{f}.gz")).is_file())
    }

    pub fn state(&self, namespace: &str) -> IndexState {
        let known = self.lock_states().get(namespace).copied();
        known.unwrap_or_else(|| {
            if self.has_artifacts(namespace) {
                IndexState::Ready
            } else {
                IndexState::Empty
            }
        })
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<String, IndexState>> {
        match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_state(&self, namespace: &str, state: IndexState) {
        self.lock_states().insert(namespace.to_string(), state);
    }

    /// Build the namespace's index when any spec artifact is missing.
    pub fn ensure_index(&self, namespace: &str) -> AppResult<Option<RebuildSummary>> {
        if self.has_artifacts(namespace) {
            debug!(namespace = %namespace, "index artifacts present");
            self.set_state(namespace, IndexState::Ready);
            return Ok(None);
        }
        info!(namespace = %namespace, "index artifacts missing, generating");
        self.generate_index(namespace).map(Some)
    }

    /// Full rebuild: extract every archive under `<gem_dir>/<namespace>`,
    /// record it, write its gemspec, drop stored versions with no readable
    /// archive, then rewrite the spec files.
    ///
    /// A corrupt archive is logged and skipped; empty files are skipped
    /// without being opened. Blocking.
    pub fn generate_index(&self, namespace: &str) -> AppResult<RebuildSummary> {
        validate_file_name(namespace)?;
        let _writer = self.lock_writer();
        let previous = self.state(namespace);
        self.set_state(namespace, IndexState::Building);

        match self.rebuild(namespace) {
            Ok(summary) => {
                self.set_state(namespace, IndexState::Ready);
                info!(namespace = %namespace, indexed = summary.indexed, skipped = summary.skipped, failed = summary.failed, pruned = summary.pruned, "index generated");
                Ok(summary)
            }
            Err(e) => {
                let restored = match previous {
                    IndexState::Building => IndexState::Empty,
                    other => other,
                };
                self.set_state(namespace, restored);
                error!(namespace = %namespace, error = %e, "index generation failed");
                Err(e)
            }
        }
    }

    fn rebuild(&self, namespace: &str) -> AppResult<RebuildSummary> {
        let mut summary = RebuildSummary::default();
        let mut on_disk: HashSet<(String, String, String)> = HashSet::new();
        for path in self.archives(namespace) {
            match std::fs::metadata(&path) {
                Ok(meta) if meta.len() == 0 => {
                    debug!(gem = %path.display(), "skipping zero-length archive");
                    summary.skipped += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(gem = %path.display(), error = %e, "cannot stat archive");
                    summary.failed += 1;
                    continue;
                }
            }
            let meta = match spec::extract(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(gem = %path.display(), error = %e, "skipping unreadable archive");
                    summary.failed += 1;
                    continue;
                }
            };
            self.store.save_metadata(namespace, &meta)?;
            self.write_gemspec(namespace, &meta)?;
            let record = PackageVersion::from(&meta);
            on_disk.insert((record.name, record.number, normalized(&record.platform)));
            summary.indexed += 1;
        }
        summary.pruned = self.prune(namespace, &on_disk)?;
        self.write_partitions(namespace)?;
        Ok(summary)
    }

    /// Delete stored versions whose `(name, number, platform)` is not in
    /// `keep`, along with their gemspecs.
    fn prune(&self, namespace: &str, keep: &HashSet<(String, String, String)>) -> AppResult<usize> {
        let mut pruned = 0;
        for version in self.store.get_all(namespace)?.into_iter().flatten() {
            let platform = normalized(&version.platform);
            let key = (version.name.clone(), version.number.clone(), platform.clone());
            if keep.contains(&key) {
                continue;
            }
            let stem = full_name(&version.name, &version.number, &platform);
            warn!(namespace = %namespace, gem = %stem, "archive missing, dropping stored version");
            pruned += self
                .store
                .delete(namespace, &version.name, &version.number, &platform)?;
            remove_if_exists(&self.gemspec_path(namespace, &format!("{stem}.gemspec.rz")))?;
        }
        Ok(pruned)
    }

    fn archives(&self, namespace: &str) -> Vec<PathBuf> {
        let root = self.gem_dir.join(namespace);
        if !root.is_dir() {
            return Vec::new();
        }
        let mut archives: Vec<PathBuf> = WalkDir::new(&root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable path under gem dir");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension().is_some_and(|ext| ext == "gem")
                    && p.file_name().is_some_and(|n| n != ".gem")
            })
            .collect();
        archives.sort();
        archives
    }

    fn write_gemspec(&self, namespace: &str, meta: &PackageMetadata) -> AppResult<()> {
        let path = self.gemspec_path(namespace, &meta.gemspec_file_name());
        write_atomic(&path, &encode_gemspec_rz(meta)?)
    }

    /// Rewrite the three spec files and their gzip copies from the store.
    fn write_partitions(&self, namespace: &str) -> AppResult<()> {
        let entries: Vec<IndexEntry> = self
            .store
            .get_all(namespace)?
            .iter()
            .flatten()
            .map(IndexEntry::from)
            .collect();
        let parts = partition(entries);

        for (file, entries) in [
            (SPECS, &parts.released),
            (LATEST_SPECS, &parts.latest),
            (PRERELEASE_SPECS, &parts.prerelease),
        ] {
            let raw = encode_specs(entries)?;
            let mut gz = GzEncoder::new(Vec::new(), Compression::default());
            gz.write_all(&raw)?;
            let compressed = gz.finish()?;

            write_atomic(&self.artifact_path(namespace, file), &raw)?;
            write_atomic(&self.artifact_path(namespace, &format!("{file}.gz")), &compressed)?;
            debug!(namespace = %namespace, file, entries = entries.len(), "wrote spec index");
        }
        Ok(())
    }

    /// Record one archive and refresh the namespace's artifacts. Blocking.
    pub fn add_to_index(&self, namespace: &str, archive: &Path) -> AppResult<PackageMetadata> {
        let meta = spec::extract(archive)?;
        let _writer = self.lock_writer();
        self.store.save_metadata(namespace, &meta)?;
        self.write_gemspec(namespace, &meta)?;
        self.write_partitions(namespace)?;
        self.set_state(namespace, IndexState::Ready);
        info!(namespace = %namespace, gem = %meta.full_name, "added to index");
        Ok(meta)
    }

    /// Delete a version's record, archive and gemspec, then refresh the
    /// artifacts. Returns the removed-record count; 0 means nothing matched.
    pub fn remove_from_index(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
        platform: &str,
    ) -> AppResult<usize> {
        let stem = full_name(name, version, platform);
        let archive = gem_path(&self.gem_dir, namespace, &format!("{stem}.gem"))?;
        let gemspec = self.gemspec_path(namespace, &format!("{stem}.gemspec.rz"));

        let _writer = self.lock_writer();
        let removed = self.store.delete(namespace, name, version, platform)?;
        if removed == 0 {
            return Ok(0);
        }

        if !remove_if_exists(&archive)? {
            warn!(gem = %archive.display(), "yanked version had no archive on disk");
        }
        remove_if_exists(&gemspec)?;

        self.write_partitions(namespace)?;
        self.set_state(namespace, IndexState::Ready);
        info!(namespace = %namespace, gem = %stem, removed, "removed from index");
        Ok(removed)
    }

    /// Namespaces that have archives on disk.
    pub fn namespaces(&self) -> AppResult<Vec<String>> {
        if !self.gem_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.gem_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name().into_string().map_err(|n| {
                    AppError::InternalError(format!("non UTF-8 namespace directory {n:?}"))
                })?;
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
