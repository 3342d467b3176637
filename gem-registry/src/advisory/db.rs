use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use git2::{build::CheckoutBuilder, Repository};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::{Advisory, AdvisoryLookup};
use crate::error::{AppError, AppResult};
use crate::version::GemVersion;

type Index = HashMap<String, Vec<Advisory>>;

/// Advisory cache built from a local ruby-advisory-db checkout.
///
/// Readers always see a complete snapshot: a refresh builds a new index and
/// swaps it in with one pointer store.
pub struct AdvisoryDb {
    dir: PathBuf,
    url: String,
    index: RwLock<Arc<Index>>,
}

impl AdvisoryDb {
    pub fn new(dir: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            url: url.into(),
            index: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot(&self) -> Arc<Index> {
        match self.index.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn swap(&self, next: Index) {
        let next = Arc::new(next);
        match self.index.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Number of gems with at least one advisory.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Update the checkout, then rebuild the cache from it. A failed update
    /// is logged and the existing checkout is still walked.
    ///
    /// Blocking; run it on a blocking thread.
    pub fn refresh(&self) -> AppResult<usize> {
        if let Err(e) = self.update_repo() {
            warn!(dir = %self.dir.display(), error = %e, "failed to update advisory database checkout");
        }
        self.reload()
    }

    /// Rebuild the cache from the checkout on disk without touching git.
    pub fn reload(&self) -> AppResult<usize> {
        let index = load_index(&self.dir.join("gems"))?;
        let count = index.values().map(Vec::len).sum();
        self.swap(index);
        info!(dir = %self.dir.display(), advisories = count, "cached advisory database");
        Ok(count)
    }

    fn update_repo(&self) -> AppResult<()> {
        if !self.dir.join(".git").exists() {
            info!(url = %self.url, dir = %self.dir.display(), "cloning advisory database");
            if let Some(parent) = self.dir.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Repository::clone(&self.url, &self.dir)?;
            return Ok(());
        }

        let repo = Repository::open(&self.dir)?;
        let mut remote = repo.find_remote("origin")?;
        remote.fetch(&[] as &[&str], None, None)?;

        let fetch_head = repo.find_reference("FETCH_HEAD")?;
        let incoming = repo.reference_to_annotated_commit(&fetch_head)?;
        let (analysis, _) = repo.merge_analysis(&[&incoming])?;
        if analysis.is_up_to_date() {
            debug!("advisory database already up to date");
            return Ok(());
        }
        if !analysis.is_fast_forward() {
            return Err(AppError::InternalError(
                "advisory database checkout has diverged from origin".to_string(),
            ));
        }

        let head = repo.head()?;
        let refname = head
            .name()
            .map(str::to_string)
            .ok_or_else(|| AppError::InternalError("advisory HEAD is not a named ref".to_string()))?;
        let mut reference = repo.find_reference(&refname)?;
        reference.set_target(incoming.id(), "fast-forward advisory database")?;
        repo.set_head(&refname)?;
        repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
        info!(commit = %incoming.id(), "advisory database fast-forwarded");
        Ok(())
    }
}

/// Walk `gems/<name>/*.yml`. Unreadable files are skipped with a warning.
fn load_index(gems_dir: &Path) -> AppResult<Index> {
    if !gems_dir.is_dir() {
        return Err(AppError::NotFound(format!(
            "advisory directory {} does not exist",
            gems_dir.display()
        )));
    }

    let mut index: Index = HashMap::new();
    for entry in WalkDir::new(gems_dir).min_depth(2).max_depth(2) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable advisory entry");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|e| e.to_str()) != Some("yml")
        {
            continue;
        }
        let Some(gem) = path
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
        else {
            continue;
        };

        let parsed = std::fs::read_to_string(path)
            .map_err(AppError::from)
            .and_then(|raw| serde_yaml_ng::from_str::<Advisory>(&raw).map_err(AppError::from));
        match parsed {
            Ok(mut advisory) => {
                if advisory.gem.is_empty() {
                    advisory.gem = gem.to_string();
                }
                index.entry(gem.to_string()).or_default().push(advisory);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed advisory"),
        }
    }
    Ok(index)
}

impl AdvisoryLookup for AdvisoryDb {
    fn advisories(&self, name: &str, version: &str) -> Vec<Advisory> {
        let index = self.snapshot();
        let Some(candidates) = index.get(name) else {
            return Vec::new();
        };
        let version = match GemVersion::parse(version) {
            Ok(v) => v,
            Err(e) => {
                warn!(gem = %name, version = %version, error = %e, "cannot check advisories for unparseable version");
                return Vec::new();
            }
        };
        candidates
            .iter()
            .filter(|a| a.affects(&version))
            .cloned()
            .collect()
    }
}

/// Refresh on every tick of `every` until `shutdown` fires. The first tick
/// runs immediately. Failures are logged and retried on the next tick.
pub fn spawn_refresh_task(
    db: Arc<AdvisoryDb>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let db = Arc::clone(&db);
                    match tokio::task::spawn_blocking(move || db.refresh()).await {
                        Ok(Ok(count)) => debug!(advisories = count, "advisory refresh complete"),
                        Ok(Err(e)) => error!(error = %e, "advisory refresh failed"),
                        Err(e) => error!(error = %e, "advisory refresh task panicked"),
                    }
                }
                _ = shutdown.recv() => {
                    debug!("advisory refresh received shutdown signal");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RACK_ADVISORY: &str = r#"---
gem: rack
cve: 2022-30123
ghsa: wq4h-7r42-5hrr
url: https://groups.google.com/g/ruby-security-ann/c/LWB10kWzag8
title: Possible shell escape sequence injection vulnerability in Rack
date: 2022-05-27
description: |
  There is a possible shell escape sequence injection vulnerability in the Lint
  and CommonLogger components of Rack.
cvss_v3: 10.0
patched_versions:
  - "~> 2.0.9, >= 2.0.9.1"
  - "~> 2.1.4, >= 2.1.4.1"
  - ">= 2.2.3.1"
"#;

    fn checkout() -> TempDir {
        let dir = TempDir::new().unwrap();
        let gem_dir = dir.path().join("gems").join("rack");
        std::fs::create_dir_all(&gem_dir).unwrap();
        std::fs::write(gem_dir.join("CVE-2022-30123.yml"), RACK_ADVISORY).unwrap();
        std::fs::write(gem_dir.join("broken.yml"), "cvss_v3: [unterminated").unwrap();
        std::fs::write(gem_dir.join("README.md"), "not an advisory").unwrap();
        dir
    }

    #[test]
    fn test_reload_reads_advisories() {
        let dir = checkout();
        let db = AdvisoryDb::new(dir.path(), "unused");
        assert_eq!(db.reload().unwrap(), 1);
        assert_eq!(db.len(), 1);

        let found = db.advisories("rack", "2.2.3");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "2022-30123");
        assert!(db.advisories("rack", "2.2.3.1").is_empty());
        assert!(db.advisories("sinatra", "1.0.0").is_empty());
    }

    #[test]
    fn test_reload_swaps_whole_index() {
        let dir = checkout();
        let db = AdvisoryDb::new(dir.path(), "unused");
        db.reload().unwrap();

        std::fs::remove_file(dir.path().join("gems/rack/CVE-2022-30123.yml")).unwrap();
        db.reload().unwrap();
        assert!(db.is_empty());
    }

    #[test]
    fn test_missing_checkout_keeps_previous_index() {
        let dir = checkout();
        let db = AdvisoryDb::new(dir.path(), "unused");
        db.reload().unwrap();

        let empty = AdvisoryDb::new(dir.path().join("nope"), "unused");
        assert!(empty.reload().is_err());
        assert_eq!(db.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_task_stops_on_shutdown() {
        let dir = checkout();
        let db = Arc::new(AdvisoryDb::new(dir.path(), "file:///nonexistent/advisories.git"));
        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_refresh_task(Arc::clone(&db), Duration::from_secs(3600), rx);

        // The immediate tick fails the git update but still walks the checkout.
        tokio::time::timeout(Duration::from_secs(10), async {
            while db.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
