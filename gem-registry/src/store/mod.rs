//! Namespace-partitioned metadata store backed by a single SQLite file.
//!
//! Package version lists are kept as one JSON document per `(namespace, name)`
//! row so a save or delete is a single read-modify-write. All access goes
//! through one connection behind a mutex, and writes run in `IMMEDIATE`
//! transactions, so two writers can never interleave on the same name.

mod gems;
mod users;

pub use gems::{PackageVersion, StoredDependency};
pub use users::{Role, User, UserKind};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};

pub const DB_FILE: &str = "gemfast.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS gems (
    namespace TEXT NOT NULL,
    name TEXT NOT NULL,
    versions TEXT NOT NULL,
    PRIMARY KEY (namespace, name)
);
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY,
    record TEXT NOT NULL
);
"#;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
    pub packages: u64,
    pub versions: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub size_bytes: u64,
    pub users: u64,
    pub namespaces: BTreeMap<String, NamespaceStats>,
}

pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    /// Open (or create) `<db_dir>/gemfast.db`.
    pub fn open_dir(db_dir: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(db_dir)?;
        Self::open(&db_dir.join(DB_FILE))
    }

    pub fn open(path: &Path) -> AppResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
        debug!(journal_mode = %mode, "configured metadata store");
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "opened metadata store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::InternalError("metadata store lock poisoned".to_string()))
    }

    pub fn stats(&self) -> AppResult<StoreStats> {
        let conn = self.conn()?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
        let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;

        let mut namespaces = BTreeMap::new();
        let mut stmt = conn.prepare("SELECT namespace, name, versions FROM gems")?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
        })?;
        for row in rows {
            let (namespace, name, raw) = row?;
            let list = gems::decode(&namespace, &name, &raw)?;
            let entry: &mut NamespaceStats = namespaces.entry(namespace).or_default();
            entry.packages += 1;
            entry.versions += list.len() as u64;
        }

        let stats = StoreStats {
            size_bytes: (page_count * page_size).max(0) as u64,
            users: users.max(0) as u64,
            namespaces,
        };
        debug!(?stats, "computed store stats");
        Ok(stats)
    }

    /// Row count per namespace without decoding version lists.
    pub fn package_count(&self, namespace: &str) -> AppResult<u64> {
        let conn = self.conn()?;
        let count: Option<i64> = conn
            .query_row(
                "SELECT COUNT(*) FROM gems WHERE namespace = ?1",
                [namespace],
                |r| r.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_schema_and_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let store = MetadataStore::open_dir(dir.path()).unwrap();
            assert_eq!(store.package_count("private").unwrap(), 0);
        }
        assert!(dir.path().join(DB_FILE).exists());
        let store = MetadataStore::open_dir(dir.path()).unwrap();
        assert_eq!(store.stats().unwrap().users, 0);
    }

    #[test]
    fn test_stats_counts_per_namespace() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open_dir(dir.path()).unwrap();
        store
            .save("private", PackageVersion::bare("foo", "1.0.0", "ruby"))
            .unwrap();
        store
            .save("private", PackageVersion::bare("foo", "1.0.1", "ruby"))
            .unwrap();
        store
            .save("rubygems.org", PackageVersion::bare("rack", "3.0.0", "ruby"))
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(
            stats.namespaces["private"],
            NamespaceStats {
                packages: 1,
                versions: 2
            }
        );
        assert_eq!(stats.namespaces["rubygems.org"].versions, 1);
        assert!(stats.size_bytes > 0);
    }
}
