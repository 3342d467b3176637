use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::MetadataStore;
use crate::compact_index::info_checksum;
use crate::error::{AppError, AppResult};
use crate::spec::{PackageMetadata, DEFAULT_PLATFORM};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDependency {
    pub name: String,
    /// `runtime`, `development`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// `&`-joined `"op version"` pairs.
    pub version_constraints: String,
}

impl StoredDependency {
    pub fn new(name: &str, kind: &str, version_constraints: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            version_constraints: version_constraints.to_string(),
        }
    }

    pub fn is_runtime(&self) -> bool {
        self.kind == "runtime"
    }
}

/// One published version of a package within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersion {
    pub name: String,
    pub number: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    /// Checksum of the whole list's info block as of the last write.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub info_checksum: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ruby: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rubygems: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<StoredDependency>,
}

impl PackageVersion {
    /// A version with no checksum, constraints or dependencies.
    pub fn bare(name: &str, number: &str, platform: &str) -> Self {
        Self {
            name: name.to_string(),
            number: number.to_string(),
            platform: platform.to_string(),
            checksum: String::new(),
            info_checksum: String::new(),
            ruby: String::new(),
            rubygems: String::new(),
            dependencies: Vec::new(),
        }
    }

    fn same_release(&self, number: &str, platform: &str) -> bool {
        self.number == number && self.platform == platform
    }
}

impl From<&PackageMetadata> for PackageVersion {
    fn from(meta: &PackageMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            number: meta.version.clone(),
            platform: meta.original_platform.clone(),
            checksum: meta.checksum.clone(),
            info_checksum: String::new(),
            ruby: meta.ruby_constraint(),
            rubygems: meta.rubygems_constraint(),
            dependencies: meta
                .dependencies
                .iter()
                .map(|d| StoredDependency::new(&d.name, &d.kind, &d.constraint_string()))
                .collect(),
        }
    }
}

pub(super) fn decode(namespace: &str, name: &str, raw: &str) -> AppResult<Vec<PackageVersion>> {
    serde_json::from_str(raw).map_err(|e| {
        error!(namespace = %namespace, name = %name, error = %e, "stored version list does not deserialize");
        AppError::StoreCorruption {
            namespace: namespace.to_string(),
            key: name.to_string(),
            reason: e.to_string(),
        }
    })
}

fn load(conn: &Connection, namespace: &str, name: &str) -> AppResult<Vec<PackageVersion>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT versions FROM gems WHERE namespace = ?1 AND name = ?2",
            params![namespace, name],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => decode(namespace, name, &raw),
        None => Ok(Vec::new()),
    }
}

fn stamp_checksum(list: &mut [PackageVersion]) {
    let checksum = info_checksum(list);
    for v in list.iter_mut() {
        v.info_checksum = checksum.clone();
    }
}

fn normalize_platform(platform: &str) -> &str {
    if platform.is_empty() {
        DEFAULT_PLATFORM
    } else {
        platform
    }
}

impl MetadataStore {
    /// Append `version` to its name's list unless the `(number, platform)`
    /// pair is already there. Returns whether anything was written.
    pub fn save(&self, namespace: &str, mut version: PackageVersion) -> AppResult<bool> {
        version.platform = normalize_platform(&version.platform).to_string();

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut list = load(&tx, namespace, &version.name)?;
        if list
            .iter()
            .any(|v| v.same_release(&version.number, &version.platform))
        {
            debug!(namespace = %namespace, name = %version.name, number = %version.number, "version already stored");
            return Ok(false);
        }

        let name = version.name.clone();
        list.push(version);
        stamp_checksum(&mut list);
        tx.execute(
            "INSERT INTO gems (namespace, name, versions) VALUES (?1, ?2, ?3)
             ON CONFLICT(namespace, name) DO UPDATE SET versions = excluded.versions",
            params![namespace, name, serde_json::to_string(&list)?],
        )?;
        tx.commit()?;
        info!(namespace = %namespace, name = %name, versions = list.len(), "saved package version");
        Ok(true)
    }

    pub fn save_metadata(&self, namespace: &str, meta: &PackageMetadata) -> AppResult<bool> {
        self.save(namespace, PackageVersion::from(meta))
    }

    /// The stored list for `name`, empty when unknown.
    pub fn get_versions(&self, namespace: &str, name: &str) -> AppResult<Vec<PackageVersion>> {
        let conn = self.conn()?;
        load(&conn, namespace, name)
    }

    /// Every version list in the namespace, ordered by name.
    pub fn get_all(&self, namespace: &str) -> AppResult<Vec<Vec<PackageVersion>>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT name, versions FROM gems WHERE namespace = ?1 ORDER BY name")?;
        let rows = stmt.query_map([namespace], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        let mut all = Vec::new();
        for row in rows {
            let (name, raw) = row?;
            all.push(decode(namespace, &name, &raw)?);
        }
        Ok(all)
    }

    /// Remove every entry matching `(number, platform)`; an empty platform
    /// means the default one. Returns how many were removed.
    pub fn delete(
        &self,
        namespace: &str,
        name: &str,
        number: &str,
        platform: &str,
    ) -> AppResult<usize> {
        let platform = normalize_platform(platform);
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut list = load(&tx, namespace, name)?;
        let before = list.len();
        list.retain(|v| !v.same_release(number, platform));
        let removed = before - list.len();
        if removed == 0 {
            return Ok(0);
        }

        if list.is_empty() {
            tx.execute(
                "DELETE FROM gems WHERE namespace = ?1 AND name = ?2",
                params![namespace, name],
            )?;
        } else {
            stamp_checksum(&mut list);
            tx.execute(
                "UPDATE gems SET versions = ?3 WHERE namespace = ?1 AND name = ?2",
                params![namespace, name, serde_json::to_string(&list)?],
            )?;
        }
        tx.commit()?;
        info!(namespace = %namespace, name = %name, number = %number, platform = %platform, removed, "deleted package version");
        Ok(removed)
    }

    pub fn names(&self, namespace: &str) -> AppResult<Vec<String>> {
        self.query_names(
            "SELECT name FROM gems WHERE namespace = ?1 ORDER BY name",
            namespace,
            None,
        )
    }

    /// Names containing `needle`, case-sensitive.
    pub fn search(&self, namespace: &str, needle: &str) -> AppResult<Vec<String>> {
        self.query_names(
            "SELECT name FROM gems WHERE namespace = ?1 AND instr(name, ?2) > 0 ORDER BY name",
            namespace,
            Some(needle),
        )
    }

    pub fn prefix_scan(&self, namespace: &str, prefix: &str) -> AppResult<Vec<String>> {
        self.query_names(
            "SELECT name FROM gems WHERE namespace = ?1 AND substr(name, 1, length(?2)) = ?2 ORDER BY name",
            namespace,
            Some(prefix),
        )
    }

    fn query_names(&self, sql: &str, namespace: &str, arg: Option<&str>) -> AppResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let names = match arg {
            Some(arg) => stmt
                .query_map(params![namespace, arg], |r| r.get(0))?
                .collect::<Result<Vec<String>, _>>()?,
            None => stmt
                .query_map(params![namespace], |r| r.get(0))?
                .collect::<Result<Vec<String>, _>>()?,
        };
        Ok(names)
    }
}
