//! Compact index projections (`/names`, `/versions`, `/info/:name`).
//!
//! Every function here is a pure function of stored [`PackageVersion`] lists
//! apart from the `created_at` stamp on `/versions`.

use chrono::{DateTime, SecondsFormat, Utc};
use md5::{Digest, Md5};

use crate::error::AppResult;
use crate::spec::DEFAULT_PLATFORM;
use crate::store::{MetadataStore, PackageVersion};

pub const HEADER: &str = "---";
/// Constraint value meaning "anything goes"; never written to info lines.
const UNCONSTRAINED: &str = ">= 0";

fn info_line(v: &PackageVersion) -> String {
    let mut line = if v.platform.is_empty() || v.platform == DEFAULT_PLATFORM {
        v.number.clone()
    } else {
        format!("{}-{}", v.number, v.platform)
    };
    line.push(' ');
    let deps: Vec<String> = v
        .dependencies
        .iter()
        .filter(|d| d.is_runtime())
        .map(|d| format!("{}:{}", d.name, d.version_constraints))
        .collect();
    line.push_str(&deps.join(","));
    line.push_str("|checksum:");
    line.push_str(&v.checksum);
    if !v.ruby.is_empty() && v.ruby != UNCONSTRAINED {
        line.push_str(",ruby:");
        line.push_str(&v.ruby);
    }
    if !v.rubygems.is_empty() && v.rubygems != UNCONSTRAINED {
        line.push_str(",rubygems:");
        line.push_str(&v.rubygems);
    }
    line
}

/// The `/info/:name` body for one version list.
pub fn info(versions: &[PackageVersion]) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(versions.len() + 1);
    lines.push(HEADER.to_string());
    lines.extend(versions.iter().map(info_line));
    lines.sort();
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Hex MD5 of [`info`].
pub fn info_checksum(versions: &[PackageVersion]) -> String {
    hex_md5(info(versions).as_bytes())
}

pub fn hex_md5(bytes: &[u8]) -> String {
    format!("{:x}", Md5::digest(bytes))
}

/// `/names`: the header then every name, sorted and unique.
pub fn names(mut names: Vec<String>) -> String {
    names.sort();
    names.dedup();
    let mut out = String::from(HEADER);
    out.push('\n');
    for name in names {
        out.push_str(&name);
        out.push('\n');
    }
    out
}

/// `/versions`: one line per name with its versions in insertion order and
/// the current info checksum.
pub fn versions(all: &[Vec<PackageVersion>], created_at: DateTime<Utc>) -> String {
    let mut rows: Vec<(&str, Vec<&str>, &str)> = all
        .iter()
        .filter_map(|list| {
            let last = list.last()?;
            let numbers = list.iter().map(|v| v.number.as_str()).collect();
            Some((last.name.as_str(), numbers, last.info_checksum.as_str()))
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));

    let mut out = format!(
        "created_at: {}\n{HEADER}\n",
        created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    for (name, numbers, checksum) in rows {
        out.push_str(&format!("{name} {} {checksum}\n", numbers.join(",")));
    }
    out
}

/// Store-backed generator for one namespace.
pub struct CompactIndex<'a> {
    store: &'a MetadataStore,
    namespace: &'a str,
}

impl<'a> CompactIndex<'a> {
    pub fn new(store: &'a MetadataStore, namespace: &'a str) -> Self {
        Self { store, namespace }
    }

    pub fn names(&self) -> AppResult<String> {
        Ok(names(self.store.names(self.namespace)?))
    }

    pub fn versions(&self) -> AppResult<String> {
        Ok(versions(&self.store.get_all(self.namespace)?, Utc::now()))
    }

    /// `None` when the name has no versions in this namespace.
    pub fn info(&self, name: &str) -> AppResult<Option<String>> {
        let list = self.store.get_versions(self.namespace, name)?;
        if list.is_empty() {
            return Ok(None);
        }
        Ok(Some(info(&list)))
    }
}
