//! Gem archive metadata extraction.
//!
//! A `.gem` file is an uncompressed tar holding `metadata.gz`, a gzipped YAML
//! dump of the `Gem::Specification`. [`extract`] turns an archive on disk into
//! a [`PackageMetadata`] with every loosely-typed field already normalized.

mod archive;
mod metadata;

pub use archive::{extract, extract_bytes};
pub use metadata::parse_metadata;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PLATFORM: &str = "ruby";

/// One `(operator, version)` pair of a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConstraint {
    pub operator: String,
    pub version: String,
}

impl VersionConstraint {
    pub fn new(operator: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            version: version.into(),
        }
    }
}

/// Join constraints as `"op version"` strings, sorted, separated by `&`.
pub fn join_constraints(constraints: &[VersionConstraint]) -> String {
    let mut parts: Vec<String> = constraints
        .iter()
        .map(|c| format!("{} {}", c.operator, c.version))
        .collect();
    parts.sort();
    parts.join("&")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecDependency {
    pub name: String,
    /// `runtime`, `development`, ... with the YAML symbol colon stripped.
    pub kind: String,
    pub prerelease: bool,
    pub requirement: Vec<VersionConstraint>,
}

impl SpecDependency {
    pub fn is_runtime(&self) -> bool {
        self.kind == "runtime"
    }

    pub fn constraint_string(&self) -> String {
        join_constraints(&self.requirement)
    }
}

/// Metadata extracted from an uploaded archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Archive file name without the `.gem` extension.
    pub original_name: String,
    pub original_platform: String,
    /// `name-version[-platform]`
    pub full_name: String,
    pub name: String,
    pub version: String,
    pub prerelease: bool,
    pub authors: Vec<String>,
    pub emails: Vec<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub spec_version: Option<i64>,
    pub require_paths: Vec<String>,
    pub licenses: Vec<String>,
    pub rubygems_version: Option<String>,
    pub dependencies: Vec<SpecDependency>,
    pub required_ruby_version: Vec<VersionConstraint>,
    pub required_rubygems_version: Vec<VersionConstraint>,
    /// Hex sha256 of the archive bytes.
    pub checksum: String,
}

impl PackageMetadata {
    /// Joined `required_ruby_version`, empty when unconstrained.
    pub fn ruby_constraint(&self) -> String {
        join_constraints(&self.required_ruby_version)
    }

    pub fn rubygems_constraint(&self) -> String {
        join_constraints(&self.required_rubygems_version)
    }

    pub fn file_name(&self) -> String {
        format!("{}.gem", self.full_name)
    }

    pub fn gemspec_file_name(&self) -> String {
        format!("{}.gemspec.rz", self.full_name)
    }
}

/// `name-version` for the default platform, `name-version-platform` otherwise.
pub fn full_name(name: &str, version: &str, platform: &str) -> String {
    if platform.is_empty() || platform == DEFAULT_PLATFORM {
        format!("{name}-{version}")
    } else {
        format!("{name}-{version}-{platform}")
    }
}

/// A version with any alphabetic character is a prerelease.
pub fn is_prerelease(version: &str) -> bool {
    version.chars().any(|c| c.is_ascii_alphabetic())
}

/// Split a requested file stem into `(name, version)` on the last `-`.
///
/// Platform suffixes are not recognised, which matches how mirror requests
/// are resolved against advisories.
pub fn split_file_stem(stem: &str) -> (String, String) {
    match stem.rsplit_once('-') {
        Some((name, version)) => (name.to_string(), version.to_string()),
        None => (String::new(), stem.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_constraints_sorts_pairs() {
        let joined = join_constraints(&[
            VersionConstraint::new("~>", "2.0"),
            VersionConstraint::new(">=", "2.0.3"),
        ]);
        assert_eq!(joined, ">= 2.0.3&~> 2.0");
        assert_eq!(join_constraints(&[]), "");
    }

    #[test]
    fn test_full_name_omits_default_platform() {
        assert_eq!(full_name("rack", "3.0.0", "ruby"), "rack-3.0.0");
        assert_eq!(full_name("rack", "3.0.0", ""), "rack-3.0.0");
        assert_eq!(
            full_name("nokogiri", "1.15.0", "x86_64-linux"),
            "nokogiri-1.15.0-x86_64-linux"
        );
    }

    #[test]
    fn test_split_file_stem_uses_last_dash() {
        assert_eq!(
            split_file_stem("net-http-persistent-4.0.2"),
            ("net-http-persistent".to_string(), "4.0.2".to_string())
        );
        assert_eq!(split_file_stem("nodash"), (String::new(), "nodash".to_string()));
    }

    #[test]
    fn test_prerelease_detection() {
        assert!(is_prerelease("1.0.0.rc1"));
        assert!(is_prerelease("2.0.0.pre"));
        assert!(!is_prerelease("10.2.3"));
    }
}
