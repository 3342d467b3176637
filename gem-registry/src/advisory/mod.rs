//! Vulnerability advisories and the severity gate applied to mirrored gems.
//!
//! Advisories come from a checkout of the ruby-advisory-db repository
//! (`gems/<name>/<id>.yml`). [`AdvisoryLookup`] is the query seam the mirror
//! depends on; [`AdvisoryDb`] is the production implementation.

mod db;

pub use db::{spawn_refresh_task, AdvisoryDb};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AppError;
use crate::version::{GemVersion, Requirement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// CVSS v3 bands.
    pub fn from_cvss_v3(score: f64) -> Self {
        match score {
            s if (0.1..=3.9).contains(&s) => Severity::Low,
            s if (4.0..=6.9).contains(&s) => Severity::Medium,
            s if (7.0..=8.9).contains(&s) => Severity::High,
            s if (9.0..=10.0).contains(&s) => Severity::Critical,
            _ => Severity::None,
        }
    }

    /// CVSS v2 bands; v2 has no critical band.
    pub fn from_cvss_v2(score: f64) -> Self {
        match score {
            s if s > 0.0 && s <= 3.9 => Severity::Low,
            s if (4.0..=6.9).contains(&s) => Severity::Medium,
            s if (7.0..=10.0).contains(&s) => Severity::High,
            _ => Severity::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Whether an advisory of this severity may be served under `ceiling`.
    pub fn is_acceptable_under(self, ceiling: Severity) -> bool {
        self == Severity::None || self <= ceiling
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Severity::None),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(AppError::BadRequest(format!("unknown severity: {other}"))),
        }
    }
}

/// One ruby-advisory-db record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Advisory {
    pub gem: String,
    pub cve: Option<String>,
    pub ghsa: Option<String>,
    pub date: Option<String>,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub cvss_v2: Option<f64>,
    pub cvss_v3: Option<f64>,
    pub patched_versions: Vec<String>,
    pub unaffected_versions: Vec<String>,
}

impl Advisory {
    /// v3 score when present and non-zero, else v2.
    pub fn severity(&self) -> Severity {
        match (self.cvss_v3, self.cvss_v2) {
            (Some(v3), _) if v3 != 0.0 => Severity::from_cvss_v3(v3),
            (_, Some(v2)) if v2 != 0.0 => Severity::from_cvss_v2(v2),
            _ => Severity::None,
        }
    }

    pub fn id(&self) -> &str {
        self.cve
            .as_deref()
            .or(self.ghsa.as_deref())
            .unwrap_or(self.title.as_str())
    }

    fn any_matches(ranges: &[String], version: &GemVersion) -> bool {
        ranges.iter().any(|range| match Requirement::parse(range) {
            Ok(req) => req.is_satisfied_by(version),
            Err(e) => {
                warn!(range = %range, error = %e, "ignoring unparseable advisory range");
                false
            }
        })
    }

    /// True unless `version` falls in a patched or unaffected range.
    pub fn affects(&self, version: &GemVersion) -> bool {
        !Self::any_matches(&self.patched_versions, version)
            && !Self::any_matches(&self.unaffected_versions, version)
    }
}

/// Query seam for vulnerability data.
pub trait AdvisoryLookup: Send + Sync {
    /// Advisories that affect `name` at `version`.
    fn advisories(&self, name: &str, version: &str) -> Vec<Advisory>;
}

/// Advisories from `found` whose severity is over `ceiling`, worst first.
pub fn blocking(found: Vec<Advisory>, ceiling: Severity) -> Vec<Advisory> {
    let mut blocking: Vec<Advisory> = found
        .into_iter()
        .filter(|a| !a.severity().is_acceptable_under(ceiling))
        .collect();
    blocking.sort_by_key(|a| std::cmp::Reverse(a.severity()));
    blocking
}
