//! Regex allow/deny gate applied to requested gem file names.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::FilterConfig;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    Allow,
    #[default]
    Deny,
}

/// Ordered pattern list. The first matching pattern decides; with no match
/// the answer is the opposite of what a match would have meant.
#[derive(Debug, Clone)]
pub struct Filter {
    enabled: bool,
    action: FilterAction,
    patterns: Vec<Regex>,
}

impl Filter {
    /// A filter that allows everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            action: FilterAction::Deny,
            patterns: Vec::new(),
        }
    }

    pub fn new<S: AsRef<str>>(action: FilterAction, patterns: &[S]) -> AppResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    AppError::BadRequest(format!("invalid filter pattern {:?}: {e}", p.as_ref()))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self {
            enabled: true,
            action,
            patterns,
        })
    }

    /// Build from configuration: inline patterns first, then the filter file.
    pub fn from_config(config: &FilterConfig) -> AppResult<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        let mut patterns = config.patterns.clone();
        match &config.file {
            Some(file) if file.exists() => patterns.extend(read_pattern_file(file)?),
            Some(file) => {
                warn!(file = %file.display(), "filter file not found; using inline patterns only")
            }
            None => {}
        }
        let filter = Self::new(config.action, &patterns)?;
        info!(action = ?filter.action, patterns = filter.patterns.len(), "content filter enabled");
        Ok(filter)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_allowed(&self, file_name: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let on_match = self.action == FilterAction::Allow;
        for pattern in &self.patterns {
            if pattern.is_match(file_name) {
                debug!(file = %file_name, pattern = %pattern, allowed = on_match, "filter pattern matched");
                return on_match;
            }
        }
        !on_match
    }
}

/// One regex per line; blank lines and `#` comments are skipped.
fn read_pattern_file(path: &Path) -> AppResult<Vec<String>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}
