//! # Configuration Management
//!
//! Registry configuration is a JSON document with one section per concern:
//!
//! - [`ServerConfig`]: bind address and the public URL
//! - [`StorageConfig`]: data, gem and database directories
//! - [`MirrorConfig`]: upstream registry proxying
//! - [`FilterConfig`]: regex allow/deny list for mirrored files
//! - [`CveConfig`]: advisory database and severity ceiling
//!
//! Every section has defaults, so an empty `{}` is a valid file. After
//! loading, `GEMFAST_*` environment variables override individual fields:
//!
//! ```rust,no_run
//! # use gem_registry::config::Config;
//! let mut config = Config::load_or_default("/etc/gemfast/config.json")?;
//! config.apply_env();
//! config.validate()?;
//! # Ok::<(), gem_registry::AppError>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::advisory::Severity;
use crate::error::{AppError, AppResult};
use crate::filter::FilterAction;
use crate::storage::validate_file_name;

pub const DEFAULT_DIR: &str = "/var/gemfast";
pub const DEFAULT_PORT: u16 = 2020;
pub const DEFAULT_UPSTREAM: &str = "https://rubygems.org";
pub const DEFAULT_ADVISORY_DB_URL: &str = "https://github.com/rubysec/ruby-advisory-db.git";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub cve: CveConfig,
    #[serde(default = "default_private_namespace")]
    pub private_namespace: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            mirror: MirrorConfig::default(),
            filter: FilterConfig::default(),
            cve: CveConfig::default(),
            private_namespace: default_private_namespace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL; derived from host and port when unset.
    pub url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: PathBuf,
    /// Defaults to `<dir>/gems`.
    pub gem_dir: Option<PathBuf>,
    /// Defaults to `<dir>/db`.
    pub db_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_DIR),
            gem_dir: None,
            db_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub enabled: bool,
    pub upstream: String,
    pub timeout_secs: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            upstream: DEFAULT_UPSTREAM.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    pub action: FilterAction,
    pub patterns: Vec<String>,
    pub file: Option<PathBuf>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            action: FilterAction::Deny,
            patterns: Vec::new(),
            file: Some(PathBuf::from("/etc/gemfast/filter.conf")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CveConfig {
    pub enabled: bool,
    /// Highest acceptable severity: `low`, `medium`, `high` or `critical`.
    pub max_severity: String,
    /// Defaults to `<dir>/ruby-advisory-db`.
    pub advisory_db_dir: Option<PathBuf>,
    pub advisory_db_url: String,
    pub refresh_interval_secs: u64,
}

impl Default for CveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_severity: "high".to_string(),
            advisory_db_dir: None,
            advisory_db_url: DEFAULT_ADVISORY_DB_URL.to_string(),
            refresh_interval_secs: 24 * 60 * 60,
        }
    }
}

fn default_private_namespace() -> String {
    "private".to_string()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise use defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            debug!(path = %path.as_ref().display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Apply `GEMFAST_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("GEMFAST_DIR") {
            self.storage.dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("GEMFAST_GEM_DIR") {
            self.storage.gem_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup("GEMFAST_DB_DIR") {
            self.storage.db_dir = Some(PathBuf::from(dir));
        }
        if let Some(port) = lookup("GEMFAST_PORT").and_then(|p| p.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(enabled) = lookup("GEMFAST_MIRROR_ENABLED").as_deref().and_then(parse_bool) {
            self.mirror.enabled = enabled;
        }
        if let Some(upstream) = lookup("GEMFAST_MIRROR_UPSTREAM") {
            self.mirror.upstream = upstream;
        }
        if let Some(enabled) = lookup("GEMFAST_FILTER_ENABLED").as_deref().and_then(parse_bool) {
            self.filter.enabled = enabled;
        }
        if let Some(deny) = lookup("GEMFAST_FILTER_DEFAULT_DENY").as_deref().and_then(parse_bool) {
            self.filter.action = if deny {
                FilterAction::Deny
            } else {
                FilterAction::Allow
            };
        }
        if let Some(file) = lookup("GEMFAST_FILTER_FILE") {
            self.filter.file = Some(PathBuf::from(file));
        }
        if let Some(enabled) = lookup("GEMFAST_CVE_FILTER_ENABLED").as_deref().and_then(parse_bool) {
            self.cve.enabled = enabled;
        }
        if let Some(severity) = lookup("GEMFAST_CVE_MAX_SEVERITY") {
            self.cve.max_severity = severity;
        }
        if let Some(dir) = lookup("GEMFAST_RUBY_ADVISORY_DB_DIR") {
            self.cve.advisory_db_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.server.port == 0 {
            return Err(AppError::BadRequest("server.port must not be 0".to_string()));
        }
        Severity::from_str(&self.cve.max_severity)?;
        let namespace = self.private_namespace.as_str();
        validate_file_name(namespace).map_err(|_| {
            AppError::BadRequest(format!(
                "private_namespace {namespace:?} must be a single non-empty path component"
            ))
        })?;
        if self.mirror.enabled && self.mirror_namespace()? == namespace {
            return Err(AppError::BadRequest(format!(
                "private_namespace {namespace:?} collides with the mirror namespace"
            )));
        }
        Ok(())
    }

    pub fn gem_dir(&self) -> PathBuf {
        self.storage
            .gem_dir
            .clone()
            .unwrap_or_else(|| self.storage.dir.join("gems"))
    }

    pub fn db_dir(&self) -> PathBuf {
        self.storage
            .db_dir
            .clone()
            .unwrap_or_else(|| self.storage.dir.join("db"))
    }

    /// Root of the generated binary index artifacts.
    pub fn index_dir(&self) -> PathBuf {
        self.storage.dir.join("index")
    }

    pub fn advisory_db_dir(&self) -> PathBuf {
        self.cve
            .advisory_db_dir
            .clone()
            .unwrap_or_else(|| self.storage.dir.join("ruby-advisory-db"))
    }

    pub fn max_severity(&self) -> AppResult<Severity> {
        Severity::from_str(&self.cve.max_severity)
    }

    pub fn mirror_timeout(&self) -> Duration {
        Duration::from_secs(self.mirror.timeout_secs.max(1))
    }

    pub fn advisory_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.cve.refresh_interval_secs.max(60))
    }

    /// The mirror's store namespace: the upstream host name.
    pub fn mirror_namespace(&self) -> AppResult<String> {
        let url = Url::parse(&self.mirror.upstream).map_err(|e| {
            AppError::BadRequest(format!("invalid mirror upstream {:?}: {e}", self.mirror.upstream))
        })?;
        url.host_str().map(str::to_string).ok_or_else(|| {
            AppError::BadRequest(format!("mirror upstream {:?} has no host", self.mirror.upstream))
        })
    }

    pub fn server_url(&self) -> String {
        self.server
            .url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.server.host, self.server.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 2020);
        assert_eq!(config.gem_dir(), PathBuf::from("/var/gemfast/gems"));
        assert_eq!(config.db_dir(), PathBuf::from("/var/gemfast/db"));
        assert_eq!(
            config.advisory_db_dir(),
            PathBuf::from("/var/gemfast/ruby-advisory-db")
        );
        assert_eq!(config.max_severity().unwrap(), Severity::High);
        assert_eq!(config.mirror_namespace().unwrap(), "rubygems.org");
        assert_eq!(config.private_namespace, "private");
        assert!(!config.filter.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"storage": {"dir": "/srv/gems"}, "cve": {"max_severity": "critical"}}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.gem_dir(), PathBuf::from("/srv/gems/gems"));
        assert_eq!(config.max_severity().unwrap(), Severity::Critical);
        assert!(config.mirror.enabled);
        assert_eq!(config.private_namespace, "private");
    }

    #[test]
    fn test_load_or_default_without_file() {
        let mut config = Config::load_or_default("/nonexistent/gemfast.json").unwrap();
        config.apply_env_from(|_| None);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.private_namespace, "private");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_private_namespace() {
        for bad in ["", "..", "a/b"] {
            let mut config = Config::default();
            config.private_namespace = bad.to_string();
            assert!(config.validate().is_err(), "{bad:?} accepted");
        }

        let mut config = Config::default();
        config.private_namespace = "rubygems.org".to_string();
        assert!(config.validate().is_err());
        config.mirror.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GEMFAST_DIR", "/data"),
            ("GEMFAST_PORT", "8080"),
            ("GEMFAST_MIRROR_ENABLED", "false"),
            ("GEMFAST_FILTER_ENABLED", "true"),
            ("GEMFAST_FILTER_DEFAULT_DENY", "false"),
            ("GEMFAST_CVE_MAX_SEVERITY", "medium"),
        ]);
        let mut config = Config::default();
        config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.gem_dir(), PathBuf::from("/data/gems"));
        assert_eq!(config.server.port, 8080);
        assert!(!config.mirror.enabled);
        assert!(config.filter.enabled);
        assert_eq!(config.filter.action, FilterAction::Allow);
        assert_eq!(config.max_severity().unwrap(), Severity::Medium);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.cve.max_severity = "extreme".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mirror.upstream = "not a url".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }
}
