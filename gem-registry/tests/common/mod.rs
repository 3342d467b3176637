//! Common test utilities and helpers
//!
//! Builds real `.gem` archives, registry servers rooted in temporary
//! directories, and an in-process upstream that counts the downloads it
//! serves.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use axum_test::TestServer;
use flate2::{write::GzEncoder, Compression};
use gem_registry::advisory::{Advisory, AdvisoryLookup};
use gem_registry::{build_router, AppState, Config};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Minimal `.gem` archive: a gzipped YAML gemspec plus an empty data tarball.
pub struct TestGem {
    pub name: String,
    pub version: String,
    deps: Vec<(String, String, String)>,
}

impl TestGem {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            deps: Vec::new(),
        }
    }

    pub fn dep(mut self, name: &str, op: &str, version: &str) -> Self {
        self.deps
            .push((name.to_string(), op.to_string(), version.to_string()));
        self
    }

    pub fn file_name(&self) -> String {
        format!("{}-{}.gem", self.name, self.version)
    }

    fn gemspec_yaml(&self) -> String {
        let mut y = String::from("--- !ruby/object:Gem::Specification\n");
        y.push_str(&format!("name: {}\n", self.name));
        y.push_str(&format!(
            "version: !ruby/object:Gem::Version\n  version: '{}'\n",
            self.version
        ));
        y.push_str("platform: ruby\nauthors:\n- Integration Tests\n");
        if self.deps.is_empty() {
            y.push_str("dependencies: []\n");
        } else {
            y.push_str("dependencies:\n");
        }
        for (name, op, version) in &self.deps {
            y.push_str(&format!("- !ruby/object:Gem::Dependency\n  name: {name}\n"));
            y.push_str("  requirement: !ruby/object:Gem::Requirement\n    requirements:\n");
            y.push_str(&format!(
                "    - - \"{op}\"\n      - !ruby/object:Gem::Version\n        version: '{version}'\n"
            ));
            y.push_str("  type: :runtime\n  prerelease: false\n");
        }
        y.push_str("require_paths:\n- lib\nrubygems_version: 3.4.10\n");
        y.push_str(&format!("summary: {} for tests\n", self.name));
        y
    }

    pub fn build(&self) -> Vec<u8> {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(self.gemspec_yaml().as_bytes()).unwrap();
        let metadata = gz.finish().unwrap();
        let data = GzEncoder::new(Vec::new(), Compression::default())
            .finish()
            .unwrap();

        let mut tar = tar::Builder::new(Vec::new());
        for (path, content) in [("metadata.gz", &metadata), ("data.tar.gz", &data)] {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o444);
            header.set_cksum();
            tar.append_data(&mut header, path, content.as_slice())
                .unwrap();
        }
        tar.into_inner().unwrap()
    }
}

/// Advisory source with fixed answers that records how often it is asked.
#[derive(Default)]
pub struct StaticAdvisories {
    pub calls: AtomicUsize,
    pub by_gem: HashMap<String, Vec<Advisory>>,
}

impl StaticAdvisories {
    pub fn with(gem: &str, advisory: Advisory) -> Self {
        let mut by_gem = HashMap::new();
        by_gem.insert(gem.to_string(), vec![advisory]);
        Self {
            calls: AtomicUsize::new(0),
            by_gem,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AdvisoryLookup for StaticAdvisories {
    fn advisories(&self, name: &str, _version: &str) -> Vec<Advisory> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.by_gem.get(name).cloned().unwrap_or_default()
    }
}

/// A registry under test with the temp directory it lives in.
pub struct TestSetup {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub temp_dir: TempDir,
    _shutdown: broadcast::Sender<()>,
}

/// Config rooted in a fresh temp directory with mirroring off, loaded the
/// way the binary loads it: defaults for a missing file, then `GEMFAST_*`
/// overrides.
pub fn test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().to_string_lossy().into_owned();
    let advisories = temp_dir.path().join("advisories");
    let env: HashMap<&str, String> = HashMap::from([
        ("GEMFAST_DIR", root),
        ("GEMFAST_MIRROR_ENABLED", "false".to_string()),
        (
            "GEMFAST_RUBY_ADVISORY_DB_DIR",
            advisories.to_string_lossy().into_owned(),
        ),
    ]);

    let mut config = Config::load_or_default(temp_dir.path().join("config.json")).unwrap();
    config.apply_env_from(|key| env.get(key).cloned());
    config.filter.file = None;
    (config, temp_dir)
}

pub fn create_test_setup(
    config: Config,
    temp_dir: TempDir,
    advisories: Arc<dyn AdvisoryLookup>,
) -> TestSetup {
    let (tx, rx) = broadcast::channel(1);
    let (state, _worker) = AppState::new(config, advisories, rx).unwrap();
    let state = Arc::new(state);
    let server = TestServer::new(build_router(Arc::clone(&state))).unwrap();
    TestSetup {
        server,
        state,
        temp_dir,
        _shutdown: tx,
    }
}

pub fn private_setup() -> TestSetup {
    let (config, temp_dir) = test_config();
    create_test_setup(config, temp_dir, Arc::new(StaticAdvisories::default()))
}

/// Serves the given archives under `/gems/{file}`; anything else is a 404.
pub struct Upstream {
    pub url: String,
    pub hits: Arc<AtomicUsize>,
}

impl Upstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct UpstreamState {
    gems: Arc<HashMap<String, Vec<u8>>>,
    hits: Arc<AtomicUsize>,
}

async fn serve_gem(Path(file): Path<String>, State(state): State<UpstreamState>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    match state.gems.get(&file) {
        Some(bytes) => bytes.clone().into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

pub async fn spawn_upstream(gems: &[TestGem]) -> Upstream {
    let hits = Arc::new(AtomicUsize::new(0));
    let state = UpstreamState {
        gems: Arc::new(gems.iter().map(|g| (g.file_name(), g.build())).collect()),
        hits: Arc::clone(&hits),
    };
    let app = Router::new()
        .route("/gems/{file}", get(serve_gem))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    Upstream {
        url: format!("http://{addr}"),
        hits,
    }
}

/// A registry with mirroring pointed at `upstream`.
pub fn mirror_setup(
    upstream: &Upstream,
    advisories: Arc<dyn AdvisoryLookup>,
    adjust: impl FnOnce(&mut Config),
) -> TestSetup {
    let (mut config, temp_dir) = test_config();
    config.mirror.enabled = true;
    config.mirror.upstream = upstream.url.clone();
    config.mirror.timeout_secs = 5;
    adjust(&mut config);
    create_test_setup(config, temp_dir, advisories)
}
