//! HTTP server setup: router construction and the startup sequence.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::advisory::{spawn_refresh_task, AdvisoryDb, AdvisoryLookup};
use crate::config::Config;
use crate::handlers::{admin, mirror, private};
use crate::state::AppState;

/// Upload ceiling for pushed archives.
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

fn private_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/specs.4.8.gz", get(private::specs))
        .route("/latest_specs.4.8.gz", get(private::latest_specs))
        .route("/prerelease_specs.4.8.gz", get(private::prerelease_specs))
        .route("/quick/Marshal.4.8/{file}", get(private::gemspec))
        .route("/gems/{file}", get(private::gem))
        .route("/names", get(private::names))
        .route("/versions", get(private::versions))
        .route("/info/{name}", get(private::info))
        .route("/api/v1/dependencies", get(private::dependencies))
        .route("/api/v1/dependencies.json", get(private::dependencies_json))
        .route("/api/v1/gems", post(private::push))
        .route("/api/v1/gems/yank", delete(private::yank))
        .route("/upload", post(private::upload))
}

fn mirror_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/gems/{file}", get(mirror::gem))
        .route("/quick/Marshal.4.8/{file}", get(mirror::gemspec))
        .route("/specs.4.8.gz", get(mirror::redirect))
        .route("/latest_specs.4.8.gz", get(mirror::redirect))
        .route("/prerelease_specs.4.8.gz", get(mirror::redirect))
        .route("/names", get(mirror::redirect))
        .route("/versions", get(mirror::redirect))
        .route("/info/{name}", get(mirror::redirect))
        .route("/api/v1/dependencies", get(mirror::redirect))
        .route("/api/v1/dependencies.json", get(mirror::redirect))
}

/// The full router. Mirror routes are mounted only when mirroring is on.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/health", get(admin::health))
        .route("/status", get(admin::status))
        .route("/admin/api/v1/stats", get(admin::stats))
        .route("/admin/api/v1/users", get(admin::users))
        .route("/admin/api/v1/reindex", post(admin::reindex))
        .nest("/private", private_routes());
    if state.mirror.is_some() {
        app = app.merge(mirror_routes());
    }
    app.layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal(tx: broadcast::Sender<()>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        return;
    }
    info!("shutdown signal received");
    if tx.send(()).is_err() {
        warn!("no background tasks were listening for shutdown");
    }
}

/// Start the registry and serve until ctrl-c.
pub async fn run_server(config: Config) -> Result<()> {
    info!(
        dir = %config.storage.dir.display(),
        private_namespace = %config.private_namespace,
        "starting gem registry"
    );
    let (shutdown_tx, _) = broadcast::channel(4);

    let advisory_db = Arc::new(AdvisoryDb::new(
        config.advisory_db_dir(),
        config.cve.advisory_db_url.clone(),
    ));
    if config.mirror.enabled && config.cve.enabled {
        spawn_refresh_task(
            Arc::clone(&advisory_db),
            config.advisory_refresh_interval(),
            shutdown_tx.subscribe(),
        );
    }
    let advisories: Arc<dyn AdvisoryLookup> = advisory_db;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let (state, worker) = AppState::new(config, advisories, shutdown_tx.subscribe())
        .context("failed to initialise registry state")?;
    let state = Arc::new(state);

    let indexer = Arc::clone(&state.indexer);
    let namespace = state.private_namespace().to_string();
    tokio::task::spawn_blocking(move || indexer.ensure_index(&namespace))
        .await
        .context("initial index task failed")?
        .context("failed to build the private index")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!(addr = %addr, url = %state.config.server_url(), "server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    if let Err(e) = worker.await {
        warn!(error = %e, "reindex worker ended abnormally");
    }
    info!("server stopped");
    Ok(())
}

/// One-shot rebuild of every namespace's index, for the `index` command.
pub fn rebuild_all(config: Config) -> Result<()> {
    config.validate().context("invalid configuration")?;
    let store = Arc::new(
        crate::store::MetadataStore::open_dir(&config.db_dir()).context("failed to open store")?,
    );
    let indexer = crate::indexer::Indexer::new(store, config.gem_dir(), config.index_dir());

    let mut namespaces = indexer.namespaces()?;
    if !namespaces.contains(&config.private_namespace) {
        namespaces.push(config.private_namespace.clone());
    }
    for ns in namespaces {
        let summary = indexer
            .generate_index(&ns)
            .with_context(|| format!("failed to index namespace {ns}"))?;
        info!(namespace = %ns, indexed = summary.indexed, skipped = summary.skipped, failed = summary.failed, "namespace indexed");
    }
    Ok(())
}
