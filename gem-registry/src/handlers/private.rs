//! Handlers for the private namespace mounted under `/private`.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{attachment, binary, blocking, found, text};
use crate::compact_index::CompactIndex;
use crate::error::{AppError, AppResult};
use crate::indexer::{LATEST_SPECS, PRERELEASE_SPECS, SPECS};
use crate::marshal::{encode_dependencies, BundlerDependency};
use crate::spec;
use crate::state::{AppState, SuccessResponse};
use crate::storage::{self, gem_path, validate_file_name};

async fn artifact(state: &AppState, file: &str) -> AppResult<Response> {
    let path = state
        .indexer
        .artifact_path(state.private_namespace(), &format!("{file}.gz"));
    Ok(binary(storage::read_file(path).await?))
}

/// `GET /private/specs.4.8.gz`
pub async fn specs(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    artifact(&state, SPECS).await
}

/// `GET /private/latest_specs.4.8.gz`
pub async fn latest_specs(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    artifact(&state, LATEST_SPECS).await
}

/// `GET /private/prerelease_specs.4.8.gz`
pub async fn prerelease_specs(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    artifact(&state, PRERELEASE_SPECS).await
}

/// `GET /private/quick/Marshal.4.8/{file}`
pub async fn gemspec(
    Path(file): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    validate_file_name(&file)?;
    let path = state.indexer.gemspec_path(state.private_namespace(), &file);
    Ok(attachment(&file, storage::read_file(path).await?))
}

/// `GET /private/gems/{file}`
pub async fn gem(
    Path(file): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let path = gem_path(state.indexer.gem_dir(), state.private_namespace(), &file)?;
    Ok(attachment(&file, storage::read_file(path).await?))
}

/// `GET /private/names`
pub async fn names(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    let body = blocking(move || CompactIndex::new(&state.store, state.private_namespace()).names())
        .await?;
    Ok(text(body))
}

/// `GET /private/versions`
pub async fn versions(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    let body =
        blocking(move || CompactIndex::new(&state.store, state.private_namespace()).versions())
            .await?;
    Ok(text(body))
}

/// `GET /private/info/{name}`
pub async fn info(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let lookup = name.clone();
    let body = blocking(move || {
        CompactIndex::new(&state.store, state.private_namespace()).info(&lookup)
    })
    .await?;
    match body {
        Some(body) => Ok(text(body)),
        None => Err(AppError::NotFound(format!("gem {name} not found"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct DependenciesQuery {
    #[serde(default)]
    pub gems: String,
}

enum Dependencies {
    Local(Vec<BundlerDependency>),
    /// Some names are unknown here; the client should ask upstream.
    Upstream(String),
}

async fn resolve_dependencies(
    state: Arc<AppState>,
    gems: String,
    endpoint: &'static str,
) -> AppResult<Dependencies> {
    let names: Vec<String> = gems
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    debug!(gems = ?names, "resolving dependencies");

    let lookup = Arc::clone(&state);
    let (deps, missing) = blocking(move || {
        let mut deps = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            let versions = lookup.store.get_versions(lookup.private_namespace(), &name)?;
            if versions.is_empty() {
                missing.push(name);
            }
            deps.extend(versions.iter().map(BundlerDependency::from));
        }
        Ok((deps, missing))
    })
    .await?;

    if missing.is_empty() {
        return Ok(Dependencies::Local(deps));
    }
    match &state.mirror {
        Some(mirror) => {
            let url = mirror.redirect_url(&format!("{endpoint}?gems={gems}"))?;
            debug!(missing = ?missing, url = %url, "redirecting dependency lookup upstream");
            Ok(Dependencies::Upstream(url))
        }
        None => Err(AppError::NotFound(format!(
            "failed to fetch dependencies for gem: {}",
            missing.join(",")
        ))),
    }
}

/// `GET /private/api/v1/dependencies?gems=a,b` in bundler's binary format.
pub async fn dependencies(
    Query(query): Query<DependenciesQuery>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    if query.gems.trim().is_empty() {
        return Ok(().into_response());
    }
    match resolve_dependencies(state, query.gems, "/api/v1/dependencies").await? {
        Dependencies::Local(deps) => Ok(binary(encode_dependencies(&deps)?)),
        Dependencies::Upstream(url) => Ok(found(url)),
    }
}

/// `GET /private/api/v1/dependencies.json?gems=a,b`
pub async fn dependencies_json(
    Query(query): Query<DependenciesQuery>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    if query.gems.trim().is_empty() {
        return Ok(().into_response());
    }
    match resolve_dependencies(state, query.gems, "/api/v1/dependencies.json").await? {
        Dependencies::Local(deps) => Ok(Json(deps).into_response()),
        Dependencies::Upstream(url) => Ok(found(url)),
    }
}

async fn publish(state: Arc<AppState>, bytes: Bytes) -> AppResult<Json<SuccessResponse>> {
    if bytes.is_empty() {
        return Err(AppError::BadRequest("empty gem upload".to_string()));
    }
    let archive = bytes.clone();
    let meta = blocking(move || spec::extract_bytes(&archive, "upload")).await?;

    let namespace = state.private_namespace().to_string();
    let dest = gem_path(state.indexer.gem_dir(), &namespace, &meta.file_name())?;
    storage::save_file(&dest, bytes.to_vec()).await?;

    let indexer = Arc::clone(&state.indexer);
    let added = blocking(move || indexer.add_to_index(&namespace, &dest)).await?;
    info!(gem = %added.full_name, "published gem");
    Ok(Json(SuccessResponse {
        message: format!(
            "Successfully registered gem: {} ({})",
            added.name, added.version
        ),
    }))
}

/// `POST /private/api/v1/gems` with the archive as the raw body.
pub async fn push(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AppResult<Json<SuccessResponse>> {
    publish(state, body).await
}

/// `POST /private/upload` with the archive in multipart field `file`.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<SuccessResponse>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let bytes = field.bytes().await?;
            return publish(state, bytes).await;
        }
    }
    Err(AppError::BadRequest(
        "multipart form has no \"file\" field".to_string(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct YankQuery {
    pub gem: String,
    pub version: String,
    #[serde(default)]
    pub platform: String,
}

#[derive(Debug, Serialize)]
pub struct YankResponse {
    pub removed: usize,
    pub message: String,
}

/// `DELETE /private/api/v1/gems/yank?gem=&version=&platform=`
pub async fn yank(
    Query(query): Query<YankQuery>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<YankResponse>> {
    let indexer = Arc::clone(&state.indexer);
    let namespace = state.private_namespace().to_string();
    let YankQuery {
        gem,
        version,
        platform,
    } = query;
    let (name, number) = (gem.clone(), version.clone());
    let removed =
        blocking(move || indexer.remove_from_index(&namespace, &name, &number, &platform)).await?;
    if removed == 0 {
        return Err(AppError::NotFound(format!("no such gem version: {gem} {version}")));
    }
    Ok(Json(YankResponse {
        removed,
        message: format!("Successfully yanked gem: {gem} ({version})"),
    }))
}
