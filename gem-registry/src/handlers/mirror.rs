//! Handlers for the mirror mounted at the root path.

use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Path, State},
    response::Response,
};

use super::{attachment, found};
use crate::error::{AppError, AppResult};
use crate::mirror::MirrorCache;
use crate::state::AppState;
use crate::storage;

fn mirror(state: &AppState) -> AppResult<&Arc<MirrorCache>> {
    state
        .mirror
        .as_ref()
        .ok_or_else(|| AppError::NotFound("mirroring is disabled".to_string()))
}

/// `GET /gems/{file}`
pub async fn gem(
    Path(file): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let path = mirror(&state)?.fetch_gem(&file).await?;
    Ok(attachment(&file, storage::read_file(path).await?))
}

/// `GET /quick/Marshal.4.8/{file}`
pub async fn gemspec(
    Path(file): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let path = mirror(&state)?.fetch_gemspec(&file).await?;
    Ok(attachment(&file, storage::read_file(path).await?))
}

/// Index endpoints the mirror answers with `302 Found` to the same path
/// upstream.
pub async fn redirect(
    OriginalUri(uri): OriginalUri,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    Ok(found(mirror(&state)?.redirect_url(path_and_query)?))
}
