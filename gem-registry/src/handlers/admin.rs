//! Health, status and admin endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::blocking;
use crate::error::AppResult;
use crate::indexer::{IndexState, RebuildSummary};
use crate::state::AppState;
use crate::storage::validate_file_name;
use crate::store::{StoreStats, User};

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub started_at: String,
    pub private_namespace: String,
    pub private_index: IndexState,
    pub mirror: Option<MirrorStatus>,
}

#[derive(Debug, Serialize)]
pub struct MirrorStatus {
    pub upstream: String,
    pub namespace: String,
    pub index: IndexState,
}

/// `GET /status`
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let mirror = state.mirror.as_ref().map(|m| MirrorStatus {
        upstream: m.upstream().base().to_string(),
        namespace: m.namespace().to_string(),
        index: state.indexer.state(m.namespace()),
    });
    Json(StatusResponse {
        status: "ok",
        service: "gem-registry",
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at.to_rfc3339(),
        private_namespace: state.private_namespace().to_string(),
        private_index: state.indexer.state(state.private_namespace()),
        mirror,
    })
}

/// `GET /admin/api/v1/stats`
pub async fn stats(State(state): State<Arc<AppState>>) -> AppResult<Json<StoreStats>> {
    Ok(Json(blocking(move || state.store.stats()).await?))
}

/// `GET /admin/api/v1/users` with tokens withheld.
pub async fn users(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<User>>> {
    let mut users = blocking(move || state.store.list_users()).await?;
    for user in &mut users {
        user.token = None;
    }
    Ok(Json(users))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReindexQuery {
    /// Rebuild only this namespace; every namespace on disk otherwise.
    pub namespace: Option<String>,
}

/// `POST /admin/api/v1/reindex[?namespace=]`
pub async fn reindex(
    Query(query): Query<ReindexQuery>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<BTreeMap<String, RebuildSummary>>> {
    let summaries = blocking(move || {
        let namespaces = match query.namespace {
            Some(ns) => {
                validate_file_name(&ns)?;
                vec![ns]
            }
            None => {
                let mut all = state.indexer.namespaces()?;
                let private = state.private_namespace().to_string();
                if !all.contains(&private) {
                    all.push(private);
                }
                all
            }
        };
        let mut summaries = BTreeMap::new();
        for ns in namespaces {
            let summary = state.indexer.generate_index(&ns)?;
            summaries.insert(ns, summary);
        }
        Ok(summaries)
    })
    .await?;
    info!(namespaces = summaries.len(), "admin reindex complete");
    Ok(Json(summaries))
}
