// src/server/handlers/signals.rs

//! Signal endpoints: ingest, withdrawal, and the private and public search
//! variants.

use crate::core::SignalsdError;
use crate::core::auth::guard;
use crate::core::ident::{SemVer, signal_type_path};
use crate::core::ingest::SignalSubmission;
use crate::core::model::Permission;
use crate::core::search::SignalSearchQuery;
use crate::server::extract::{AppJson, Auth};
use crate::server::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct WithdrawRequest {
    pub local_ref: String,
}

/// Batch signal submission. Per-signal outcomes drive the status code: 200
/// when everything stored, 422 when nothing did, 207 for a mix.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path((isn_slug, slug, sem_ver)): Path<(String, String, String)>,
    AppJson(submission): AppJson<SignalSubmission>,
) -> Result<Response, SignalsdError> {
    let sem_ver: SemVer = sem_ver.parse()?;
    let isn = state.isn_admin.get(&isn_slug).await?;
    let type_path = signal_type_path(&slug, sem_ver);
    guard::require_signal_type_path(&claims, &isn.slug, &type_path, Permission::Write)?;

    let outcome = state
        .ingest
        .ingest(&claims, &isn, &slug, sem_ver, submission)
        .await?;
    let status = if outcome.all_stored() {
        StatusCode::OK
    } else if outcome.none_stored() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(outcome)).into_response())
}

/// Withdrawal flags the master record; a later submission with the same
/// local_ref reactivates it.
pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path((isn_slug, slug, sem_ver)): Path<(String, String, String)>,
    AppJson(request): AppJson<WithdrawRequest>,
) -> Result<Response, SignalsdError> {
    let sem_ver: SemVer = sem_ver.parse()?;
    let isn = state.isn_admin.get(&isn_slug).await?;
    let type_path = signal_type_path(&slug, sem_ver);
    guard::require_signal_type_path(&claims, &isn.slug, &type_path, Permission::Write)?;

    let signal = state
        .store
        .set_signal_withdrawn(claims.account_id(), &slug, sem_ver, &request.local_ref, true)
        .await?
        .ok_or_else(|| {
            SignalsdError::NotFound(format!(
                "no signal with local_ref {:?} for this account",
                request.local_ref
            ))
        })?;
    let body = json!({
        "signal_id": signal.id,
        "local_ref": signal.local_ref,
        "is_withdrawn": signal.is_withdrawn,
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path((isn_slug, slug, sem_ver)): Path<(String, String, String)>,
    Query(query): Query<SignalSearchQuery>,
) -> Result<Response, SignalsdError> {
    let sem_ver: SemVer = sem_ver.parse()?;
    let isn = state.isn_admin.get(&isn_slug).await?;
    let type_path = signal_type_path(&slug, sem_ver);
    guard::require_signal_type_path(&claims, &isn.slug, &type_path, Permission::Read)?;

    let hits = state.search.search(&slug, sem_ver, query, true).await?;
    Ok((StatusCode::OK, Json(hits)).into_response())
}

/// The anonymous variant, gated by the public-ISN cache and with submitter
/// emails stripped.
pub async fn public_search(
    State(state): State<Arc<AppState>>,
    Path((isn_slug, slug, sem_ver)): Path<(String, String, String)>,
    Query(query): Query<SignalSearchQuery>,
) -> Result<Response, SignalsdError> {
    let sem_ver: SemVer = sem_ver.parse()?;
    let type_path = signal_type_path(&slug, sem_ver);
    if !state.public_cache.contains(&isn_slug, &type_path) {
        return Err(SignalsdError::NotFound(format!(
            "no public signal type {type_path} on ISN {isn_slug:?}"
        )));
    }
    let hits = state.search.search(&slug, sem_ver, query, false).await?;
    Ok((StatusCode::OK, Json(hits)).into_response())
}
