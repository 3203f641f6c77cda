// src/server/handlers/signal_types.rs

//! Signal-type registry endpoints.

use crate::core::SignalsdError;
use crate::core::ident::SemVer;
use crate::core::signal_types::{CreateSignalTypeRequest, UpdateSignalTypeRequest};
use crate::server::extract::{AppJson, Auth};
use crate::server::handlers::{require_isn_admin, require_isn_read};
use crate::server::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

pub async fn create(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path(isn_slug): Path<String>,
    AppJson(request): AppJson<CreateSignalTypeRequest>,
) -> Result<Response, SignalsdError> {
    let isn = state.isn_admin.get(&isn_slug).await?;
    require_isn_admin(&claims, &isn)?;
    let signal_type = state.signal_types.create(&isn, request).await?;
    Ok((StatusCode::CREATED, Json(signal_type)).into_response())
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path(isn_slug): Path<String>,
) -> Result<Response, SignalsdError> {
    let isn = state.isn_admin.get(&isn_slug).await?;
    require_isn_read(&claims, &isn)?;
    let types = state.signal_types.list(&isn).await?;
    Ok((StatusCode::OK, Json(types)).into_response())
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path((isn_slug, slug, sem_ver)): Path<(String, String, String)>,
) -> Result<Response, SignalsdError> {
    let sem_ver: SemVer = sem_ver.parse()?;
    let isn = state.isn_admin.get(&isn_slug).await?;
    require_isn_read(&claims, &isn)?;
    let signal_type = state.signal_types.get(&isn, &slug, sem_ver).await?;
    Ok((StatusCode::OK, Json(signal_type)).into_response())
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path((isn_slug, slug, sem_ver)): Path<(String, String, String)>,
    AppJson(request): AppJson<UpdateSignalTypeRequest>,
) -> Result<Response, SignalsdError> {
    let sem_ver: SemVer = sem_ver.parse()?;
    let isn = state.isn_admin.get(&isn_slug).await?;
    require_isn_admin(&claims, &isn)?;
    let signal_type = state
        .signal_types
        .update(&isn, &slug, sem_ver, request)
        .await?;
    Ok((StatusCode::OK, Json(signal_type)).into_response())
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path((isn_slug, slug, sem_ver)): Path<(String, String, String)>,
) -> Result<Response, SignalsdError> {
    let sem_ver: SemVer = sem_ver.parse()?;
    let isn = state.isn_admin.get(&isn_slug).await?;
    require_isn_admin(&claims, &isn)?;
    state.signal_types.delete(&isn, &slug, sem_ver).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
