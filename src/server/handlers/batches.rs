// src/server/handlers/batches.rs

//! Batch endpoints: explicit opening for service accounts, search, and the
//! status rollup.

use crate::core::SignalsdError;
use crate::core::auth::guard;
use crate::core::batch::BatchSearchQuery;
use crate::core::model::Permission;
use crate::server::extract::Auth;
use crate::server::handlers::require_isn_read;
use crate::server::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use uuid::Uuid;

pub async fn open(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path(isn_slug): Path<String>,
) -> Result<Response, SignalsdError> {
    let isn = state.isn_admin.get(&isn_slug).await?;
    guard::require_isn_permission(&claims, &isn.slug, Permission::Write)?;
    let batch = state.batches.open(&claims, &isn).await?;
    Ok((StatusCode::CREATED, Json(batch)).into_response())
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path(isn_slug): Path<String>,
    Query(query): Query<BatchSearchQuery>,
) -> Result<Response, SignalsdError> {
    let isn = state.isn_admin.get(&isn_slug).await?;
    require_isn_read(&claims, &isn)?;
    let batches = state.batches.search(&claims, &isn, query).await?;
    Ok((StatusCode::OK, Json(batches)).into_response())
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path((isn_slug, batch_id)): Path<(String, Uuid)>,
) -> Result<Response, SignalsdError> {
    let isn = state.isn_admin.get(&isn_slug).await?;
    require_isn_read(&claims, &isn)?;
    let status = state.batches.status(&claims, &isn, batch_id).await?;
    Ok((StatusCode::OK, Json(status)).into_response())
}
