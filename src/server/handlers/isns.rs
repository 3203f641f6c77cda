// src/server/handlers/isns.rs

//! ISN administration endpoints.

use crate::core::SignalsdError;
use crate::core::auth::guard;
use crate::core::isn::{CreateIsnRequest, GrantPermissionRequest, UpdateIsnRequest};
use crate::core::model::{AccountRole, Visibility};
use crate::server::extract::{AppJson, Auth};
use crate::server::handlers::{require_isn_admin, require_isn_read};
use crate::server::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use uuid::Uuid;

pub async fn create(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    AppJson(request): AppJson<CreateIsnRequest>,
) -> Result<Response, SignalsdError> {
    guard::require_role(&claims, &[AccountRole::Admin])?;
    guard::require_user_account(&claims)?;
    let isn = state.isn_admin.create(claims.account_id(), request).await?;
    Ok((StatusCode::CREATED, Json(isn)).into_response())
}

/// Owners and admins see every ISN; everyone else sees public ISNs plus the
/// ones they hold a permission on.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
) -> Result<Response, SignalsdError> {
    let mut isns = state.isn_admin.list().await?;
    if !matches!(claims.role, AccountRole::Owner | AccountRole::Admin) {
        isns.retain(|isn| {
            isn.visibility == Visibility::Public
                || claims.isn_perms.contains_key(&isn.slug)
                || isn.owner_account_id == claims.account_id()
        });
    }
    Ok((StatusCode::OK, Json(isns)).into_response())
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path(isn_slug): Path<String>,
) -> Result<Response, SignalsdError> {
    let isn = state.isn_admin.get(&isn_slug).await?;
    if isn.visibility != Visibility::Public {
        require_isn_read(&claims, &isn)?;
    }
    Ok((StatusCode::OK, Json(isn)).into_response())
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path(isn_slug): Path<String>,
    AppJson(request): AppJson<UpdateIsnRequest>,
) -> Result<Response, SignalsdError> {
    let isn = state.isn_admin.get(&isn_slug).await?;
    require_isn_admin(&claims, &isn)?;
    let updated = state.isn_admin.update(&isn_slug, request).await?;
    Ok((StatusCode::OK, Json(updated)).into_response())
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path(isn_slug): Path<String>,
) -> Result<Response, SignalsdError> {
    let isn = state.isn_admin.get(&isn_slug).await?;
    require_isn_admin(&claims, &isn)?;
    state.isn_admin.delete(&isn_slug).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn grant_permission(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path((isn_slug, account_id)): Path<(String, Uuid)>,
    AppJson(request): AppJson<GrantPermissionRequest>,
) -> Result<Response, SignalsdError> {
    let isn = state.isn_admin.get(&isn_slug).await?;
    require_isn_admin(&claims, &isn)?;
    let account = state
        .store
        .account_by_id(account_id)
        .await?
        .ok_or_else(|| SignalsdError::NotFound(format!("account {account_id} not found")))?;
    state
        .isn_admin
        .grant_permission(&isn, &account, request.permission)
        .await?;
    Ok(StatusCode::CREATED.into_response())
}

pub async fn revoke_permission(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path((isn_slug, account_id)): Path<(String, Uuid)>,
) -> Result<Response, SignalsdError> {
    let isn = state.isn_admin.get(&isn_slug).await?;
    require_isn_admin(&claims, &isn)?;
    state.isn_admin.revoke_permission(&isn, account_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
