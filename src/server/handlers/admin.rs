// src/server/handlers/admin.rs

//! Administrative account operations.

use crate::core::SignalsdError;
use crate::core::auth::guard;
use crate::core::model::AccountRole;
use crate::server::extract::{AppJson, Auth};
use crate::server::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct InitPasswordResetRequest {
    pub email: String,
}

/// Disabling revokes the account's refresh tokens and client secrets in the
/// same transaction. The owner account cannot be disabled.
pub async fn disable_account(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path(account_id): Path<Uuid>,
) -> Result<Response, SignalsdError> {
    guard::require_role(&claims, &[AccountRole::Admin])?;
    let account = state.store.set_account_active(account_id, false).await?;
    Ok((StatusCode::OK, Json(account)).into_response())
}

pub async fn enable_account(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    Path(account_id): Path<Uuid>,
) -> Result<Response, SignalsdError> {
    guard::require_role(&claims, &[AccountRole::Admin])?;
    let account = state.store.set_account_active(account_id, true).await?;
    Ok((StatusCode::OK, Json(account)).into_response())
}

pub async fn init_password_reset(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    AppJson(request): AppJson<InitPasswordResetRequest>,
) -> Result<Response, SignalsdError> {
    guard::require_role(&claims, &[AccountRole::Admin])?;
    let token = state
        .auth
        .init_password_reset(claims.account_id(), &request.email)
        .await?;
    let body = json!({
        "token_id": token.id,
        "reset_url": format!("/api/auth/password-reset/{}", token.id),
        "expires_at": token.expires_at,
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}
