// src/server/handlers/auth.rs

//! Authentication endpoints: registration, login, the token endpoint for
//! both grant types, logout, service-account setup and rotation, and the
//! one-shot password-reset exchange.

use crate::config::Config;
use crate::core::SignalsdError;
use crate::core::auth::guard;
use crate::core::auth::service::IssuedTokens;
use crate::core::auth::tokens::refresh_token_ttl;
use crate::core::model::AccountRole;
use crate::server::extract::{AppJson, Auth, cookie_value};
use crate::server::state::AppState;
use axum::Json;
use bytes::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub const REFRESH_COOKIE: &str = "refresh_token";

#[derive(Deserialize)]
pub struct RegisterUserRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub grant_type: String,
}

#[derive(Deserialize)]
pub struct ClientCredentialsRequest {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Deserialize)]
pub struct RegisterServiceAccountRequest {
    pub client_organization: String,
    pub client_contact_email: String,
}

#[derive(Deserialize)]
pub struct CompletePasswordResetRequest {
    pub new_password: String,
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: i64,
    account_id: Uuid,
    role: AccountRole,
}

fn token_body(issued: &IssuedTokens) -> TokenResponse {
    TokenResponse {
        access_token: issued.access_token.clone(),
        token_type: "Bearer",
        expires_in: issued.expires_in,
        account_id: issued.account.id,
        role: issued.account.account_role,
    }
}

fn refresh_cookie(token: &str, config: &Config) -> String {
    let secure = if config.is_production() { "; Secure" } else { "" };
    format!(
        "{REFRESH_COOKIE}={token}; Path=/api/auth; Max-Age={}; HttpOnly; SameSite=Lax{secure}",
        refresh_token_ttl().num_seconds()
    )
}

fn clear_refresh_cookie(config: &Config) -> String {
    let secure = if config.is_production() { "; Secure" } else { "" };
    format!("{REFRESH_COOKIE}=; Path=/api/auth; Max-Age=0; HttpOnly; SameSite=Lax{secure}")
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<RegisterUserRequest>,
) -> Result<Response, SignalsdError> {
    let (account, user) = state
        .auth
        .register_user(&request.email, &request.password)
        .await?;
    let body = json!({
        "account_id": account.id,
        "email": user.email,
        "account_role": account.account_role,
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<LoginRequest>,
) -> Result<Response, SignalsdError> {
    let issued = state.auth.login(&request.email, &request.password).await?;
    let cookie = refresh_cookie(
        issued.refresh_token.as_deref().unwrap_or_default(),
        &state.config,
    );
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(token_body(&issued)),
    )
        .into_response())
}

/// The OAuth-style token endpoint. The grant type arrives as a URL
/// parameter and selects the credential source: the refresh cookie, or
/// client credentials in the body.
pub async fn token(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, SignalsdError> {
    match query.grant_type.as_str() {
        "refresh_token" => {
            let presented = cookie_value(&headers, REFRESH_COOKIE).ok_or_else(|| {
                SignalsdError::Authentication("missing refresh_token cookie".to_string())
            })?;
            let issued = state.auth.refresh(&presented).await?;
            let cookie = refresh_cookie(
                issued.refresh_token.as_deref().unwrap_or_default(),
                &state.config,
            );
            Ok((
                StatusCode::OK,
                [(header::SET_COOKIE, cookie)],
                Json(token_body(&issued)),
            )
                .into_response())
        }
        "client_credentials" => {
            let request: ClientCredentialsRequest = serde_json::from_slice(&body)
                .map_err(|e| SignalsdError::MalformedBody(e.to_string()))?;
            let issued = state
                .auth
                .client_credentials(&request.client_id, &request.client_secret)
                .await?;
            Ok((StatusCode::OK, Json(token_body(&issued))).into_response())
        }
        other => Err(SignalsdError::MalformedBody(format!(
            "unsupported grant_type {other:?}"
        ))),
    }
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
) -> Result<Response, SignalsdError> {
    state.auth.logout(claims.account_id()).await?;
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_refresh_cookie(&state.config))],
    )
        .into_response())
}

pub async fn register_service_account(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
    AppJson(request): AppJson<RegisterServiceAccountRequest>,
) -> Result<Response, SignalsdError> {
    guard::require_role(&claims, &[AccountRole::Admin])?;
    let setup = state
        .auth
        .register_service_account(&request.client_organization, &request.client_contact_email)
        .await?;
    let body = json!({
        "client_id": setup.client_id,
        "setup_id": setup.setup_id,
        "setup_url": format!("/api/auth/service-accounts/setup/{}", setup.setup_id),
        "expires_at": setup.expires_at,
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// The single GET that hands out the client secret. Consumes the one-time
/// setup secret; repeating the request is gone.
pub async fn setup_service_account(
    State(state): State<Arc<AppState>>,
    Path(setup_id): Path<Uuid>,
) -> Result<Response, SignalsdError> {
    let issued = state.auth.consume_setup_secret(setup_id).await?;
    Ok((StatusCode::OK, Json(issued)).into_response())
}

pub async fn rotate_client_secret(
    State(state): State<Arc<AppState>>,
    Auth(claims): Auth,
) -> Result<Response, SignalsdError> {
    let issued = state.auth.rotate_client_secret(claims.account_id()).await?;
    Ok((StatusCode::OK, Json(issued)).into_response())
}

/// Backs the one-shot reset form: reports whether the token is still valid.
pub async fn password_reset_status(
    State(state): State<Arc<AppState>>,
    Path(token_id): Path<Uuid>,
) -> Result<Response, SignalsdError> {
    let token = state.auth.password_reset_status(token_id).await?;
    let body = json!({
        "token_id": token.id,
        "expires_at": token.expires_at,
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}

pub async fn complete_password_reset(
    State(state): State<Arc<AppState>>,
    Path(token_id): Path<Uuid>,
    AppJson(request): AppJson<CompletePasswordResetRequest>,
) -> Result<Response, SignalsdError> {
    state
        .auth
        .complete_password_reset(token_id, &request.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
