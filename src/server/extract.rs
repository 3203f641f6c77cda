// src/server/extract.rs

//! Request extractors: bearer-token authentication and JSON bodies whose
//! rejections speak the server's error payload.

use crate::core::SignalsdError;
use crate::core::auth::claims::AccessTokenClaims;
use crate::server::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::Json;
use std::sync::Arc;

/// Extracts and verifies the bearer access token. Expiry is reported with
/// its own error code so clients can trigger a refresh.
pub struct Auth(pub AccessTokenClaims);

impl FromRequestParts<Arc<AppState>> for Auth {
    type Rejection = SignalsdError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                SignalsdError::Authentication("missing Authorization header".to_string())
            })?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            SignalsdError::Authentication("Authorization header must be a bearer token".to_string())
        })?;
        let claims = state.signer.parse(token.trim())?;
        Ok(Auth(claims))
    }
}

/// `Json<T>` with rejections mapped onto the wire error shape: a decode
/// problem is `malformed_body`, an oversize body is `request_too_large`.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = SignalsdError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match <Json<T> as FromRequest<S>>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                Err(SignalsdError::RequestTooLarge)
            }
            Err(rejection) => Err(SignalsdError::MalformedBody(rejection.body_text())),
        }
    }
}

/// Pulls the named cookie out of the request headers.
pub fn cookie_value(parts_headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    let raw = parts_headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}
