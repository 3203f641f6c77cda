// src/server/routes.rs

//! Router assembly. The service mode selects which route groups a process
//! exposes; token endpoints and health probes are always mounted.

use crate::server::handlers::{admin, auth, batches, health, isns, signal_types, signals};
use crate::server::middleware as mw;
use crate::server::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post, put};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>) -> Router {
    let mode = state.config.service_mode;
    let api_limit = state.config.max_api_request_size;
    let signal_limit = state.config.max_signal_payload_size;

    let mut api = auth_routes();
    if mode.serves_admin() {
        api = api.merge(admin_routes());
    }
    if mode.serves_signals_read() {
        api = api.merge(read_routes());
    }
    if mode.serves_signals_write() {
        api = api.merge(write_routes(signal_limit));
    }
    let api = api.layer(from_fn(move |req, next| {
        mw::advertise_body_limit(req, next, api_limit)
    }));

    Router::new()
        .nest("/api", api)
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .layer(DefaultBodyLimit::max(api_limit))
        .layer(from_fn_with_state(state.clone(), mw::rate_limit))
        .layer(TimeoutLayer::new(state.config.write_timeout))
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/token", post(auth::token))
        .route("/auth/logout", post(auth::logout))
        .route(
            "/auth/service-accounts/register",
            post(auth::register_service_account),
        )
        .route(
            "/auth/service-accounts/setup/{setup_id}",
            get(auth::setup_service_account),
        )
        .route(
            "/auth/service-accounts/rotate-secret",
            post(auth::rotate_client_secret),
        )
        .route(
            "/auth/password-reset/{token_id}",
            get(auth::password_reset_status).post(auth::complete_password_reset),
        )
}

fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/admin/accounts/{account_id}/disable",
            post(admin::disable_account),
        )
        .route(
            "/admin/accounts/{account_id}/enable",
            post(admin::enable_account),
        )
        .route("/admin/password-reset", post(admin::init_password_reset))
        .route("/isn", post(isns::create).get(isns::list))
        .route(
            "/isn/{isn_slug}",
            get(isns::get).put(isns::update).delete(isns::delete),
        )
        .route(
            "/isn/{isn_slug}/accounts/{account_id}",
            put(isns::grant_permission).delete(isns::revoke_permission),
        )
        .route(
            "/isn/{isn_slug}/signal_types",
            post(signal_types::create).get(signal_types::list),
        )
        .route(
            "/isn/{isn_slug}/signal_types/{slug}/{sem_ver}",
            get(signal_types::get)
                .put(signal_types::update)
                .delete(signal_types::delete),
        )
}

fn read_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/isn/{isn_slug}/signal_types/{slug}/{sem_ver}/signals/search",
            get(signals::search),
        )
        .route(
            "/public/isn/{isn_slug}/signal_types/{slug}/{sem_ver}/signals/search",
            get(signals::public_search),
        )
        .route("/isn/{isn_slug}/batches/search", get(batches::search))
        .route(
            "/isn/{isn_slug}/batches/{batch_id}/status",
            get(batches::status),
        )
}

fn write_routes(signal_limit: usize) -> Router<Arc<AppState>> {
    // Only the ingest route carries the large payload allowance.
    let ingest = Router::new()
        .route(
            "/isn/{isn_slug}/signal_types/{slug}/{sem_ver}/signals",
            post(signals::submit),
        )
        .route_layer(DefaultBodyLimit::max(signal_limit))
        .route_layer(from_fn(move |req, next| {
            mw::advertise_body_limit(req, next, signal_limit)
        }));
    ingest
        .route(
            "/isn/{isn_slug}/signal_types/{slug}/{sem_ver}/signals/withdraw",
            put(signals::withdraw),
        )
        .route("/isn/{isn_slug}/batches", post(batches::open))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
