// tests/common/mod.rs

//! Shared harness for HTTP-level tests: an app backed by the in-memory
//! store, driven through `tower::ServiceExt::oneshot`.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use signalsd::config::{Config, Environment, ServiceMode};
use signalsd::core::store::MemoryStore;
use signalsd::server::{AppState, build_router};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub fn test_config() -> Config {
    Config {
        environment: Environment::Test,
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: "integration-test-secret-key-0123456789".to_string(),
        database_url: "postgres://unused".to_string(),
        database_max_connections: 1,
        log_level: "warn".to_string(),
        read_timeout: Duration::from_secs(5),
        write_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(5),
        allowed_origins: Vec::new(),
        max_signal_payload_size: 5 * 1024 * 1024,
        max_api_request_size: 64 * 1024,
        // Generous so request-heavy tests never trip the limiter.
        rate_limit_rps: 100_000,
        rate_limit_burst: 10_000,
        service_mode: ServiceMode::All,
    }
}

pub fn test_app() -> (Router, Arc<AppState>) {
    let state = AppState::new(test_config(), Arc::new(MemoryStore::new()));
    (build_router(state.clone()), state)
}

pub async fn request(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds"),
        None => builder.body(Body::empty()).expect("request builds"),
    };

    let response = app.clone().oneshot(request).await.expect("app responds");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}
