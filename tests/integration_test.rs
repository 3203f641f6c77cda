//! End-to-end flows through the HTTP surface, backed by the in-memory
//! store: registration and roles, ISN and signal-type administration,
//! ingest with versioning and partial failure, batch status, withdrawal,
//! and the public read path.

mod common;

use axum::http::{Method, StatusCode};
use common::{request, test_app};
use serde_json::json;
use signalsd::core::ident::SKIP_VALIDATION_URL;
use signalsd::core::store::{BatchStore, CredentialStore, IsnStore};
use uuid::Uuid;

const ISN_SLUG: &str = "sample-isn--example-org";
const TYPE_PATH: &str = "sample-isn--example-org/signal_types/sample-signal/0.0.1";

async fn register(app: &axum::Router, email: &str, password: &str) -> (StatusCode, Uuid, String) {
    let (status, body) = request(
        app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await;
    let account_id = body["account_id"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    let role = body["account_role"].as_str().unwrap_or_default().to_string();
    (status, account_id, role)
}

async fn login(app: &axum::Router, email: &str, password: &str) -> String {
    let (status, body) = request(
        app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_full_signal_exchange_flow() {
    let (app, state) = test_app();

    // The first registered user is the site owner, the second a member.
    let (status, _, role_a) = register(&app, "a@example.com", "Passw0rd!!1").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(role_a, "owner");
    let (status, b_id, role_b) = register(&app, "b@example.com", "Passw0rd!!2").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(role_b, "member");

    let token_a = login(&app, "a@example.com", "Passw0rd!!1").await;

    // Create the ISN; its slug is derived from the title.
    let (status, body) = request(
        &app,
        Method::POST,
        "/api/isn",
        Some(&token_a),
        Some(json!({
            "title": "Sample ISN @example.org",
            "detail": "d",
            "is_in_use": true,
            "visibility": "private",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["slug"], ISN_SLUG);

    // Create a signal type with the validation-skipping sentinel schema.
    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/isn/{ISN_SLUG}/signal_types"),
        Some(&token_a),
        Some(json!({
            "title": "Sample Signal",
            "bump_type": "patch",
            "schema_url": SKIP_VALIDATION_URL,
            "readme_url": "https://github.com/o/r/blob/v1/R.md",
            "detail": "d",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["slug"], "sample-signal");
    assert_eq!(body["sem_ver"], "0.0.1");

    // Grant b write; a batch is waiting for b on next sign-in.
    let (status, _) = request(
        &app,
        Method::PUT,
        &format!("/api/isn/{ISN_SLUG}/accounts/{b_id}"),
        Some(&token_a),
        Some(json!({ "permission": "write" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let isn = state.store.isn_by_slug(ISN_SLUG).await.unwrap().unwrap();
    assert!(
        state
            .store
            .latest_batch(isn.id, b_id)
            .await
            .unwrap()
            .is_some()
    );

    // One submission of three entries: r1, r2, then r1 with new content.
    let token_b = login(&app, "b@example.com", "Passw0rd!!2").await;
    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/isn/{TYPE_PATH}/signals"),
        Some(&token_b),
        Some(json!({
            "signals": [
                { "local_ref": "r1", "content": { "n": 1 } },
                { "local_ref": "r2", "content": { "n": 2 } },
                { "local_ref": "r1", "content": { "n": 3 } },
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let stored = body["stored_signals"].as_array().unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[0]["local_ref"], "r1");
    assert_eq!(stored[0]["version_number"], 1);
    assert_eq!(stored[1]["local_ref"], "r2");
    assert_eq!(stored[1]["version_number"], 1);
    assert_eq!(stored[2]["local_ref"], "r1");
    assert_eq!(stored[2]["version_number"], 2);

    // One good signal, one dangling correlation: 207 and a ledger entry.
    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/isn/{TYPE_PATH}/signals"),
        Some(&token_b),
        Some(json!({
            "signals": [
                { "local_ref": "r3", "content": { "n": 4 } },
                {
                    "local_ref": "r4",
                    "correlation_id": "00000000-0000-0000-0000-000000000000",
                    "content": { "n": 5 }
                },
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(body["stored_signals"].as_array().unwrap().len(), 1);
    let failed = body["failed_signals"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["local_ref"], "r4");
    assert_eq!(failed[0]["error_code"], "invalid_correlation_id");
    let batch_id = body["signal_batch_id"].as_str().unwrap().to_string();

    let (status, body) = request(
        &app,
        Method::GET,
        &format!("/api/isn/{ISN_SLUG}/batches/{batch_id}/status"),
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contains_failures"], true);
    let rollups = body["signal_types"].as_array().unwrap();
    assert_eq!(rollups.len(), 1);
    let unresolved = rollups[0]["unresolved_failures"].as_array().unwrap();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0]["local_ref"], "r4");

    // Withdraw r1: hidden by default, visible with include_withdrawn.
    let (status, _) = request(
        &app,
        Method::PUT,
        &format!("/api/isn/{TYPE_PATH}/signals/withdraw"),
        Some(&token_b),
        Some(json!({ "local_ref": "r1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(
        &app,
        Method::GET,
        &format!("/api/isn/{TYPE_PATH}/signals/search?local_ref=r1"),
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);

    let (status, body) = request(
        &app,
        Method::GET,
        &format!("/api/isn/{TYPE_PATH}/signals/search?local_ref=r1&include_withdrawn=true"),
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["is_withdrawn"], true);
    assert_eq!(hits[0]["version_number"], 2);

    // Re-asserting r1 reactivates the master and bumps the version to 3.
    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/isn/{TYPE_PATH}/signals"),
        Some(&token_b),
        Some(json!({
            "signals": [{ "local_ref": "r1", "content": { "n": 6 } }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stored_signals"][0]["version_number"], 3);

    let (status, body) = request(
        &app,
        Method::GET,
        &format!("/api/isn/{TYPE_PATH}/signals/search?local_ref=r1"),
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["is_withdrawn"], false);
    assert_eq!(hits[0]["version_number"], 3);
    assert_eq!(hits[0]["email"], "b@example.com");
}

#[tokio::test]
async fn test_public_read_path_is_cache_gated_and_email_free() {
    let (app, _) = test_app();
    register(&app, "a@example.com", "Passw0rd!!1").await;
    let token = login(&app, "a@example.com", "Passw0rd!!1").await;

    let (status, body) = request(
        &app,
        Method::POST,
        "/api/isn",
        Some(&token),
        Some(json!({
            "title": "Open Network",
            "detail": "d",
            "is_in_use": true,
            "visibility": "public",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["slug"], "open-network");

    let (status, _) = request(
        &app,
        Method::POST,
        "/api/isn/open-network/signal_types",
        Some(&token),
        Some(json!({
            "title": "Event",
            "bump_type": "patch",
            "schema_url": SKIP_VALIDATION_URL,
            "readme_url": "https://github.com/o/r/blob/v1/R.md",
            "detail": "d",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = request(
        &app,
        Method::POST,
        "/api/isn/open-network/signal_types/event/0.0.1/signals",
        Some(&token),
        Some(json!({ "signals": [{ "local_ref": "e1", "content": { "n": 1 } }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Anonymous read works because the cache was refreshed on mutation.
    let (status, body) = request(
        &app,
        Method::GET,
        "/api/public/isn/open-network/signal_types/event/0.0.1/signals/search?local_ref=e1",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].get("email").is_none(), "public hits omit email");

    // A private ISN is invisible to the public route.
    let (status, _) = request(
        &app,
        Method::GET,
        "/api/public/isn/ghost/signal_types/event/0.0.1/signals/search?local_ref=e1",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_error_payloads_carry_stable_codes() {
    let (app, _) = test_app();

    // No token at all.
    let (status, body) = request(&app, Method::GET, "/api/isn", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "authentication_error");

    // A short password is a structural rejection.
    let (status, body) = request(
        &app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({ "email": "a@example.com", "password": "short" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "password_too_short");

    // Unknown grant types are malformed requests.
    let (status, body) = request(
        &app,
        Method::POST,
        "/api/auth/token?grant_type=magic",
        None,
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "malformed_body");

    register(&app, "a@example.com", "Passw0rd!!1").await;
    register(&app, "b@example.com", "Passw0rd!!2").await;
    let token_b = login(&app, "b@example.com", "Passw0rd!!2").await;

    // A member may not create ISNs.
    let (status, body) = request(
        &app,
        Method::POST,
        "/api/isn",
        Some(&token_b),
        Some(json!({ "title": "Nope", "visibility": "private" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], "forbidden");

    // Submitting against an unclaimed signal-type path is forbidden too.
    let (status, body) = request(
        &app,
        Method::POST,
        "/api/isn/ghost/signal_types/event/0.0.1/signals",
        Some(&token_b),
        Some(json!({ "signals": [{ "local_ref": "r1", "content": { "n": 1 } }] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "resource_not_found");
}

#[tokio::test]
async fn test_isn_deletion_cascades_only_when_empty() {
    let (app, _) = test_app();
    register(&app, "a@example.com", "Passw0rd!!1").await;
    let token = login(&app, "a@example.com", "Passw0rd!!1").await;

    for title in ["Busy", "Empty"] {
        let (status, _) = request(
            &app,
            Method::POST,
            "/api/isn",
            Some(&token),
            Some(json!({ "title": title, "visibility": "private", "detail": "d" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    request(
        &app,
        Method::POST,
        "/api/isn/busy/signal_types",
        Some(&token),
        Some(json!({
            "title": "Busy Event",
            "bump_type": "patch",
            "schema_url": SKIP_VALIDATION_URL,
            "readme_url": "https://github.com/o/r/blob/v1/R.md",
        })),
    )
    .await;
    let (status, _) = request(
        &app,
        Method::POST,
        "/api/isn/busy/signal_types/busy-event/0.0.1/signals",
        Some(&token),
        Some(json!({ "signals": [{ "local_ref": "r1", "content": { "n": 1 } }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Stored versions pin the ISN in place.
    let (status, body) = request(&app, Method::DELETE, "/api/isn/busy", Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "resource_in_use");

    // An empty ISN deletes cleanly.
    let (status, _) = request(&app, Method::DELETE, "/api/isn/empty", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = request(&app, Method::GET, "/api/isn/empty", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_service_account_setup_and_batch_flow() {
    let (app, state) = test_app();
    register(&app, "a@example.com", "Passw0rd!!1").await;
    let token_a = login(&app, "a@example.com", "Passw0rd!!1").await;

    let (status, body) = request(
        &app,
        Method::POST,
        "/api/auth/service-accounts/register",
        Some(&token_a),
        Some(json!({
            "client_organization": "Acme Corp",
            "client_contact_email": "ops@acme.example.com",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let setup_url = body["setup_url"].as_str().unwrap().to_string();

    // The setup link works exactly once.
    let (status, body) = request(&app, Method::GET, &setup_url, None, None).await;
    assert_eq!(status, StatusCode::OK);
    let client_id = body["client_id"].as_str().unwrap().to_string();
    let client_secret = body["client_secret"].as_str().unwrap().to_string();
    let (status, body) = request(&app, Method::GET, &setup_url, None, None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error_code"], "resource_expired");

    // Set up an ISN and grant the service account write.
    let (_, isn_body) = request(
        &app,
        Method::POST,
        "/api/isn",
        Some(&token_a),
        Some(json!({ "title": "Feeds", "visibility": "private", "detail": "d" })),
    )
    .await;
    assert_eq!(isn_body["slug"], "feeds");
    request(
        &app,
        Method::POST,
        "/api/isn/feeds/signal_types",
        Some(&token_a),
        Some(json!({
            "title": "Feed Item",
            "bump_type": "patch",
            "schema_url": SKIP_VALIDATION_URL,
            "readme_url": "https://github.com/o/r/blob/v1/R.md",
        })),
    )
    .await;
    let (sa_account, _) = state
        .store
        .service_account_by_client_id(&client_id)
        .await
        .unwrap()
        .unwrap();
    request(
        &app,
        Method::PUT,
        &format!("/api/isn/feeds/accounts/{}", sa_account.id),
        Some(&token_a),
        Some(json!({ "permission": "write" })),
    )
    .await;

    // Machine login via client credentials.
    let (status, body) = request(
        &app,
        Method::POST,
        "/api/auth/token?grant_type=client_credentials",
        None,
        Some(json!({ "client_id": client_id, "client_secret": client_secret })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let sa_token = body["access_token"].as_str().unwrap().to_string();

    // No batch yet: the ingest is rejected outright.
    let (status, body) = request(
        &app,
        Method::POST,
        "/api/isn/feeds/signal_types/feed-item/0.0.1/signals",
        Some(&sa_token),
        Some(json!({ "signals": [{ "local_ref": "f1", "content": { "n": 1 } }] })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], "forbidden");

    // Open a batch, re-login to pick up the claim, then ingest.
    let (status, _) = request(
        &app,
        Method::POST,
        "/api/isn/feeds/batches",
        Some(&sa_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, body) = request(
        &app,
        Method::POST,
        "/api/auth/token?grant_type=client_credentials",
        None,
        Some(json!({ "client_id": client_id, "client_secret": client_secret })),
    )
    .await;
    let sa_token = body["access_token"].as_str().unwrap().to_string();

    let (status, _) = request(
        &app,
        Method::POST,
        "/api/isn/feeds/signal_types/feed-item/0.0.1/signals",
        Some(&sa_token),
        Some(json!({ "signals": [{ "local_ref": "f1", "content": { "n": 1 } }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
