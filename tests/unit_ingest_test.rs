use chrono::Utc;
use serde_json::json;
use signalsd::core::SignalsdError;
use signalsd::core::auth::claims::{AccessTokenClaims, IsnClaim};
use signalsd::core::ingest::{IngestEngine, SignalEntry, SignalSubmission};
use signalsd::core::model::{
    Account, FailureCode, Isn, OneTimeClientSecret, Permission, SignalType, Visibility,
};
use signalsd::core::schema::SchemaCache;
use signalsd::core::store::{
    AccountStore, BatchStore, CredentialStore, IsnStore, MemoryStore, SignalStore,
    SignalTypeStore, Store,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

const STRICT_SCHEMA: &str =
    r#"{"type":"object","required":["severity"],"properties":{"severity":{"type":"integer"}}}"#;

struct Fixture {
    store: Arc<dyn Store>,
    engine: IngestEngine,
    isn: Isn,
    account: Account,
}

async fn fixture(schema_content: &str) -> Fixture {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (owner, _) = store.create_user("owner@example.com", "h").await.unwrap();
    let (account, _) = store.create_user("writer@example.com", "h").await.unwrap();

    let isn = store
        .insert_isn(Isn {
            id: Uuid::new_v4(),
            slug: "net".to_string(),
            title: "Net".to_string(),
            detail: String::new(),
            visibility: Visibility::Private,
            is_in_use: true,
            owner_account_id: owner.id,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    store
        .insert_signal_type(SignalType {
            id: Uuid::new_v4(),
            isn_id: isn.id,
            slug: "alert".to_string(),
            sem_ver: "0.0.1".parse().unwrap(),
            schema_url: "https://github.com/o/r/blob/v1/alert.json".to_string(),
            schema_content: schema_content.to_string(),
            title: "Alert".to_string(),
            detail: String::new(),
            readme_url: "https://github.com/o/r/blob/v1/R.md".to_string(),
            is_in_use: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    store
        .upsert_isn_permission(isn.id, account.id, Permission::Write)
        .await
        .unwrap();

    let engine = IngestEngine::new(store.clone(), Arc::new(SchemaCache::new(store.clone())));
    Fixture {
        store,
        engine,
        isn,
        account,
    }
}

fn claims(fixture: &Fixture, batch: Option<Uuid>) -> AccessTokenClaims {
    let mut isn_perms = BTreeMap::new();
    isn_perms.insert(
        fixture.isn.slug.clone(),
        IsnClaim {
            permission: Permission::Write,
            signal_type_paths: vec!["alert/v0.0.1".to_string()],
            signal_batch_id: batch,
        },
    );
    AccessTokenClaims {
        sub: fixture.account.id,
        account_type: fixture.account.account_type,
        role: fixture.account.account_role,
        isn_perms,
        iat: 0,
        exp: i64::MAX,
    }
}

fn entry(local_ref: &str, content: serde_json::Value) -> SignalEntry {
    SignalEntry {
        local_ref: local_ref.to_string(),
        correlation_id: None,
        content,
    }
}

#[tokio::test]
async fn test_versions_are_dense_within_one_submission() {
    let fx = fixture("{}").await;
    let claims = claims(&fx, None);
    let submission = SignalSubmission {
        signals: vec![
            entry("r1", json!({"n": 1})),
            entry("r2", json!({"n": 2})),
            entry("r1", json!({"n": 3})),
        ],
    };
    let outcome = fx
        .engine
        .ingest(&claims, &fx.isn, "alert", "0.0.1".parse().unwrap(), submission)
        .await
        .unwrap();

    assert!(outcome.all_stored());
    assert_eq!(outcome.stored_signals.len(), 3);
    let versions: Vec<(String, i32)> = outcome
        .stored_signals
        .iter()
        .map(|s| (s.local_ref.clone(), s.version_number))
        .collect();
    assert_eq!(
        versions,
        vec![
            ("r1".to_string(), 1),
            ("r2".to_string(), 1),
            ("r1".to_string(), 2),
        ]
    );
    // Re-asserting the same master never creates a second signal id.
    assert_eq!(
        outcome.stored_signals[0].signal_id,
        outcome.stored_signals[2].signal_id
    );
}

#[tokio::test]
async fn test_schema_failure_is_independent_of_valid_signals() {
    let fx = fixture(STRICT_SCHEMA).await;
    let claims = claims(&fx, None);
    let submission = SignalSubmission {
        signals: vec![
            entry("good", json!({"severity": 3})),
            entry("bad", json!({"note": "no severity"})),
        ],
    };
    let outcome = fx
        .engine
        .ingest(&claims, &fx.isn, "alert", "0.0.1".parse().unwrap(), submission)
        .await
        .unwrap();

    assert_eq!(outcome.stored_signals.len(), 1);
    assert_eq!(outcome.failed_signals.len(), 1);
    let failure = &outcome.failed_signals[0];
    assert_eq!(failure.local_ref, "bad");
    assert_eq!(failure.error_code, FailureCode::MalformedBody);
    assert_eq!(failure.error_message, "validation failed");

    // The failure landed in the ledger, unresolved.
    let ledger = fx
        .store
        .batch_failures(outcome.signal_batch_id)
        .await
        .unwrap();
    assert_eq!(ledger.len(), 1);
    assert!(!ledger[0].resolved);
}

#[tokio::test]
async fn test_failure_resolves_after_successful_resubmit() {
    let fx = fixture(STRICT_SCHEMA).await;
    let claims = claims(&fx, None);
    let sem_ver = "0.0.1".parse().unwrap();

    let first = fx
        .engine
        .ingest(
            &claims,
            &fx.isn,
            "alert",
            sem_ver,
            SignalSubmission {
                signals: vec![entry("r9", json!({"wrong": true}))],
            },
        )
        .await
        .unwrap();
    assert!(first.none_stored());

    let second = fx
        .engine
        .ingest(
            &claims,
            &fx.isn,
            "alert",
            sem_ver,
            SignalSubmission {
                signals: vec![entry("r9", json!({"severity": 1}))],
            },
        )
        .await
        .unwrap();
    assert!(second.all_stored());

    let ledger = fx.store.batch_failures(first.signal_batch_id).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert!(ledger[0].resolved);
}

#[tokio::test]
async fn test_unknown_correlation_target_fails_per_signal() {
    let fx = fixture("{}").await;
    let claims = claims(&fx, None);
    let submission = SignalSubmission {
        signals: vec![
            entry("ok", json!({"n": 1})),
            SignalEntry {
                local_ref: "dangling".to_string(),
                correlation_id: Some(Uuid::nil()),
                content: json!({"n": 2}),
            },
        ],
    };
    let outcome = fx
        .engine
        .ingest(&claims, &fx.isn, "alert", "0.0.1".parse().unwrap(), submission)
        .await
        .unwrap();

    assert_eq!(outcome.stored_signals.len(), 1);
    assert_eq!(outcome.failed_signals.len(), 1);
    assert_eq!(
        outcome.failed_signals[0].error_code,
        FailureCode::InvalidCorrelationId
    );
}

#[tokio::test]
async fn test_correlation_to_signal_in_same_isn_is_recorded() {
    let fx = fixture("{}").await;
    let claims = claims(&fx, None);
    let sem_ver = "0.0.1".parse().unwrap();

    let target = fx
        .engine
        .ingest(
            &claims,
            &fx.isn,
            "alert",
            sem_ver,
            SignalSubmission {
                signals: vec![entry("target", json!({"n": 1}))],
            },
        )
        .await
        .unwrap();
    let target_id = target.stored_signals[0].signal_id;

    let outcome = fx
        .engine
        .ingest(
            &claims,
            &fx.isn,
            "alert",
            sem_ver,
            SignalSubmission {
                signals: vec![SignalEntry {
                    local_ref: "follow-up".to_string(),
                    correlation_id: Some(target_id),
                    content: json!({"n": 2}),
                }],
            },
        )
        .await
        .unwrap();
    assert!(outcome.all_stored());

    let stored = fx
        .store
        .signal_in_isn(outcome.stored_signals[0].signal_id, fx.isn.id)
        .await
        .unwrap()
        .expect("signal exists in the ISN");
    assert_eq!(stored.correlation_id, Some(target_id));
}

#[tokio::test]
async fn test_user_without_claimed_batch_gets_one() {
    let fx = fixture("{}").await;
    let claims = claims(&fx, None);
    let outcome = fx
        .engine
        .ingest(
            &claims,
            &fx.isn,
            "alert",
            "0.0.1".parse().unwrap(),
            SignalSubmission {
                signals: vec![entry("r1", json!({"n": 1}))],
            },
        )
        .await
        .unwrap();

    let latest = fx
        .store
        .latest_batch(fx.isn.id, fx.account.id)
        .await
        .unwrap()
        .expect("a batch was created on first write");
    assert_eq!(outcome.signal_batch_id, latest.id);
}

#[tokio::test]
async fn test_service_account_without_batch_is_rejected() {
    let fx = fixture("{}").await;
    let (sa_account, _) = fx
        .store
        .create_service_account(
            "sa_org",
            "Org",
            "contact@example.org",
            OneTimeClientSecret {
                id: Uuid::new_v4(),
                service_account_account_id: Uuid::nil(),
                plaintext_secret: "s".to_string(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            },
        )
        .await
        .unwrap();
    fx.store
        .upsert_isn_permission(fx.isn.id, sa_account.id, Permission::Write)
        .await
        .unwrap();

    let mut isn_perms = BTreeMap::new();
    isn_perms.insert(
        fx.isn.slug.clone(),
        IsnClaim {
            permission: Permission::Write,
            signal_type_paths: vec!["alert/v0.0.1".to_string()],
            signal_batch_id: None,
        },
    );
    let sa_claims = AccessTokenClaims {
        sub: sa_account.id,
        account_type: sa_account.account_type,
        role: sa_account.account_role,
        isn_perms,
        iat: 0,
        exp: i64::MAX,
    };

    let err = fx
        .engine
        .ingest(
            &sa_claims,
            &fx.isn,
            "alert",
            "0.0.1".parse().unwrap(),
            SignalSubmission {
                signals: vec![entry("r1", json!({"n": 1}))],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SignalsdError::Forbidden(_)));
}

#[tokio::test]
async fn test_withdrawn_signal_reactivates_on_resubmit() {
    let fx = fixture("{}").await;
    let claims = claims(&fx, None);
    let sem_ver = "0.0.1".parse().unwrap();

    fx.engine
        .ingest(
            &claims,
            &fx.isn,
            "alert",
            sem_ver,
            SignalSubmission {
                signals: vec![entry("r1", json!({"n": 1})), entry("r1", json!({"n": 2}))],
            },
        )
        .await
        .unwrap();
    let withdrawn = fx
        .store
        .set_signal_withdrawn(fx.account.id, "alert", sem_ver, "r1", true)
        .await
        .unwrap()
        .expect("signal exists");
    assert!(withdrawn.is_withdrawn);

    let outcome = fx
        .engine
        .ingest(
            &claims,
            &fx.isn,
            "alert",
            sem_ver,
            SignalSubmission {
                signals: vec![entry("r1", json!({"n": 3}))],
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.stored_signals[0].version_number, 3);

    let reactivated = fx
        .store
        .signal_in_isn(outcome.stored_signals[0].signal_id, fx.isn.id)
        .await
        .unwrap()
        .expect("signal exists");
    assert!(!reactivated.is_withdrawn);
}

#[tokio::test]
async fn test_request_level_shape_errors() {
    let fx = fixture("{}").await;
    let claims = claims(&fx, None);
    let sem_ver = "0.0.1".parse().unwrap();

    let empty = fx
        .engine
        .ingest(
            &claims,
            &fx.isn,
            "alert",
            sem_ver,
            SignalSubmission { signals: vec![] },
        )
        .await
        .unwrap_err();
    assert!(matches!(empty, SignalsdError::MalformedBody(_)));

    let missing_ref = fx
        .engine
        .ingest(
            &claims,
            &fx.isn,
            "alert",
            sem_ver,
            SignalSubmission {
                signals: vec![entry("", json!({"n": 1}))],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(missing_ref, SignalsdError::MalformedBody(_)));

    let null_content = fx
        .engine
        .ingest(
            &claims,
            &fx.isn,
            "alert",
            sem_ver,
            SignalSubmission {
                signals: vec![entry("r1", serde_json::Value::Null)],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(null_content, SignalsdError::MalformedBody(_)));

    // Nothing reached the ledger or the version store.
    let latest = fx.store.latest_batch(fx.isn.id, fx.account.id).await.unwrap();
    assert!(latest.is_none() || {
        let failures = fx
            .store
            .batch_failures(latest.as_ref().unwrap().id)
            .await
            .unwrap();
        failures.is_empty()
    });
}
