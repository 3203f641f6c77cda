use chrono::{TimeZone, Utc};
use serde_json::json;
use signalsd::core::SignalsdError;
use signalsd::core::model::Isn;
use signalsd::core::model::Visibility;
use signalsd::core::search::{SignalSearchQuery, SignalSearchService, parse_search_date};
use signalsd::core::store::{
    AccountStore, BatchStore, IsnStore, MemoryStore, SignalStore, SignalWrite, Store,
};
use std::sync::Arc;
use uuid::Uuid;

async fn seeded_store() -> (Arc<dyn Store>, Uuid, Uuid) {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (owner, _) = store.create_user("owner@example.com", "h").await.unwrap();
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
    let batch = store
        .get_or_create_latest_batch(isn.id, owner.id)
        .await
        .unwrap();
    (store, owner.id, batch.id)
}

fn write(account_id: Uuid, batch_id: Uuid, local_ref: &str, content: serde_json::Value) -> SignalWrite {
    SignalWrite {
        account_id,
        signal_type_slug: "alert".to_string(),
        sem_ver: "0.0.1".parse().unwrap(),
        local_ref: local_ref.to_string(),
        correlation_id: None,
        content,
        batch_id,
    }
}

#[test]
fn test_date_parsing_accepts_rfc3339_and_bare_dates() {
    let expected = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    assert_eq!(parse_search_date("2024-03-01").unwrap(), expected);
    assert_eq!(parse_search_date("2024-03-01T00:00:00Z").unwrap(), expected);
    assert_eq!(
        parse_search_date("2024-03-01T02:00:00+02:00").unwrap(),
        expected
    );
    assert_eq!(
        parse_search_date("2024-03-01T00:00:00.000000000Z").unwrap(),
        expected
    );
    // Offset-free timestamps are taken as UTC.
    assert_eq!(parse_search_date("2024-03-01T00:00:00").unwrap(), expected);
    assert!(parse_search_date("March 1st").is_err());
}

#[tokio::test]
async fn test_requires_a_filter_and_a_full_date_range() {
    let (store, _, _) = seeded_store().await;
    let search = SignalSearchService::new(store);
    let sem_ver = "0.0.1".parse().unwrap();

    let err = search
        .search("alert", sem_ver, SignalSearchQuery::default(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, SignalsdError::MalformedBody(_)));

    let err = search
        .search(
            "alert",
            sem_ver,
            SignalSearchQuery {
                start_date: Some("2024-03-01".to_string()),
                ..Default::default()
            },
            true,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SignalsdError::MalformedBody(_)));
}

#[tokio::test]
async fn test_returns_latest_version_and_omits_withdrawn() {
    let (store, account_id, batch_id) = seeded_store().await;
    store
        .store_signal_version(write(account_id, batch_id, "r1", json!({"v": 1})))
        .await
        .unwrap();
    store
        .store_signal_version(write(account_id, batch_id, "r1", json!({"v": 2})))
        .await
        .unwrap();
    store
        .store_signal_version(write(account_id, batch_id, "gone", json!({"v": 1})))
        .await
        .unwrap();
    store
        .set_signal_withdrawn(account_id, "alert", "0.0.1".parse().unwrap(), "gone", true)
        .await
        .unwrap();

    let search = SignalSearchService::new(store);
    let sem_ver = "0.0.1".parse().unwrap();
    let hits = search
        .search(
            "alert",
            sem_ver,
            SignalSearchQuery {
                account_id: Some(account_id),
                ..Default::default()
            },
            true,
        )
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].signal.local_ref, "r1");
    assert_eq!(hits[0].signal.version_number, 2);
    assert_eq!(hits[0].signal.content, json!({"v": 2}));
    assert_eq!(hits[0].signal.email.as_deref(), Some("owner@example.com"));

    let with_withdrawn = search
        .search(
            "alert",
            sem_ver,
            SignalSearchQuery {
                account_id: Some(account_id),
                include_withdrawn: true,
                ..Default::default()
            },
            true,
        )
        .await
        .unwrap();
    assert_eq!(with_withdrawn.len(), 2);
    assert!(
        with_withdrawn
            .iter()
            .any(|h| h.signal.local_ref == "gone" && h.signal.is_withdrawn)
    );
}

#[tokio::test]
async fn test_correlated_and_previous_version_fanout() {
    let (store, account_id, batch_id) = seeded_store().await;
    let target = store
        .store_signal_version(write(account_id, batch_id, "target", json!({"v": 1})))
        .await
        .unwrap();
    store
        .store_signal_version(write(account_id, batch_id, "target", json!({"v": 2})))
        .await
        .unwrap();
    let mut follow = write(account_id, batch_id, "follow", json!({"note": "linked"}));
    follow.correlation_id = Some(target.signal_id);
    store.store_signal_version(follow).await.unwrap();

    let search = SignalSearchService::new(store);
    let hits = search
        .search(
            "alert",
            "0.0.1".parse().unwrap(),
            SignalSearchQuery {
                local_ref: Some("target".to_string()),
                include_correlated: true,
                include_previous_versions: true,
                ..Default::default()
            },
            false,
        )
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    let hit = &hits[0];
    assert_eq!(hit.signal.version_number, 2);
    assert_eq!(hit.correlated_signals.len(), 1);
    assert_eq!(hit.correlated_signals[0].local_ref, "follow");
    assert_eq!(hit.previous_versions.len(), 1);
    assert_eq!(hit.previous_versions[0].version_number, 1);
    // The public variant never exposes emails.
    assert!(hit.signal.email.is_none());
    assert!(hit.correlated_signals[0].email.is_none());
}

#[tokio::test]
async fn test_date_range_filters_on_latest_version_time() {
    let (store, account_id, batch_id) = seeded_store().await;
    store
        .store_signal_version(write(account_id, batch_id, "r1", json!({"v": 1})))
        .await
        .unwrap();

    let search = SignalSearchService::new(store);
    let sem_ver = "0.0.1".parse().unwrap();

    let hits = search
        .search(
            "alert",
            sem_ver,
            SignalSearchQuery {
                start_date: Some("2000-01-01".to_string()),
                end_date: Some("2100-01-01".to_string()),
                ..Default::default()
            },
            true,
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    let hits = search
        .search(
            "alert",
            sem_ver,
            SignalSearchQuery {
                start_date: Some("2000-01-01".to_string()),
                end_date: Some("2000-12-31".to_string()),
                ..Default::default()
            },
            true,
        )
        .await
        .unwrap();
    assert!(hits.is_empty());
}
