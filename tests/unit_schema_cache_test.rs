use chrono::Utc;
use serde_json::json;
use signalsd::core::SignalsdError;
use signalsd::core::ident::SemVer;
use signalsd::core::model::SignalType;
use signalsd::core::schema::SchemaCache;
use signalsd::core::store::{MemoryStore, SignalTypeStore, Store};
use std::sync::Arc;
use uuid::Uuid;

async fn store_with_type(slug: &str, schema_content: &str) -> Arc<dyn Store> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    store
        .insert_signal_type(SignalType {
            id: Uuid::new_v4(),
            isn_id: Uuid::new_v4(),
            slug: slug.to_string(),
            sem_ver: "0.0.1".parse().unwrap(),
            schema_url: format!("https://github.com/o/r/blob/v1/{slug}.json"),
            schema_content: schema_content.to_string(),
            title: slug.to_string(),
            detail: String::new(),
            readme_url: "https://github.com/o/r/blob/v1/R.md".to_string(),
            is_in_use: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_empty_schema_accepts_everything() {
    let store = store_with_type("open", "{}").await;
    let cache = SchemaCache::new(store);
    let sem_ver: SemVer = "0.0.1".parse().unwrap();

    cache.validate("open", sem_ver, &json!({})).await.unwrap();
    cache
        .validate("open", sem_ver, &json!({"anything": [1, 2, 3]}))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_schema_violations_are_reported() {
    let schema = r#"{"type":"object","required":["severity"],
        "properties":{"severity":{"type":"integer","minimum":0}}}"#;
    let store = store_with_type("strict", schema).await;
    let cache = SchemaCache::new(store);
    let sem_ver: SemVer = "0.0.1".parse().unwrap();

    cache
        .validate("strict", sem_ver, &json!({"severity": 2}))
        .await
        .unwrap();

    let missing = cache.validate("strict", sem_ver, &json!({})).await;
    assert!(matches!(missing, Err(SignalsdError::MalformedBody(_))));

    let wrong_type = cache
        .validate("strict", sem_ver, &json!({"severity": "high"}))
        .await;
    assert!(matches!(wrong_type, Err(SignalsdError::MalformedBody(_))));
}

#[tokio::test]
async fn test_unknown_signal_type_is_not_found() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let cache = SchemaCache::new(store);
    let err = cache
        .validate("ghost", "0.0.1".parse().unwrap(), &json!({}))
        .await;
    assert!(matches!(err, Err(SignalsdError::NotFound(_))));
}

#[tokio::test]
async fn test_entries_fill_once_and_are_reused() {
    let store = store_with_type("open", "{}").await;
    let cache = Arc::new(SchemaCache::new(store));
    let sem_ver: SemVer = "0.0.1".parse().unwrap();

    assert!(cache.is_empty().await);

    // Concurrent misses for the same key compile at most once and all
    // observe the same entry.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.validate("open", sem_ver, &json!({"n": 1})).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn test_failed_fill_is_retried_not_cached() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let cache = SchemaCache::new(store.clone());
    let sem_ver: SemVer = "0.0.1".parse().unwrap();

    assert!(cache.validate("late", sem_ver, &json!({})).await.is_err());

    // The type appears afterwards; the next lookup must succeed.
    store
        .insert_signal_type(SignalType {
            id: Uuid::new_v4(),
            isn_id: Uuid::new_v4(),
            slug: "late".to_string(),
            sem_ver,
            schema_url: "https://github.com/o/r/blob/v1/late.json".to_string(),
            schema_content: "{}".to_string(),
            title: "Late".to_string(),
            detail: String::new(),
            readme_url: "https://github.com/o/r/blob/v1/R.md".to_string(),
            is_in_use: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    cache.validate("late", sem_ver, &json!({})).await.unwrap();
}
