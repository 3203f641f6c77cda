use chrono::Utc;
use signalsd::core::model::{Isn, SignalType, Visibility};
use signalsd::core::public_cache::PublicIsnCache;
use signalsd::core::store::{AccountStore, IsnStore, MemoryStore, SignalTypeStore, Store};
use std::sync::Arc;
use uuid::Uuid;

async fn seed(store: &Arc<dyn Store>, slug: &str, visibility: Visibility, owner: Uuid) -> Isn {
    let isn = store
        .insert_isn(Isn {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            title: slug.to_string(),
            detail: String::new(),
            visibility,
            is_in_use: true,
            owner_account_id: owner,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    store
        .insert_signal_type(SignalType {
            id: Uuid::new_v4(),
            isn_id: isn.id,
            slug: format!("{slug}-alert"),
            sem_ver: "0.0.1".parse().unwrap(),
            schema_url: format!("https://github.com/o/r/blob/v1/{slug}.json"),
            schema_content: "{}".to_string(),
            title: "Alert".to_string(),
            detail: String::new(),
            readme_url: "https://github.com/o/r/blob/v1/R.md".to_string(),
            is_in_use: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    isn
}

#[tokio::test]
async fn test_refresh_exposes_public_in_use_paths_only() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (owner, _) = store.create_user("owner@example.com", "h").await.unwrap();
    seed(&store, "open", Visibility::Public, owner.id).await;
    seed(&store, "closed", Visibility::Private, owner.id).await;

    let cache = PublicIsnCache::new();
    assert!(!cache.contains("open", "open-alert/v0.0.1"), "empty before refresh");

    let count = cache.refresh(&store).await.unwrap();
    assert_eq!(count, 1);
    assert!(cache.contains("open", "open-alert/v0.0.1"));
    assert!(cache.contains_isn("open"));
    assert!(!cache.contains("closed", "closed-alert/v0.0.1"));
    assert!(!cache.contains_isn("closed"));
    assert!(!cache.contains("open", "unknown/v0.0.1"));
}

#[tokio::test]
async fn test_disabled_owner_hides_the_isn() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (owner, _) = store.create_user("owner@example.com", "h").await.unwrap();
    let (member, _) = store.create_user("member@example.com", "h").await.unwrap();
    seed(&store, "open", Visibility::Public, member.id).await;
    let _ = owner;

    let cache = PublicIsnCache::new();
    cache.refresh(&store).await.unwrap();
    assert!(cache.contains_isn("open"));

    store.set_account_active(member.id, false).await.unwrap();
    cache.refresh(&store).await.unwrap();
    assert!(!cache.contains_isn("open"), "stale entry dropped on rebuild");
}

#[tokio::test]
async fn test_visibility_flip_updates_on_refresh() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (owner, _) = store.create_user("owner@example.com", "h").await.unwrap();
    let mut isn = seed(&store, "open", Visibility::Public, owner.id).await;

    let cache = PublicIsnCache::new();
    cache.refresh(&store).await.unwrap();
    assert!(cache.contains_isn("open"));

    isn.visibility = Visibility::Private;
    store.update_isn(isn).await.unwrap();
    cache.refresh(&store).await.unwrap();
    assert!(!cache.contains_isn("open"));
}
