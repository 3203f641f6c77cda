use chrono::Utc;
use signalsd::core::auth::ClaimsAssembler;
use signalsd::core::ident::SemVer;
use signalsd::core::model::{Isn, Permission, SignalType, Visibility};
use signalsd::core::store::{
    AccountStore, BatchStore, IsnStore, MemoryStore, SignalTypeStore, Store,
};
use std::sync::Arc;
use uuid::Uuid;

fn isn_fixture(owner: Uuid, slug: &str, visibility: Visibility) -> Isn {
    Isn {
        id: Uuid::new_v4(),
        slug: slug.to_string(),
        title: slug.to_string(),
        detail: String::new(),
        visibility,
        is_in_use: true,
        owner_account_id: owner,
        created_at: Utc::now(),
    }
}

fn signal_type_fixture(isn_id: Uuid, slug: &str, sem_ver: &str, in_use: bool) -> SignalType {
    SignalType {
        id: Uuid::new_v4(),
        isn_id,
        slug: slug.to_string(),
        sem_ver: sem_ver.parse::<SemVer>().unwrap(),
        schema_url: format!("https://github.com/o/r/blob/v1/{slug}-{sem_ver}.json"),
        schema_content: "{}".to_string(),
        title: slug.to_string(),
        detail: String::new(),
        readme_url: "https://github.com/o/r/blob/v1/R.md".to_string(),
        is_in_use: in_use,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_owner_gets_write_on_every_isn() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (owner, _) = store.create_user("owner@example.com", "h").await.unwrap();
    let (member, _) = store.create_user("member@example.com", "h").await.unwrap();

    store
        .insert_isn(isn_fixture(member.id, "alpha", Visibility::Private))
        .await
        .unwrap();
    store
        .insert_isn(isn_fixture(member.id, "beta", Visibility::Public))
        .await
        .unwrap();

    let assembler = ClaimsAssembler::new(store.clone());
    let perms = assembler.assemble(&owner).await.unwrap();
    assert_eq!(perms.len(), 2);
    assert!(perms.values().all(|c| c.permission == Permission::Write));
}

#[tokio::test]
async fn test_member_claims_are_dense_and_scoped() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (owner, _) = store.create_user("owner@example.com", "h").await.unwrap();
    let (member, _) = store.create_user("member@example.com", "h").await.unwrap();

    let granted = store
        .insert_isn(isn_fixture(owner.id, "granted", Visibility::Private))
        .await
        .unwrap();
    store
        .insert_isn(isn_fixture(owner.id, "unrelated", Visibility::Private))
        .await
        .unwrap();
    store
        .upsert_isn_permission(granted.id, member.id, Permission::Read)
        .await
        .unwrap();

    let assembler = ClaimsAssembler::new(store.clone());
    let perms = assembler.assemble(&member).await.unwrap();
    assert_eq!(perms.len(), 1, "ISNs with no permission are omitted");
    assert_eq!(perms["granted"].permission, Permission::Read);
}

#[tokio::test]
async fn test_claims_carry_in_use_paths_and_open_batch() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (owner, _) = store.create_user("owner@example.com", "h").await.unwrap();
    let (member, _) = store.create_user("member@example.com", "h").await.unwrap();

    let isn = store
        .insert_isn(isn_fixture(owner.id, "net", Visibility::Private))
        .await
        .unwrap();
    store
        .insert_signal_type(signal_type_fixture(isn.id, "alert", "0.0.1", true))
        .await
        .unwrap();
    store
        .insert_signal_type(signal_type_fixture(isn.id, "alert", "0.0.2", true))
        .await
        .unwrap();
    store
        .insert_signal_type(signal_type_fixture(isn.id, "retired", "0.0.1", false))
        .await
        .unwrap();
    store
        .upsert_isn_permission(isn.id, member.id, Permission::Write)
        .await
        .unwrap();
    let batch = store
        .get_or_create_latest_batch(isn.id, member.id)
        .await
        .unwrap();

    let assembler = ClaimsAssembler::new(store.clone());
    let perms = assembler.assemble(&member).await.unwrap();
    let claim = &perms["net"];
    assert_eq!(
        claim.signal_type_paths,
        vec!["alert/v0.0.1".to_string(), "alert/v0.0.2".to_string()],
        "only in-use paths appear, sorted"
    );
    assert_eq!(claim.signal_batch_id, Some(batch.id));
}

#[tokio::test]
async fn test_isn_owner_has_implicit_write() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (_owner, _) = store.create_user("owner@example.com", "h").await.unwrap();
    let (admin, _) = store.create_user("admin@example.com", "h").await.unwrap();

    store
        .insert_isn(isn_fixture(admin.id, "mine", Visibility::Private))
        .await
        .unwrap();

    let assembler = ClaimsAssembler::new(store.clone());
    let perms = assembler.assemble(&admin).await.unwrap();
    assert_eq!(perms["mine"].permission, Permission::Write);
}

#[tokio::test]
async fn test_claims_assembly_is_idempotent() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (owner, _) = store.create_user("owner@example.com", "h").await.unwrap();
    let (member, _) = store.create_user("member@example.com", "h").await.unwrap();

    let isn = store
        .insert_isn(isn_fixture(owner.id, "net", Visibility::Private))
        .await
        .unwrap();
    store
        .insert_signal_type(signal_type_fixture(isn.id, "alert", "0.0.1", true))
        .await
        .unwrap();
    store
        .upsert_isn_permission(isn.id, member.id, Permission::Write)
        .await
        .unwrap();

    let assembler = ClaimsAssembler::new(store.clone());
    let first = assembler.assemble(&member).await.unwrap();
    let second = assembler.assemble(&member).await.unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap(),
        "claims are byte-equal when nothing changed"
    );
}
