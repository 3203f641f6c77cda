// src/core/isn.rs

//! ISN administration: create and update networks, grant and revoke
//! per-account permissions. Mutations that can change public visibility
//! refresh the public-ISN cache on demand.

use crate::core::SignalsdError;
use crate::core::ident::derive_slug;
use crate::core::model::{Account, AccountType, Isn, Permission, Visibility};
use crate::core::public_cache::PublicIsnCache;
use crate::core::store::Store;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateIsnRequest {
    pub title: String,
    #[serde(default)]
    pub detail: String,
    pub visibility: Visibility,
    #[serde(default = "default_in_use")]
    pub is_in_use: bool,
}

fn default_in_use() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateIsnRequest {
    pub title: Option<String>,
    pub detail: Option<String>,
    pub visibility: Option<Visibility>,
    pub is_in_use: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrantPermissionRequest {
    pub permission: Permission,
}

pub struct IsnAdmin {
    store: Arc<dyn Store>,
    public_cache: Arc<PublicIsnCache>,
}

impl IsnAdmin {
    pub fn new(store: Arc<dyn Store>, public_cache: Arc<PublicIsnCache>) -> Self {
        Self {
            store,
            public_cache,
        }
    }

    pub async fn create(
        &self,
        owner_account_id: Uuid,
        request: CreateIsnRequest,
    ) -> Result<Isn, SignalsdError> {
        let slug = derive_slug(&request.title);
        if slug.is_empty() {
            return Err(SignalsdError::MalformedBody(
                "title must contain at least one alphanumeric character".to_string(),
            ));
        }
        let isn = Isn {
            id: Uuid::new_v4(),
            slug,
            title: request.title,
            detail: request.detail,
            visibility: request.visibility,
            is_in_use: request.is_in_use,
            owner_account_id,
            created_at: Utc::now(),
        };
        let created = self.store.insert_isn(isn).await?;
        info!(slug = %created.slug, visibility = %created.visibility, "created ISN");
        self.refresh_public_cache().await;
        Ok(created)
    }

    pub async fn get(&self, slug: &str) -> Result<Isn, SignalsdError> {
        self.store
            .isn_by_slug(slug)
            .await?
            .ok_or_else(|| SignalsdError::NotFound(format!("ISN {slug:?} not found")))
    }

    pub async fn list(&self) -> Result<Vec<Isn>, SignalsdError> {
        self.store.list_isns().await
    }

    /// The slug is derived once at creation and never changes, even when the
    /// title does.
    pub async fn update(
        &self,
        slug: &str,
        request: UpdateIsnRequest,
    ) -> Result<Isn, SignalsdError> {
        let mut isn = self.get(slug).await?;
        if let Some(title) = request.title {
            isn.title = title;
        }
        if let Some(detail) = request.detail {
            isn.detail = detail;
        }
        if let Some(visibility) = request.visibility {
            isn.visibility = visibility;
        }
        if let Some(is_in_use) = request.is_in_use {
            isn.is_in_use = is_in_use;
        }
        let updated = self.store.update_isn(isn).await?;
        self.refresh_public_cache().await;
        Ok(updated)
    }

    /// Deletion cascades to the ISN's signal types and batches, and is
    /// refused while any signal version exists under it.
    pub async fn delete(&self, slug: &str) -> Result<(), SignalsdError> {
        let isn = self.get(slug).await?;
        self.store.delete_isn(isn.id).await?;
        info!(slug = %isn.slug, "deleted ISN");
        self.refresh_public_cache().await;
        Ok(())
    }

    /// Grants (or changes) an account's permission on the ISN. Users granted
    /// write get a batch opened for them so their next token carries it.
    pub async fn grant_permission(
        &self,
        isn: &Isn,
        account: &Account,
        permission: Permission,
    ) -> Result<(), SignalsdError> {
        self.store
            .upsert_isn_permission(isn.id, account.id, permission)
            .await?;
        if permission == Permission::Write && account.account_type == AccountType::User {
            self.store
                .get_or_create_latest_batch(isn.id, account.id)
                .await?;
        }
        info!(isn = %isn.slug, account_id = %account.id, permission = %permission,
            "granted ISN permission");
        Ok(())
    }

    pub async fn revoke_permission(
        &self,
        isn: &Isn,
        account_id: Uuid,
    ) -> Result<(), SignalsdError> {
        self.store.remove_isn_permission(isn.id, account_id).await?;
        info!(isn = %isn.slug, account_id = %account_id, "revoked ISN permission");
        Ok(())
    }

    async fn refresh_public_cache(&self) {
        if let Err(e) = self.public_cache.refresh(&self.store).await {
            warn!(error = %e, "public ISN cache refresh after mutation failed");
        }
    }
}
