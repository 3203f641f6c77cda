// src/core/signal_types.rs

//! The signal-type registry: version-bump policy on create, a narrow mutable
//! surface on update, and schema lock-in once published.

use crate::core::SignalsdError;
use crate::core::ident::{
    BumpType, SemVer, derive_slug, validate_readme_url, validate_schema_url,
};
use crate::core::model::{Isn, SignalType};
use crate::core::public_cache::PublicIsnCache;
use crate::core::schema::SchemaFetcher;
use crate::core::store::Store;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSignalTypeRequest {
    pub title: String,
    pub bump_type: BumpType,
    pub schema_url: String,
    pub readme_url: String,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSignalTypeRequest {
    pub readme_url: Option<String>,
    pub detail: Option<String>,
    pub is_in_use: Option<bool>,
}

pub struct SignalTypeRegistry {
    store: Arc<dyn Store>,
    fetcher: SchemaFetcher,
    public_cache: Arc<PublicIsnCache>,
}

impl SignalTypeRegistry {
    pub fn new(store: Arc<dyn Store>, public_cache: Arc<PublicIsnCache>) -> Self {
        Self {
            store,
            fetcher: SchemaFetcher::new(),
            public_cache,
        }
    }

    /// Creates a new signal-type version under the slug derived from the
    /// title. The first version starts from 0.0.0 bumped by `bump_type`;
    /// later versions bump the highest registered version. Re-publishing an
    /// already-registered schema URL is a conflict.
    pub async fn create(
        &self,
        isn: &Isn,
        request: CreateSignalTypeRequest,
    ) -> Result<SignalType, SignalsdError> {
        let slug = derive_slug(&request.title);
        if slug.is_empty() {
            return Err(SignalsdError::MalformedBody(
                "title must contain at least one alphanumeric character".to_string(),
            ));
        }
        validate_schema_url(&request.schema_url)?;
        validate_readme_url(&request.readme_url)?;

        let existing = self.store.signal_types_by_slug(&slug).await?;
        if let Some(other) = existing.iter().find(|st| st.isn_id != isn.id) {
            return Err(SignalsdError::AlreadyExists(format!(
                "slug {:?} is already registered on another ISN (id {})",
                slug, other.isn_id
            )));
        }
        if existing.iter().any(|st| st.schema_url == request.schema_url) {
            return Err(SignalsdError::AlreadyExists(format!(
                "schema {} is already published under {slug}; change the schema to bump the version",
                request.schema_url
            )));
        }
        let latest = existing
            .iter()
            .map(|st| st.sem_ver)
            .max()
            .unwrap_or(SemVer::ZERO);
        let sem_ver = latest.bump(request.bump_type);

        // Remote fetch stays outside any storage transaction.
        let schema_content = self.fetcher.fetch_schema(&request.schema_url).await?;

        let signal_type = SignalType {
            id: Uuid::new_v4(),
            isn_id: isn.id,
            slug: slug.clone(),
            sem_ver,
            schema_url: request.schema_url,
            schema_content,
            title: request.title,
            detail: request.detail,
            readme_url: request.readme_url,
            is_in_use: true,
            created_at: Utc::now(),
        };
        let created = self.store.insert_signal_type(signal_type).await?;
        info!(slug = %created.slug, sem_ver = %created.sem_ver, "created signal type");
        self.refresh_public_cache().await;
        Ok(created)
    }

    pub async fn get(
        &self,
        isn: &Isn,
        slug: &str,
        sem_ver: SemVer,
    ) -> Result<SignalType, SignalsdError> {
        let signal_type = self
            .store
            .signal_type_by_path(slug, sem_ver)
            .await?
            .filter(|st| st.isn_id == isn.id)
            .ok_or_else(|| {
                SignalsdError::NotFound(format!("signal type {slug}/v{sem_ver} not found"))
            })?;
        Ok(signal_type)
    }

    pub async fn list(&self, isn: &Isn) -> Result<Vec<SignalType>, SignalsdError> {
        self.store.list_signal_types(isn.id).await
    }

    /// Only the readme, the detail text, and the in-use flag are mutable.
    pub async fn update(
        &self,
        isn: &Isn,
        slug: &str,
        sem_ver: SemVer,
        request: UpdateSignalTypeRequest,
    ) -> Result<SignalType, SignalsdError> {
        if let Some(readme_url) = &request.readme_url {
            validate_readme_url(readme_url)?;
        }
        self.get(isn, slug, sem_ver).await?;
        let updated = self
            .store
            .update_signal_type(
                slug,
                sem_ver,
                request.readme_url,
                request.detail,
                request.is_in_use,
            )
            .await?
            .ok_or_else(|| {
                SignalsdError::NotFound(format!("signal type {slug}/v{sem_ver} not found"))
            })?;
        self.refresh_public_cache().await;
        Ok(updated)
    }

    pub async fn delete(
        &self,
        isn: &Isn,
        slug: &str,
        sem_ver: SemVer,
    ) -> Result<(), SignalsdError> {
        self.get(isn, slug, sem_ver).await?;
        self.store.delete_signal_type(slug, sem_ver).await?;
        info!(slug, sem_ver = %sem_ver, "deleted signal type");
        self.refresh_public_cache().await;
        Ok(())
    }

    async fn refresh_public_cache(&self) {
        if let Err(e) = self.public_cache.refresh(&self.store).await {
            warn!(error = %e, "public ISN cache refresh after mutation failed");
        }
    }
}
