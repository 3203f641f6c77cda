// src/core/schema/cache.rs

//! The compiled-schema cache consulted on every signal write.
//!
//! Keys are `{slug}/v{sem_ver}` paths. Entries fill lazily from the
//! persistence port and are never overwritten: a `(slug, sem_ver)` pair is
//! immutable once published, so a stale entry cannot exist. Concurrent
//! misses for the same key compile at most once.

use crate::core::SignalsdError;
use crate::core::ident::{SemVer, signal_type_path};
use crate::core::schema::fetcher::compile_schema;
use crate::core::store::Store;
use jsonschema::Validator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

pub struct SchemaCache {
    store: Arc<dyn Store>,
    entries: Mutex<HashMap<String, Arc<OnceCell<Arc<Validator>>>>>,
}

impl SchemaCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Validates a content document against the named signal-type path.
    /// Returns the first validation error, or `NotFound` when the signal
    /// type does not exist.
    pub async fn validate(
        &self,
        slug: &str,
        sem_ver: SemVer,
        content: &serde_json::Value,
    ) -> Result<(), SignalsdError> {
        let validator = self.validator_for(slug, sem_ver).await?;
        if !validator.is_valid(content) {
            let detail = validator
                .iter_errors(content)
                .next()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "schema validation failed".to_string());
            return Err(SignalsdError::MalformedBody(detail));
        }
        Ok(())
    }

    /// Single-flight fill: the map lock is only held to fetch or insert the
    /// per-key cell, never across the load/compile await.
    async fn validator_for(
        &self,
        slug: &str,
        sem_ver: SemVer,
    ) -> Result<Arc<Validator>, SignalsdError> {
        let path = signal_type_path(slug, sem_ver);
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(path.clone()).or_default().clone()
        };
        let validator = cell
            .get_or_try_init(|| async {
                debug!(path = %path, "compiling schema for cache");
                let signal_type = self
                    .store
                    .signal_type_by_path(slug, sem_ver)
                    .await?
                    .ok_or_else(|| {
                        SignalsdError::NotFound(format!("signal type {path} not found"))
                    })?;
                let document: serde_json::Value =
                    serde_json::from_str(&signal_type.schema_content).map_err(|e| {
                        SignalsdError::Internal(format!(
                            "stored schema for {path} is not valid JSON: {e}"
                        ))
                    })?;
                Ok::<_, SignalsdError>(Arc::new(compile_schema(&document)?))
            })
            .await?;
        Ok(validator.clone())
    }

    /// Number of compiled entries currently resident.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
