// src/core/batch.rs

//! The batch manager: explicit batch opening for service accounts, batch
//! search, and status reporting with the unresolved-failure rollup.

use crate::core::SignalsdError;
use crate::core::auth::claims::AccessTokenClaims;
use crate::core::ident::SemVer;
use crate::core::model::{AccountRole, AccountType, FailureCode, Isn, SignalBatch};
use crate::core::search::parse_search_date;
use crate::core::store::{BatchSearchFilter, Store};
use crate::core::webhook::BatchClosureHook;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Query-string parameters for batch search. At least one of the four modes
/// (latest, previous, created range, closed range) must be requested.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchSearchQuery {
    #[serde(default)]
    pub latest: bool,
    #[serde(default)]
    pub previous: bool,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub closed_after: Option<String>,
    pub closed_before: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedFailure {
    pub local_ref: String,
    pub error_code: FailureCode,
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchTypeStatus {
    pub signal_type_slug: String,
    pub sem_ver: SemVer,
    pub stored_count: i64,
    pub failed_count: i64,
    pub unresolved_failures: Vec<UnresolvedFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub signal_batch_id: Uuid,
    pub account_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub is_latest: bool,
    pub contains_failures: bool,
    pub signal_types: Vec<BatchTypeStatus>,
}

pub struct BatchManager {
    store: Arc<dyn Store>,
    closure_hook: Arc<dyn BatchClosureHook>,
}

impl BatchManager {
    pub fn new(store: Arc<dyn Store>, closure_hook: Arc<dyn BatchClosureHook>) -> Self {
        Self {
            store,
            closure_hook,
        }
    }

    /// Opens a new batch, closing the caller's previous one on the ISN.
    /// Users never call this; they get an implicit batch on first write.
    pub async fn open(
        &self,
        claims: &AccessTokenClaims,
        isn: &Isn,
    ) -> Result<SignalBatch, SignalsdError> {
        if claims.account_type != AccountType::ServiceAccount {
            return Err(SignalsdError::Forbidden(
                "only service accounts open batches explicitly".to_string(),
            ));
        }
        let (batch, closed) = self.store.open_batch(isn.id, claims.account_id()).await?;
        info!(isn = %isn.slug, batch_id = %batch.id, "opened signal batch");
        if let Some(closed) = closed {
            self.closure_hook.batch_closed(&closed).await;
        }
        Ok(batch)
    }

    pub async fn search(
        &self,
        claims: &AccessTokenClaims,
        isn: &Isn,
        query: BatchSearchQuery,
    ) -> Result<Vec<SignalBatch>, SignalsdError> {
        let created_after = parse_optional_date(query.created_after.as_deref())?;
        let created_before = parse_optional_date(query.created_before.as_deref())?;
        let closed_after = parse_optional_date(query.closed_after.as_deref())?;
        let closed_before = parse_optional_date(query.closed_before.as_deref())?;
        let has_mode = query.latest
            || query.previous
            || created_after.is_some()
            || created_before.is_some()
            || closed_after.is_some()
            || closed_before.is_some();
        if !has_mode {
            return Err(SignalsdError::MalformedBody(
                "supply one of: latest, previous, a created range, a closed range".to_string(),
            ));
        }

        let account_id = if sees_all_batches(claims, isn) {
            None
        } else {
            Some(claims.account_id())
        };
        self.store
            .search_batches(BatchSearchFilter {
                isn_id: isn.id,
                account_id,
                latest: query.latest,
                previous: query.previous,
                created_after,
                created_before,
                closed_after,
                closed_before,
            })
            .await
    }

    /// Per-signal-type rollup for one batch. A recorded failure counts as
    /// unresolved until a later successful version exists for the same
    /// `(account, signal type, local_ref)`.
    pub async fn status(
        &self,
        claims: &AccessTokenClaims,
        isn: &Isn,
        batch_id: Uuid,
    ) -> Result<BatchStatus, SignalsdError> {
        let batch = self
            .store
            .batch_by_id(batch_id)
            .await?
            .filter(|b| b.isn_id == isn.id)
            .ok_or_else(|| SignalsdError::NotFound(format!("batch {batch_id} not found")))?;
        if !sees_all_batches(claims, isn) && batch.account_id != claims.account_id() {
            return Err(SignalsdError::Forbidden(
                "batch belongs to another account".to_string(),
            ));
        }

        let mut by_type: BTreeMap<(String, SemVer), BatchTypeStatus> = BTreeMap::new();
        for count in self.store.batch_stored_counts(batch_id).await? {
            by_type.insert(
                (count.signal_type_slug.clone(), count.sem_ver),
                BatchTypeStatus {
                    signal_type_slug: count.signal_type_slug,
                    sem_ver: count.sem_ver,
                    stored_count: count.stored_count,
                    failed_count: 0,
                    unresolved_failures: Vec::new(),
                },
            );
        }
        let mut contains_failures = false;
        for failure in self.store.batch_failures(batch_id).await? {
            let entry = by_type
                .entry((failure.signal_type_slug.clone(), failure.sem_ver))
                .or_insert_with(|| BatchTypeStatus {
                    signal_type_slug: failure.signal_type_slug.clone(),
                    sem_ver: failure.sem_ver,
                    stored_count: 0,
                    failed_count: 0,
                    unresolved_failures: Vec::new(),
                });
            entry.failed_count += 1;
            if !failure.resolved {
                contains_failures = true;
                entry.unresolved_failures.push(UnresolvedFailure {
                    local_ref: failure.local_ref,
                    error_code: failure.error_code,
                    error_message: failure.error_message,
                });
            }
        }

        Ok(BatchStatus {
            signal_batch_id: batch.id,
            account_id: batch.account_id,
            created_at: batch.created_at,
            closed_at: batch.closed_at,
            is_latest: batch.is_latest,
            contains_failures,
            signal_types: by_type.into_values().collect(),
        })
    }
}

/// The site owner sees every batch; admins and the ISN's owning account see
/// every batch on the ISN; everyone else sees only their own.
fn sees_all_batches(claims: &AccessTokenClaims, isn: &Isn) -> bool {
    claims.role == AccountRole::Owner
        || claims.role == AccountRole::Admin
        || isn.owner_account_id == claims.account_id()
}

fn parse_optional_date(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, SignalsdError> {
    raw.map(parse_search_date).transpose()
}
