// src/core/auth/claims.rs

//! The claims assembler: everything per-request authorization needs, folded
//! into the access-token payload at mint time so request handling makes no
//! database calls.

use crate::core::SignalsdError;
use crate::core::model::{Account, AccountRole, AccountType, Permission};
use crate::core::store::Store;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Per-ISN authorization summary embedded in the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsnClaim {
    pub permission: Permission,
    pub signal_type_paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_batch_id: Option<Uuid>,
}

/// The access-token payload. `isn_perms` is a `BTreeMap` and the path lists
/// are sorted, so assembling claims twice for the same account without
/// intervening mutations yields byte-equal payloads (modulo `iat`/`exp`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: Uuid,
    pub account_type: AccountType,
    pub role: AccountRole,
    pub isn_perms: BTreeMap<String, IsnClaim>,
    pub iat: i64,
    pub exp: i64,
}

impl AccessTokenClaims {
    pub fn account_id(&self) -> Uuid {
        self.sub
    }
}

/// Aggregates an account's ISN permissions, the in-use signal-type paths on
/// those ISNs, and the account's open batch per ISN. Runs on every token
/// mint in a bounded number of queries regardless of ISN count.
pub struct ClaimsAssembler {
    store: Arc<dyn Store>,
}

impl ClaimsAssembler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn assemble(
        &self,
        account: &Account,
    ) -> Result<BTreeMap<String, IsnClaim>, SignalsdError> {
        // Owner gets write everywhere; everyone else gets their grants plus
        // implicit write on ISNs they administer.
        let mut grants: Vec<(Uuid, String, Permission)> =
            if account.account_role == AccountRole::Owner {
                self.store
                    .list_isns()
                    .await?
                    .into_iter()
                    .map(|isn| (isn.id, isn.slug, Permission::Write))
                    .collect()
            } else {
                let mut grants: Vec<(Uuid, String, Permission)> = self
                    .store
                    .isn_permissions_for(account.id)
                    .await?
                    .into_iter()
                    .map(|(isn, permission)| (isn.id, isn.slug, permission))
                    .collect();
                for isn in self.store.list_isns().await? {
                    if isn.owner_account_id == account.id
                        && !grants.iter().any(|(id, _, _)| *id == isn.id)
                    {
                        grants.push((isn.id, isn.slug, Permission::Write));
                    }
                }
                grants
            };
        grants.sort_by(|a, b| a.1.cmp(&b.1));

        let isn_ids: Vec<Uuid> = grants.iter().map(|(id, _, _)| *id).collect();
        let mut paths_by_isn: BTreeMap<Uuid, Vec<String>> = BTreeMap::new();
        for (isn_id, path) in self.store.in_use_paths_for_isns(&isn_ids).await? {
            paths_by_isn.entry(isn_id).or_default().push(path);
        }

        let mut batch_by_isn: BTreeMap<Uuid, Uuid> = BTreeMap::new();
        for batch in self.store.open_batches_for(account.id).await? {
            batch_by_isn.insert(batch.isn_id, batch.id);
        }

        let mut perms = BTreeMap::new();
        for (isn_id, slug, permission) in grants {
            let mut signal_type_paths = paths_by_isn.remove(&isn_id).unwrap_or_default();
            signal_type_paths.sort();
            perms.insert(
                slug,
                IsnClaim {
                    permission,
                    signal_type_paths,
                    signal_batch_id: batch_by_isn.get(&isn_id).copied(),
                },
            );
        }
        Ok(perms)
    }

    /// Builds the full claims payload for an account with the given TTL.
    pub async fn claims_for(
        &self,
        account: &Account,
        ttl: chrono::Duration,
    ) -> Result<AccessTokenClaims, SignalsdError> {
        let now = Utc::now();
        Ok(AccessTokenClaims {
            sub: account.id,
            account_type: account.account_type,
            role: account.account_role,
            isn_perms: self.assemble(account).await?,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        })
    }
}
