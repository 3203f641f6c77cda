// src/core/store/memory.rs

//! A lock-protected in-memory implementation of the persistence port.
//!
//! Every operation takes the single process lock, so the composite
//! operations are trivially atomic. The lock is never held across an await
//! point. Used by the test suite and for embedding the server without a
//! database.

use crate::core::SignalsdError;
use crate::core::ident::{SemVer, signal_type_path};
use crate::core::model::*;
use crate::core::store::{
    AccountStore, BatchSearchFilter, BatchStore, BatchStoredCount, CredentialStore, IsnStore,
    LedgerFailure, SignalSearchFilter, SignalStore, SignalTypeStore, SignalWithLatest,
    SignalWrite, StoreResult, StoredSignal,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct MemInner {
    accounts: HashMap<Uuid, Account>,
    users: HashMap<Uuid, User>,
    service_accounts: HashMap<Uuid, ServiceAccount>,
    client_secrets: Vec<ClientSecret>,
    one_time_secrets: HashMap<Uuid, OneTimeClientSecret>,
    refresh_tokens: Vec<RefreshToken>,
    password_resets: HashMap<Uuid, PasswordResetToken>,
    isns: HashMap<Uuid, Isn>,
    isn_accounts: Vec<IsnAccount>,
    signal_types: Vec<SignalType>,
    batches: HashMap<Uuid, SignalBatch>,
    signals: HashMap<Uuid, Signal>,
    versions: Vec<SignalVersion>,
    failures: Vec<SignalProcessingFailure>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemInner {
    fn signal_by_master_key(
        &self,
        account_id: Uuid,
        slug: &str,
        sem_ver: SemVer,
        local_ref: &str,
    ) -> Option<Uuid> {
        self.signals
            .values()
            .find(|s| {
                s.account_id == account_id
                    && s.signal_type_slug == slug
                    && s.sem_ver == sem_ver
                    && s.local_ref == local_ref
            })
            .map(|s| s.id)
    }

    fn latest_version_number(&self, signal_id: Uuid) -> i32 {
        self.versions
            .iter()
            .filter(|v| v.signal_id == signal_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0)
    }

    fn latest_version(&self, signal_id: Uuid) -> Option<&SignalVersion> {
        self.versions
            .iter()
            .filter(|v| v.signal_id == signal_id)
            .max_by_key(|v| v.version_number)
    }

    fn with_latest(&self, signal: &Signal) -> Option<SignalWithLatest> {
        let latest = self.latest_version(signal.id)?;
        Some(SignalWithLatest {
            signal_id: signal.id,
            account_id: signal.account_id,
            email: self.users.get(&signal.account_id).map(|u| u.email.clone()),
            signal_type_slug: signal.signal_type_slug.clone(),
            sem_ver: signal.sem_ver,
            local_ref: signal.local_ref.clone(),
            correlation_id: signal.correlation_id,
            is_withdrawn: signal.is_withdrawn,
            signal_version_id: latest.id,
            version_number: latest.version_number,
            content: latest.content.clone(),
            created_at: latest.created_at,
        })
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_user(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> StoreResult<(Account, User)> {
        let mut inner = self.inner.lock();
        if inner.users.values().any(|u| u.email == email) {
            return Err(SignalsdError::AlreadyExists(format!(
                "an account already exists for {email}"
            )));
        }
        let role = if inner.users.is_empty() {
            AccountRole::Owner
        } else {
            AccountRole::Member
        };
        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            account_type: AccountType::User,
            account_role: role,
            is_active: true,
            created_at: now,
        };
        let user = User {
            account_id: account.id,
            email: email.to_string(),
            hashed_password: hashed_password.to_string(),
            created_at: now,
        };
        inner.accounts.insert(account.id, account.clone());
        inner.users.insert(account.id, user.clone());
        Ok((account, user))
    }

    async fn account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.inner.lock().accounts.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<(Account, User)>> {
        let inner = self.inner.lock();
        Ok(inner.users.values().find(|u| u.email == email).map(|u| {
            let account = inner.accounts[&u.account_id].clone();
            (account, u.clone())
        }))
    }

    async fn user_by_account_id(&self, account_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.lock().users.get(&account_id).cloned())
    }

    async fn set_account_active(&self, account_id: Uuid, active: bool) -> StoreResult<Account> {
        let mut inner = self.inner.lock();
        let account = inner
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or_else(|| SignalsdError::NotFound("account not found".to_string()))?;
        if account.account_role == AccountRole::Owner && !active {
            return Err(SignalsdError::Forbidden(
                "the site owner account cannot be disabled".to_string(),
            ));
        }
        let now = Utc::now();
        if !active {
            for token in inner
                .refresh_tokens
                .iter_mut()
                .filter(|t| t.account_id == account_id && t.revoked_at.is_none())
            {
                token.revoked_at = Some(now);
            }
            for secret in inner.client_secrets.iter_mut().filter(|s| {
                s.service_account_account_id == account_id && s.revoked_at.is_none_or(|t| t > now)
            }) {
                secret.revoked_at = Some(now);
            }
        }
        let account = inner.accounts.get_mut(&account_id).expect("checked above");
        account.is_active = active;
        Ok(account.clone())
    }

    async fn update_user_password(
        &self,
        account_id: Uuid,
        hashed_password: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let user = inner
            .users
            .get_mut(&account_id)
            .ok_or_else(|| SignalsdError::NotFound("user not found".to_string()))?;
        user.hashed_password = hashed_password.to_string();
        Ok(())
    }

    async fn emails_for_accounts(
        &self,
        account_ids: &[Uuid],
    ) -> StoreResult<Vec<(Uuid, String)>> {
        let inner = self.inner.lock();
        Ok(account_ids
            .iter()
            .filter_map(|id| inner.users.get(id).map(|u| (*id, u.email.clone())))
            .collect())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_service_account(
        &self,
        client_id: &str,
        organization: &str,
        contact_email: &str,
        one_time: OneTimeClientSecret,
    ) -> StoreResult<(Account, ServiceAccount)> {
        let mut inner = self.inner.lock();
        if inner
            .service_accounts
            .values()
            .any(|sa| sa.client_id == client_id)
        {
            return Err(SignalsdError::AlreadyExists(format!(
                "client_id {client_id} already exists"
            )));
        }
        if inner.service_accounts.values().any(|sa| {
            sa.client_organization == organization && sa.client_contact_email == contact_email
        }) {
            return Err(SignalsdError::AlreadyExists(
                "a service account already exists for this organization and contact".to_string(),
            ));
        }
        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            account_type: AccountType::ServiceAccount,
            account_role: AccountRole::Member,
            is_active: true,
            created_at: now,
        };
        let service_account = ServiceAccount {
            account_id: account.id,
            client_id: client_id.to_string(),
            client_organization: organization.to_string(),
            client_contact_email: contact_email.to_string(),
            created_at: now,
        };
        let one_time = OneTimeClientSecret {
            service_account_account_id: account.id,
            ..one_time
        };
        inner.accounts.insert(account.id, account.clone());
        inner
            .service_accounts
            .insert(account.id, service_account.clone());
        inner.one_time_secrets.insert(one_time.id, one_time);
        Ok((account, service_account))
    }

    async fn service_account_by_client_id(
        &self,
        client_id: &str,
    ) -> StoreResult<Option<(Account, ServiceAccount)>> {
        let inner = self.inner.lock();
        Ok(inner
            .service_accounts
            .values()
            .find(|sa| sa.client_id == client_id)
            .map(|sa| (inner.accounts[&sa.account_id].clone(), sa.clone())))
    }

    async fn service_account_by_org_contact(
        &self,
        organization: &str,
        contact_email: &str,
    ) -> StoreResult<Option<ServiceAccount>> {
        let inner = self.inner.lock();
        Ok(inner
            .service_accounts
            .values()
            .find(|sa| {
                sa.client_organization == organization && sa.client_contact_email == contact_email
            })
            .cloned())
    }

    async fn service_account_by_account_id(
        &self,
        account_id: Uuid,
    ) -> StoreResult<Option<ServiceAccount>> {
        Ok(self.inner.lock().service_accounts.get(&account_id).cloned())
    }

    async fn client_id_exists(&self, client_id: &str) -> StoreResult<bool> {
        let inner = self.inner.lock();
        Ok(inner
            .service_accounts
            .values()
            .any(|sa| sa.client_id == client_id))
    }

    async fn insert_one_time_secret(&self, secret: OneTimeClientSecret) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner
            .one_time_secrets
            .retain(|_, s| s.service_account_account_id != secret.service_account_account_id);
        inner.one_time_secrets.insert(secret.id, secret);
        Ok(())
    }

    async fn one_time_secret_by_id(&self, id: Uuid) -> StoreResult<Option<OneTimeClientSecret>> {
        Ok(self.inner.lock().one_time_secrets.get(&id).cloned())
    }

    async fn consume_one_time_secret(
        &self,
        id: Uuid,
        secret: ClientSecret,
    ) -> StoreResult<ServiceAccount> {
        let mut inner = self.inner.lock();
        let one_time = inner
            .one_time_secrets
            .remove(&id)
            .ok_or_else(|| SignalsdError::ResourceExpired("setup secret already used".to_string()))?;
        let service_account = inner
            .service_accounts
            .get(&one_time.service_account_account_id)
            .cloned()
            .ok_or_else(|| SignalsdError::NotFound("service account not found".to_string()))?;
        inner.client_secrets.push(secret);
        Ok(service_account)
    }

    async fn client_secrets_for(&self, account_id: Uuid) -> StoreResult<Vec<ClientSecret>> {
        let now = Utc::now();
        let inner = self.inner.lock();
        Ok(inner
            .client_secrets
            .iter()
            .filter(|s| s.service_account_account_id == account_id && s.expires_at > now)
            .cloned()
            .collect())
    }

    async fn rotate_client_secrets(
        &self,
        account_id: Uuid,
        revoke_at: DateTime<Utc>,
        replacement: ClientSecret,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for secret in inner
            .client_secrets
            .iter_mut()
            .filter(|s| s.service_account_account_id == account_id && s.revoked_at.is_none())
        {
            secret.revoked_at = Some(revoke_at);
        }
        inner.client_secrets.push(replacement);
        Ok(())
    }

    async fn revoke_client_secrets(&self, account_id: Uuid) -> StoreResult<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        // Also cancels pending scheduled revocations from a rotation grace
        // window.
        for secret in inner.client_secrets.iter_mut().filter(|s| {
            s.service_account_account_id == account_id && s.revoked_at.is_none_or(|t| t > now)
        }) {
            secret.revoked_at = Some(now);
        }
        Ok(())
    }

    async fn replace_refresh_token(&self, token: RefreshToken) -> StoreResult<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        for existing in inner
            .refresh_tokens
            .iter_mut()
            .filter(|t| t.account_id == token.account_id && t.revoked_at.is_none())
        {
            existing.revoked_at = Some(now);
        }
        inner.refresh_tokens.push(token);
        Ok(())
    }

    async fn refresh_token_by_hash(&self, hashed: &str) -> StoreResult<Option<RefreshToken>> {
        let inner = self.inner.lock();
        Ok(inner
            .refresh_tokens
            .iter()
            .find(|t| t.hashed_token == hashed)
            .cloned())
    }

    async fn revoke_refresh_tokens(&self, account_id: Uuid) -> StoreResult<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        for token in inner
            .refresh_tokens
            .iter_mut()
            .filter(|t| t.account_id == account_id && t.revoked_at.is_none())
        {
            token.revoked_at = Some(now);
        }
        Ok(())
    }

    async fn create_password_reset(&self, token: PasswordResetToken) -> StoreResult<()> {
        self.inner.lock().password_resets.insert(token.id, token);
        Ok(())
    }

    async fn password_reset_by_id(&self, id: Uuid) -> StoreResult<Option<PasswordResetToken>> {
        Ok(self.inner.lock().password_resets.get(&id).cloned())
    }

    async fn consume_password_reset(&self, id: Uuid, hashed_password: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        let Some(token) = inner.password_resets.remove(&id) else {
            return Ok(false);
        };
        if let Some(user) = inner.users.get_mut(&token.user_account_id) {
            user.hashed_password = hashed_password.to_string();
        }
        Ok(true)
    }

    async fn delete_expired_credentials(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        let before = inner.one_time_secrets.len() + inner.password_resets.len();
        inner.one_time_secrets.retain(|_, s| s.expires_at > now);
        inner.password_resets.retain(|_, t| t.expires_at > now);
        let after = inner.one_time_secrets.len() + inner.password_resets.len();
        Ok((before - after) as u64)
    }
}

#[async_trait]
impl IsnStore for MemoryStore {
    async fn insert_isn(&self, isn: Isn) -> StoreResult<Isn> {
        let mut inner = self.inner.lock();
        if inner.isns.values().any(|i| i.slug == isn.slug) {
            return Err(SignalsdError::AlreadyExists(format!(
                "an ISN with slug {:?} already exists",
                isn.slug
            )));
        }
        inner.isns.insert(isn.id, isn.clone());
        Ok(isn)
    }

    async fn isn_by_slug(&self, slug: &str) -> StoreResult<Option<Isn>> {
        let inner = self.inner.lock();
        Ok(inner.isns.values().find(|i| i.slug == slug).cloned())
    }

    async fn update_isn(&self, isn: Isn) -> StoreResult<Isn> {
        let mut inner = self.inner.lock();
        if !inner.isns.contains_key(&isn.id) {
            return Err(SignalsdError::NotFound("ISN not found".to_string()));
        }
        inner.isns.insert(isn.id, isn.clone());
        Ok(isn)
    }

    async fn delete_isn(&self, isn_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if !inner.isns.contains_key(&isn_id) {
            return Err(SignalsdError::NotFound("ISN not found".to_string()));
        }
        let type_keys: Vec<(String, SemVer)> = inner
            .signal_types
            .iter()
            .filter(|st| st.isn_id == isn_id)
            .map(|st| (st.slug.clone(), st.sem_ver))
            .collect();
        let referenced = inner.signals.values().any(|s| {
            type_keys
                .iter()
                .any(|(slug, sem_ver)| s.signal_type_slug == *slug && s.sem_ver == *sem_ver)
        });
        if referenced {
            return Err(SignalsdError::ResourceInUse(
                "ISN has stored signals and cannot be deleted".to_string(),
            ));
        }
        let batch_ids: Vec<Uuid> = inner
            .batches
            .values()
            .filter(|b| b.isn_id == isn_id)
            .map(|b| b.id)
            .collect();
        inner
            .failures
            .retain(|f| !batch_ids.contains(&f.signal_batch_id));
        inner.batches.retain(|_, b| b.isn_id != isn_id);
        inner.signal_types.retain(|st| st.isn_id != isn_id);
        inner.isn_accounts.retain(|p| p.isn_id != isn_id);
        inner.isns.remove(&isn_id);
        Ok(())
    }

    async fn list_isns(&self) -> StoreResult<Vec<Isn>> {
        let inner = self.inner.lock();
        let mut isns: Vec<_> = inner.isns.values().cloned().collect();
        isns.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(isns)
    }

    async fn upsert_isn_permission(
        &self,
        isn_id: Uuid,
        account_id: Uuid,
        permission: Permission,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .isn_accounts
            .iter_mut()
            .find(|p| p.isn_id == isn_id && p.account_id == account_id)
        {
            existing.permission = permission;
        } else {
            inner.isn_accounts.push(IsnAccount {
                isn_id,
                account_id,
                permission,
            });
        }
        Ok(())
    }

    async fn remove_isn_permission(&self, isn_id: Uuid, account_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner
            .isn_accounts
            .retain(|p| !(p.isn_id == isn_id && p.account_id == account_id));
        Ok(())
    }

    async fn isn_permissions_for(
        &self,
        account_id: Uuid,
    ) -> StoreResult<Vec<(Isn, Permission)>> {
        let inner = self.inner.lock();
        let mut perms: Vec<_> = inner
            .isn_accounts
            .iter()
            .filter(|p| p.account_id == account_id)
            .filter_map(|p| inner.isns.get(&p.isn_id).map(|i| (i.clone(), p.permission)))
            .collect();
        perms.sort_by(|a, b| a.0.slug.cmp(&b.0.slug));
        Ok(perms)
    }

    async fn public_isn_paths(&self) -> StoreResult<Vec<(String, String)>> {
        let inner = self.inner.lock();
        let mut paths = Vec::new();
        for isn in inner.isns.values() {
            if isn.visibility != Visibility::Public || !isn.is_in_use {
                continue;
            }
            let owner_active = inner
                .accounts
                .get(&isn.owner_account_id)
                .is_some_and(|a| a.is_active);
            if !owner_active {
                continue;
            }
            for st in inner
                .signal_types
                .iter()
                .filter(|st| st.isn_id == isn.id && st.is_in_use)
            {
                paths.push((isn.slug.clone(), signal_type_path(&st.slug, st.sem_ver)));
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl SignalTypeStore for MemoryStore {
    async fn insert_signal_type(&self, signal_type: SignalType) -> StoreResult<SignalType> {
        let mut inner = self.inner.lock();
        if inner
            .signal_types
            .iter()
            .any(|st| st.slug == signal_type.slug && st.sem_ver == signal_type.sem_ver)
        {
            return Err(SignalsdError::AlreadyExists(format!(
                "signal type {}/v{} already exists",
                signal_type.slug, signal_type.sem_ver
            )));
        }
        inner.signal_types.push(signal_type.clone());
        Ok(signal_type)
    }

    async fn signal_types_by_slug(&self, slug: &str) -> StoreResult<Vec<SignalType>> {
        let inner = self.inner.lock();
        let mut types: Vec<_> = inner
            .signal_types
            .iter()
            .filter(|st| st.slug == slug)
            .cloned()
            .collect();
        types.sort_by_key(|st| st.sem_ver);
        Ok(types)
    }

    async fn signal_type_by_path(
        &self,
        slug: &str,
        sem_ver: SemVer,
    ) -> StoreResult<Option<SignalType>> {
        let inner = self.inner.lock();
        Ok(inner
            .signal_types
            .iter()
            .find(|st| st.slug == slug && st.sem_ver == sem_ver)
            .cloned())
    }

    async fn list_signal_types(&self, isn_id: Uuid) -> StoreResult<Vec<SignalType>> {
        let inner = self.inner.lock();
        let mut types: Vec<_> = inner
            .signal_types
            .iter()
            .filter(|st| st.isn_id == isn_id)
            .cloned()
            .collect();
        types.sort_by(|a, b| a.slug.cmp(&b.slug).then(a.sem_ver.cmp(&b.sem_ver)));
        Ok(types)
    }

    async fn update_signal_type(
        &self,
        slug: &str,
        sem_ver: SemVer,
        readme_url: Option<String>,
        detail: Option<String>,
        is_in_use: Option<bool>,
    ) -> StoreResult<Option<SignalType>> {
        let mut inner = self.inner.lock();
        let Some(st) = inner
            .signal_types
            .iter_mut()
            .find(|st| st.slug == slug && st.sem_ver == sem_ver)
        else {
            return Ok(None);
        };
        if let Some(readme_url) = readme_url {
            st.readme_url = readme_url;
        }
        if let Some(detail) = detail {
            st.detail = detail;
        }
        if let Some(is_in_use) = is_in_use {
            st.is_in_use = is_in_use;
        }
        Ok(Some(st.clone()))
    }

    async fn delete_signal_type(&self, slug: &str, sem_ver: SemVer) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner
            .signals
            .values()
            .any(|s| s.signal_type_slug == slug && s.sem_ver == sem_ver)
        {
            return Err(SignalsdError::ResourceInUse(format!(
                "signal type {slug}/v{sem_ver} has signals and cannot be deleted"
            )));
        }
        let before = inner.signal_types.len();
        inner
            .signal_types
            .retain(|st| !(st.slug == slug && st.sem_ver == sem_ver));
        if inner.signal_types.len() == before {
            return Err(SignalsdError::NotFound(format!(
                "signal type {slug}/v{sem_ver} not found"
            )));
        }
        Ok(())
    }

    async fn in_use_paths_for_isns(
        &self,
        isn_ids: &[Uuid],
    ) -> StoreResult<Vec<(Uuid, String)>> {
        let inner = self.inner.lock();
        let mut paths: Vec<_> = inner
            .signal_types
            .iter()
            .filter(|st| st.is_in_use && isn_ids.contains(&st.isn_id))
            .map(|st| (st.isn_id, signal_type_path(&st.slug, st.sem_ver)))
            .collect();
        paths.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(paths)
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn open_batch(
        &self,
        isn_id: Uuid,
        account_id: Uuid,
    ) -> StoreResult<(SignalBatch, Option<SignalBatch>)> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let mut closed = None;
        if let Some(previous) = inner
            .batches
            .values_mut()
            .find(|b| b.isn_id == isn_id && b.account_id == account_id && b.is_latest)
        {
            previous.is_latest = false;
            previous.closed_at = Some(now);
            closed = Some(previous.clone());
        }
        let batch = SignalBatch {
            id: Uuid::new_v4(),
            isn_id,
            account_id,
            created_at: now,
            closed_at: None,
            is_latest: true,
        };
        inner.batches.insert(batch.id, batch.clone());
        Ok((batch, closed))
    }

    async fn latest_batch(
        &self,
        isn_id: Uuid,
        account_id: Uuid,
    ) -> StoreResult<Option<SignalBatch>> {
        let inner = self.inner.lock();
        Ok(inner
            .batches
            .values()
            .find(|b| b.isn_id == isn_id && b.account_id == account_id && b.is_latest)
            .cloned())
    }

    async fn get_or_create_latest_batch(
        &self,
        isn_id: Uuid,
        account_id: Uuid,
    ) -> StoreResult<SignalBatch> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .batches
            .values()
            .find(|b| b.isn_id == isn_id && b.account_id == account_id && b.is_latest)
        {
            return Ok(existing.clone());
        }
        let batch = SignalBatch {
            id: Uuid::new_v4(),
            isn_id,
            account_id,
            created_at: Utc::now(),
            closed_at: None,
            is_latest: true,
        };
        inner.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn batch_by_id(&self, id: Uuid) -> StoreResult<Option<SignalBatch>> {
        Ok(self.inner.lock().batches.get(&id).cloned())
    }

    async fn open_batches_for(&self, account_id: Uuid) -> StoreResult<Vec<SignalBatch>> {
        let inner = self.inner.lock();
        Ok(inner
            .batches
            .values()
            .filter(|b| b.account_id == account_id && b.is_latest && b.closed_at.is_none())
            .cloned()
            .collect())
    }

    async fn search_batches(&self, filter: BatchSearchFilter) -> StoreResult<Vec<SignalBatch>> {
        let inner = self.inner.lock();
        let mut batches: Vec<_> = inner
            .batches
            .values()
            .filter(|b| b.isn_id == filter.isn_id)
            .filter(|b| filter.account_id.is_none_or(|a| b.account_id == a))
            .filter(|b| !filter.latest || b.is_latest)
            .filter(|b| !filter.previous || !b.is_latest)
            .filter(|b| filter.created_after.is_none_or(|t| b.created_at >= t))
            .filter(|b| filter.created_before.is_none_or(|t| b.created_at <= t))
            .filter(|b| {
                filter
                    .closed_after
                    .is_none_or(|t| b.closed_at.is_some_and(|c| c >= t))
            })
            .filter(|b| {
                filter
                    .closed_before
                    .is_none_or(|t| b.closed_at.is_some_and(|c| c <= t))
            })
            .cloned()
            .collect();
        batches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(batches)
    }

    async fn batch_stored_counts(&self, batch_id: Uuid) -> StoreResult<Vec<BatchStoredCount>> {
        let inner = self.inner.lock();
        let mut counts: HashMap<(String, SemVer), i64> = HashMap::new();
        for version in inner.versions.iter().filter(|v| v.signal_batch_id == batch_id) {
            if let Some(signal) = inner.signals.get(&version.signal_id) {
                *counts
                    .entry((signal.signal_type_slug.clone(), signal.sem_ver))
                    .or_default() += 1;
            }
        }
        let mut rows: Vec<_> = counts
            .into_iter()
            .map(|((slug, sem_ver), stored_count)| BatchStoredCount {
                signal_type_slug: slug,
                sem_ver,
                stored_count,
            })
            .collect();
        rows.sort_by(|a, b| {
            a.signal_type_slug
                .cmp(&b.signal_type_slug)
                .then(a.sem_ver.cmp(&b.sem_ver))
        });
        Ok(rows)
    }

    async fn batch_failures(&self, batch_id: Uuid) -> StoreResult<Vec<LedgerFailure>> {
        let inner = self.inner.lock();
        let Some(batch) = inner.batches.get(&batch_id) else {
            return Ok(Vec::new());
        };
        let mut failures = Vec::new();
        for f in inner.failures.iter().filter(|f| f.signal_batch_id == batch_id) {
            let resolved = inner
                .signal_by_master_key(batch.account_id, &f.signal_type_slug, f.sem_ver, &f.local_ref)
                .and_then(|id| inner.latest_version(id))
                .is_some_and(|v| v.created_at >= f.created_at);
            failures.push(LedgerFailure {
                signal_type_slug: f.signal_type_slug.clone(),
                sem_ver: f.sem_ver,
                local_ref: f.local_ref.clone(),
                error_code: f.error_code,
                error_message: f.error_message.clone(),
                created_at: f.created_at,
                resolved,
            });
        }
        failures.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(failures)
    }

    async fn record_processing_failure(
        &self,
        failure: SignalProcessingFailure,
    ) -> StoreResult<()> {
        self.inner.lock().failures.push(failure);
        Ok(())
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn store_signal_version(&self, write: SignalWrite) -> StoreResult<StoredSignal> {
        let mut inner = self.inner.lock();
        let now = Utc::now();

        let signal_id = match inner.signal_by_master_key(
            write.account_id,
            &write.signal_type_slug,
            write.sem_ver,
            &write.local_ref,
        ) {
            Some(id) => {
                let signal = inner.signals.get_mut(&id).expect("master key resolved");
                match (signal.correlation_id, write.correlation_id) {
                    (Some(existing), Some(submitted)) if existing != submitted => {
                        return Err(SignalsdError::InvalidCorrelationId(format!(
                            "signal {:?} is already correlated to {existing}",
                            write.local_ref
                        )));
                    }
                    (None, Some(submitted)) => signal.correlation_id = Some(submitted),
                    _ => {}
                }
                signal.is_withdrawn = false;
                id
            }
            None => {
                let signal = Signal {
                    id: Uuid::new_v4(),
                    account_id: write.account_id,
                    signal_type_slug: write.signal_type_slug.clone(),
                    sem_ver: write.sem_ver,
                    local_ref: write.local_ref.clone(),
                    correlation_id: write.correlation_id,
                    is_withdrawn: false,
                    created_at: now,
                };
                let id = signal.id;
                inner.signals.insert(id, signal);
                id
            }
        };

        let version = SignalVersion {
            id: Uuid::new_v4(),
            signal_id,
            signal_batch_id: write.batch_id,
            version_number: inner.latest_version_number(signal_id) + 1,
            content: write.content,
            created_at: now,
        };
        let receipt = StoredSignal {
            local_ref: write.local_ref,
            signal_id,
            signal_version_id: version.id,
            version_number: version.version_number,
        };
        inner.versions.push(version);
        Ok(receipt)
    }

    async fn signal_in_isn(&self, signal_id: Uuid, isn_id: Uuid) -> StoreResult<Option<Signal>> {
        let inner = self.inner.lock();
        let Some(signal) = inner.signals.get(&signal_id) else {
            return Ok(None);
        };
        let in_isn = inner.signal_types.iter().any(|st| {
            st.isn_id == isn_id
                && st.slug == signal.signal_type_slug
                && st.sem_ver == signal.sem_ver
        });
        Ok(in_isn.then(|| signal.clone()))
    }

    async fn set_signal_withdrawn(
        &self,
        account_id: Uuid,
        slug: &str,
        sem_ver: SemVer,
        local_ref: &str,
        withdrawn: bool,
    ) -> StoreResult<Option<Signal>> {
        let mut inner = self.inner.lock();
        let Some(id) = inner.signal_by_master_key(account_id, slug, sem_ver, local_ref) else {
            return Ok(None);
        };
        let signal = inner.signals.get_mut(&id).expect("master key resolved");
        signal.is_withdrawn = withdrawn;
        Ok(Some(signal.clone()))
    }

    async fn search_signals(
        &self,
        filter: SignalSearchFilter,
    ) -> StoreResult<Vec<SignalWithLatest>> {
        let inner = self.inner.lock();
        let mut hits: Vec<SignalWithLatest> = inner
            .signals
            .values()
            .filter(|s| {
                s.signal_type_slug == filter.signal_type_slug && s.sem_ver == filter.sem_ver
            })
            .filter(|s| filter.include_withdrawn || !s.is_withdrawn)
            .filter(|s| filter.account_id.is_none_or(|a| s.account_id == a))
            .filter(|s| filter.signal_id.is_none_or(|id| s.id == id))
            .filter(|s| {
                filter
                    .local_ref
                    .as_deref()
                    .is_none_or(|r| s.local_ref == r)
            })
            .filter_map(|s| inner.with_latest(s))
            .filter(|hit| filter.start_date.is_none_or(|t| hit.created_at >= t))
            .filter(|hit| filter.end_date.is_none_or(|t| hit.created_at <= t))
            .collect();
        hits.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.signal_id.cmp(&b.signal_id)));
        Ok(hits)
    }

    async fn correlated_signals(&self, ids: &[Uuid]) -> StoreResult<Vec<SignalWithLatest>> {
        let inner = self.inner.lock();
        let mut hits: Vec<SignalWithLatest> = inner
            .signals
            .values()
            .filter(|s| s.correlation_id.is_some_and(|target| ids.contains(&target)))
            .filter_map(|s| inner.with_latest(s))
            .collect();
        hits.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.signal_id.cmp(&b.signal_id)));
        Ok(hits)
    }

    async fn previous_versions(&self, ids: &[Uuid]) -> StoreResult<Vec<SignalVersion>> {
        let inner = self.inner.lock();
        let mut versions: Vec<SignalVersion> = ids
            .iter()
            .flat_map(|id| {
                let latest = inner.latest_version_number(*id);
                inner
                    .versions
                    .iter()
                    .filter(move |v| v.signal_id == *id && v.version_number < latest)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        versions.sort_by(|a, b| {
            a.signal_id
                .cmp(&b.signal_id)
                .then(a.version_number.cmp(&b.version_number))
        });
        Ok(versions)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
