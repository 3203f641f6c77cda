// src/core/store/mod.rs

//! The persistence port: the complete contract between the core services and
//! whatever holds the data.
//!
//! Multi-row mutations are exposed as named composite operations (for
//! example [`BatchStore::open_batch`] or [`SignalStore::store_signal_version`])
//! and every adapter must run each of them atomically. The Postgres adapter
//! scopes them with a `with_tx` helper; the in-memory adapter serializes them
//! behind a process lock.

pub mod memory;
pub mod postgres;

use crate::core::SignalsdError;
use crate::core::ident::SemVer;
use crate::core::model::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

pub type StoreResult<T> = Result<T, SignalsdError>;

/// Parameters for one per-signal write: upsert the master record, append a
/// version, reset withdrawal.
#[derive(Debug, Clone)]
pub struct SignalWrite {
    pub account_id: Uuid,
    pub signal_type_slug: String,
    pub sem_ver: SemVer,
    pub local_ref: String,
    pub correlation_id: Option<Uuid>,
    pub content: Value,
    pub batch_id: Uuid,
}

/// Receipt for a successfully stored signal version.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredSignal {
    pub local_ref: String,
    pub signal_id: Uuid,
    pub signal_version_id: Uuid,
    pub version_number: i32,
}

/// Filters for the latest-version signal search. The `(slug, sem_ver)` pair
/// comes from the URL path; everything else is optional.
#[derive(Debug, Clone, Default)]
pub struct SignalSearchFilter {
    pub signal_type_slug: String,
    pub sem_ver: SemVer,
    pub account_id: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub signal_id: Option<Uuid>,
    pub local_ref: Option<String>,
    pub include_withdrawn: bool,
}

/// A signal master joined with its latest version and the submitter's email
/// (absent for service accounts; stripped again for public responses).
#[derive(Debug, Clone, serde::Serialize)]
pub struct SignalWithLatest {
    pub signal_id: Uuid,
    pub account_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub signal_type_slug: String,
    pub sem_ver: SemVer,
    pub local_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub is_withdrawn: bool,
    pub signal_version_id: Uuid,
    pub version_number: i32,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

/// Filters for batch search. Exactly one of the four modes must be active;
/// the batch manager validates that before reaching the store.
#[derive(Debug, Clone, Default)]
pub struct BatchSearchFilter {
    pub isn_id: Uuid,
    /// When set, only this account's batches are visible.
    pub account_id: Option<Uuid>,
    pub latest: bool,
    pub previous: bool,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub closed_after: Option<DateTime<Utc>>,
    pub closed_before: Option<DateTime<Utc>>,
}

/// Per-`(signal type, sem_ver)` count of versions stored through a batch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchStoredCount {
    pub signal_type_slug: String,
    pub sem_ver: SemVer,
    pub stored_count: i64,
}

/// A ledger failure row, annotated with whether a successful version has
/// since been stored for the same `(account, signal type, local_ref)`.
#[derive(Debug, Clone)]
pub struct LedgerFailure {
    pub signal_type_slug: String,
    pub sem_ver: SemVer,
    pub local_ref: String,
    pub error_code: FailureCode,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Creates a user account. The first user ever created is assigned the
    /// `owner` role; everyone after that is a `member`. Atomic.
    async fn create_user(&self, email: &str, hashed_password: &str)
    -> StoreResult<(Account, User)>;

    async fn account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>>;

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<(Account, User)>>;

    async fn user_by_account_id(&self, account_id: Uuid) -> StoreResult<Option<User>>;

    /// Enables or disables an account. Disabling also revokes all refresh
    /// tokens and client secrets for it, in the same transaction.
    async fn set_account_active(&self, account_id: Uuid, active: bool) -> StoreResult<Account>;

    async fn update_user_password(&self, account_id: Uuid, hashed_password: &str)
    -> StoreResult<()>;

    /// Emails for a set of accounts, keyed by account id. User accounts only.
    async fn emails_for_accounts(&self, account_ids: &[Uuid])
    -> StoreResult<Vec<(Uuid, String)>>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Creates the service account, its backing account row, and the initial
    /// one-time setup secret. Atomic.
    async fn create_service_account(
        &self,
        client_id: &str,
        organization: &str,
        contact_email: &str,
        one_time: OneTimeClientSecret,
    ) -> StoreResult<(Account, ServiceAccount)>;

    async fn service_account_by_client_id(
        &self,
        client_id: &str,
    ) -> StoreResult<Option<(Account, ServiceAccount)>>;

    async fn service_account_by_org_contact(
        &self,
        organization: &str,
        contact_email: &str,
    ) -> StoreResult<Option<ServiceAccount>>;

    async fn service_account_by_account_id(
        &self,
        account_id: Uuid,
    ) -> StoreResult<Option<ServiceAccount>>;

    async fn client_id_exists(&self, client_id: &str) -> StoreResult<bool>;

    /// Replaces any pending setup secret for the account. Atomic.
    async fn insert_one_time_secret(&self, secret: OneTimeClientSecret) -> StoreResult<()>;

    async fn one_time_secret_by_id(&self, id: Uuid) -> StoreResult<Option<OneTimeClientSecret>>;

    /// Exchanges a one-time setup secret for a stored client secret: inserts
    /// the hashed secret and deletes the one-time row. Atomic.
    async fn consume_one_time_secret(
        &self,
        id: Uuid,
        secret: ClientSecret,
    ) -> StoreResult<ServiceAccount>;

    /// All secrets for the account that have not hard-expired. The caller
    /// applies [`ClientSecret::is_usable`] for the rotation grace window.
    async fn client_secrets_for(&self, account_id: Uuid) -> StoreResult<Vec<ClientSecret>>;

    /// Schedule-revokes every current secret at `revoke_at` and inserts the
    /// replacement. Atomic.
    async fn rotate_client_secrets(
        &self,
        account_id: Uuid,
        revoke_at: DateTime<Utc>,
        replacement: ClientSecret,
    ) -> StoreResult<()>;

    async fn revoke_client_secrets(&self, account_id: Uuid) -> StoreResult<()>;

    /// Revokes all active refresh tokens for the account and inserts the
    /// replacement, preserving rotation exclusivity. Atomic.
    async fn replace_refresh_token(&self, token: RefreshToken) -> StoreResult<()>;

    async fn refresh_token_by_hash(&self, hashed: &str) -> StoreResult<Option<RefreshToken>>;

    async fn revoke_refresh_tokens(&self, account_id: Uuid) -> StoreResult<()>;

    async fn create_password_reset(&self, token: PasswordResetToken) -> StoreResult<()>;

    async fn password_reset_by_id(&self, id: Uuid) -> StoreResult<Option<PasswordResetToken>>;

    /// Verifies the token still exists, updates the user's password, and
    /// deletes the token. Atomic. Returns false when the token is gone.
    async fn consume_password_reset(&self, id: Uuid, hashed_password: &str) -> StoreResult<bool>;

    /// Sweeper support: drops expired one-time secrets and reset tokens.
    async fn delete_expired_credentials(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait IsnStore: Send + Sync {
    async fn insert_isn(&self, isn: Isn) -> StoreResult<Isn>;

    async fn isn_by_slug(&self, slug: &str) -> StoreResult<Option<Isn>>;

    async fn update_isn(&self, isn: Isn) -> StoreResult<Isn>;

    /// Deletes an ISN and cascades to its signal types, batches, and
    /// permission grants. Fails with `ResourceInUse` when any signal version
    /// exists under the ISN's signal types. Atomic.
    async fn delete_isn(&self, isn_id: Uuid) -> StoreResult<()>;

    async fn list_isns(&self) -> StoreResult<Vec<Isn>>;

    async fn upsert_isn_permission(
        &self,
        isn_id: Uuid,
        account_id: Uuid,
        permission: Permission,
    ) -> StoreResult<()>;

    async fn remove_isn_permission(&self, isn_id: Uuid, account_id: Uuid) -> StoreResult<()>;

    /// Every `(ISN, permission)` pair granted to the account.
    async fn isn_permissions_for(&self, account_id: Uuid)
    -> StoreResult<Vec<(Isn, Permission)>>;

    /// `(isn_slug, signal_type_path)` pairs for every in-use signal type on
    /// a public, in-use ISN whose owner account is active.
    async fn public_isn_paths(&self) -> StoreResult<Vec<(String, String)>>;
}

#[async_trait]
pub trait SignalTypeStore: Send + Sync {
    async fn insert_signal_type(&self, signal_type: SignalType) -> StoreResult<SignalType>;

    /// All versions registered under a slug, across ISNs. Slugs are unique
    /// per deployment, so at most one ISN is represented.
    async fn signal_types_by_slug(&self, slug: &str) -> StoreResult<Vec<SignalType>>;

    async fn signal_type_by_path(
        &self,
        slug: &str,
        sem_ver: SemVer,
    ) -> StoreResult<Option<SignalType>>;

    async fn list_signal_types(&self, isn_id: Uuid) -> StoreResult<Vec<SignalType>>;

    /// Applies the mutable subset of a signal type: readme, detail, in-use.
    async fn update_signal_type(
        &self,
        slug: &str,
        sem_ver: SemVer,
        readme_url: Option<String>,
        detail: Option<String>,
        is_in_use: Option<bool>,
    ) -> StoreResult<Option<SignalType>>;

    /// Fails with `ResourceInUse` when any signal references the type.
    async fn delete_signal_type(&self, slug: &str, sem_ver: SemVer) -> StoreResult<()>;

    /// `(isn_id, signal_type_path)` pairs for the in-use types of the given
    /// ISNs, in one query.
    async fn in_use_paths_for_isns(&self, isn_ids: &[Uuid])
    -> StoreResult<Vec<(Uuid, String)>>;
}

#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Closes the current latest batch for `(isn, account)` if one exists and
    /// opens a new one. Atomic. Returns the new batch and the closed one.
    async fn open_batch(
        &self,
        isn_id: Uuid,
        account_id: Uuid,
    ) -> StoreResult<(SignalBatch, Option<SignalBatch>)>;

    async fn latest_batch(
        &self,
        isn_id: Uuid,
        account_id: Uuid,
    ) -> StoreResult<Option<SignalBatch>>;

    /// Returns the open latest batch for `(isn, account)`, creating one when
    /// none exists. Atomic; concurrent callers observe the same batch.
    async fn get_or_create_latest_batch(
        &self,
        isn_id: Uuid,
        account_id: Uuid,
    ) -> StoreResult<SignalBatch>;

    async fn batch_by_id(&self, id: Uuid) -> StoreResult<Option<SignalBatch>>;

    /// Open latest batches across all ISNs for one account, for claims.
    async fn open_batches_for(&self, account_id: Uuid) -> StoreResult<Vec<SignalBatch>>;

    async fn search_batches(&self, filter: BatchSearchFilter) -> StoreResult<Vec<SignalBatch>>;

    async fn batch_stored_counts(&self, batch_id: Uuid) -> StoreResult<Vec<BatchStoredCount>>;

    async fn batch_failures(&self, batch_id: Uuid) -> StoreResult<Vec<LedgerFailure>>;

    async fn record_processing_failure(
        &self,
        failure: SignalProcessingFailure,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    /// The per-signal write: inserts or finds the master record by
    /// `(account, signal type, local_ref)`, appends a version with the next
    /// dense version number, and clears any withdrawal. Atomic; concurrent
    /// writers to the same master are serialized by the adapter.
    ///
    /// Re-submission with a correlation id different from the recorded one
    /// fails with `InvalidCorrelationId`.
    async fn store_signal_version(&self, write: SignalWrite) -> StoreResult<StoredSignal>;

    /// Resolves a signal by id, constrained to signal types of the given
    /// ISN. Used for correlation validation.
    async fn signal_in_isn(&self, signal_id: Uuid, isn_id: Uuid) -> StoreResult<Option<Signal>>;

    async fn set_signal_withdrawn(
        &self,
        account_id: Uuid,
        slug: &str,
        sem_ver: SemVer,
        local_ref: &str,
        withdrawn: bool,
    ) -> StoreResult<Option<Signal>>;

    /// Latest version per signal, filtered. Withdrawn masters are omitted
    /// unless the filter says otherwise.
    async fn search_signals(
        &self,
        filter: SignalSearchFilter,
    ) -> StoreResult<Vec<SignalWithLatest>>;

    /// Latest versions of every signal whose correlation target is in `ids`.
    async fn correlated_signals(&self, ids: &[Uuid]) -> StoreResult<Vec<SignalWithLatest>>;

    /// All non-latest versions for the given signals.
    async fn previous_versions(&self, ids: &[Uuid]) -> StoreResult<Vec<SignalVersion>>;

    /// Cheap liveness probe used by the readiness endpoint.
    async fn ping(&self) -> StoreResult<()>;
}

/// The full persistence port. Blanket-implemented for anything that covers
/// every sub-trait, so services depend on `Arc<dyn Store>` alone.
pub trait Store:
    AccountStore + CredentialStore + IsnStore + SignalTypeStore + BatchStore + SignalStore
{
}

impl<T> Store for T where
    T: AccountStore + CredentialStore + IsnStore + SignalTypeStore + BatchStore + SignalStore
{
}
