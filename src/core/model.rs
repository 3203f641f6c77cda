// src/core/model.rs

//! Domain entities shared by the persistence port, the services, and the
//! HTTP layer. All enums serialize as snake_case strings, which is also how
//! the Postgres adapter stores them.

use crate::core::ident::SemVer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccountType {
    User,
    ServiceAccount,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccountRole {
    Owner,
    Admin,
    Member,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

/// One registered principal. Exactly one account exists per user or service
/// account; the first registered user is the site owner.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub account_type: AccountType,
    pub account_role: AccountRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub account_id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceAccount {
    pub account_id: Uuid,
    pub client_id: String,
    pub client_organization: String,
    pub client_contact_email: String,
    pub created_at: DateTime<Utc>,
}

/// A hashed client-credentials secret. During the rotation grace window a
/// service account may hold several secrets whose `revoked_at` lies in the
/// near future; authentication accepts any of them until that instant.
#[derive(Debug, Clone)]
pub struct ClientSecret {
    pub id: Uuid,
    pub service_account_account_id: Uuid,
    pub hashed_secret: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ClientSecret {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now && self.revoked_at.is_none_or(|t| t > now)
    }
}

/// Holds the plaintext secret between service-account registration and the
/// single setup request that exchanges it for a hashed `ClientSecret`.
#[derive(Debug, Clone)]
pub struct OneTimeClientSecret {
    pub id: Uuid,
    pub service_account_account_id: Uuid,
    pub plaintext_secret: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub hashed_token: String,
    pub account_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshToken {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now && self.revoked_at.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct PasswordResetToken {
    pub id: Uuid,
    pub user_account_id: Uuid,
    pub created_by_admin_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// An Information Sharing Network: a visibility-scoped set of signal types
/// and the signals published against them.
#[derive(Debug, Clone, Serialize)]
pub struct Isn {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub detail: String,
    pub visibility: Visibility,
    pub is_in_use: bool,
    pub owner_account_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A versioned schema contract. `(slug, sem_ver)` is unique; the schema is
/// immutable once published.
#[derive(Debug, Clone, Serialize)]
pub struct SignalType {
    pub id: Uuid,
    pub isn_id: Uuid,
    pub slug: String,
    pub sem_ver: SemVer,
    pub schema_url: String,
    #[serde(skip_serializing)]
    pub schema_content: String,
    pub title: String,
    pub detail: String,
    pub readme_url: String,
    pub is_in_use: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IsnAccount {
    pub isn_id: Uuid,
    pub account_id: Uuid,
    pub permission: Permission,
}

/// A per-`(ISN, account)` write ledger. At most one batch is latest per key;
/// opening a new batch closes the previous one.
#[derive(Debug, Clone, Serialize)]
pub struct SignalBatch {
    pub id: Uuid,
    pub isn_id: Uuid,
    pub account_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub is_latest: bool,
}

/// A signal master record, keyed by `(account_id, signal_type_slug, sem_ver,
/// local_ref)`. Re-asserting the key appends a new version to this record.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub id: Uuid,
    pub account_id: Uuid,
    pub signal_type_slug: String,
    pub sem_ver: SemVer,
    pub local_ref: String,
    pub correlation_id: Option<Uuid>,
    pub is_withdrawn: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalVersion {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub signal_batch_id: Uuid,
    pub version_number: i32,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Machine codes for element-level ingest failures, recorded to the ledger
/// rather than terminating the request.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureCode {
    MalformedBody,
    InvalidCorrelationId,
    DatabaseError,
    InternalError,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalProcessingFailure {
    pub signal_batch_id: Uuid,
    pub signal_type_slug: String,
    pub sem_ver: SemVer,
    pub local_ref: String,
    pub error_code: FailureCode,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}
