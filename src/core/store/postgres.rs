// src/core/store/postgres.rs

//! The Postgres implementation of the persistence port, built on runtime
//! sqlx queries. Composite operations run under [`PostgresStore::with_tx`]:
//! commit exactly once on the success path, rollback unconditionally
//! otherwise. Per-master version numbering is serialized with `FOR UPDATE`
//! on the signal row plus a unique `(signal_id, version_number)` index.

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
use futures::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded forward-only migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| SignalsdError::Database(format!("migration failed: {e}")))
    }

    /// Scopes `op` in a transaction: commit once on success, rollback on any
    /// error (a rollback failure is ignored; the connection is dropped).
    async fn with_tx<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut Transaction<'static, Postgres>) -> BoxFuture<'c, StoreResult<T>>
            + Send,
    {
        let mut tx = self.pool.begin().await?;
        match op(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }
}

fn parse_enum<T>(raw: &str) -> Result<T, SignalsdError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|e| SignalsdError::Database(format!("unexpected stored value {raw:?}: {e}")))
}

// --- Row mappers ---

fn map_account(row: &PgRow) -> StoreResult<Account> {
    Ok(Account {
        id: row.try_get("id")?,
        account_type: parse_enum(row.try_get::<String, _>("account_type")?.as_str())?,
        account_role: parse_enum(row.try_get::<String, _>("account_role")?.as_str())?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_user(row: &PgRow) -> StoreResult<User> {
    Ok(User {
        account_id: row.try_get("account_id")?,
        email: row.try_get("email")?,
        hashed_password: row.try_get("hashed_password")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_service_account(row: &PgRow) -> StoreResult<ServiceAccount> {
    Ok(ServiceAccount {
        account_id: row.try_get("account_id")?,
        client_id: row.try_get("client_id")?,
        client_organization: row.try_get("client_organization")?,
        client_contact_email: row.try_get("client_contact_email")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_client_secret(row: &PgRow) -> StoreResult<ClientSecret> {
    Ok(ClientSecret {
        id: row.try_get("id")?,
        service_account_account_id: row.try_get("service_account_account_id")?,
        hashed_secret: row.try_get("hashed_secret")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}

fn map_refresh_token(row: &PgRow) -> StoreResult<RefreshToken> {
    Ok(RefreshToken {
        hashed_token: row.try_get("hashed_token")?,
        account_id: row.try_get("account_id")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}

fn map_password_reset(row: &PgRow) -> StoreResult<PasswordResetToken> {
    Ok(PasswordResetToken {
        id: row.try_get("id")?,
        user_account_id: row.try_get("user_account_id")?,
        created_by_admin_id: row.try_get("created_by_admin_id")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn map_isn(row: &PgRow) -> StoreResult<Isn> {
    Ok(Isn {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        title: row.try_get("title")?,
        detail: row.try_get("detail")?,
        visibility: parse_enum(row.try_get::<String, _>("visibility")?.as_str())?,
        is_in_use: row.try_get("is_in_use")?,
        owner_account_id: row.try_get("owner_account_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_signal_type(row: &PgRow) -> StoreResult<SignalType> {
    Ok(SignalType {
        id: row.try_get("id")?,
        isn_id: row.try_get("isn_id")?,
        slug: row.try_get("slug")?,
        sem_ver: parse_enum(row.try_get::<String, _>("sem_ver")?.as_str())?,
        schema_url: row.try_get("schema_url")?,
        schema_content: row.try_get("schema_content")?,
        title: row.try_get("title")?,
        detail: row.try_get("detail")?,
        readme_url: row.try_get("readme_url")?,
        is_in_use: row.try_get("is_in_use")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_batch(row: &PgRow) -> StoreResult<SignalBatch> {
    Ok(SignalBatch {
        id: row.try_get("id")?,
        isn_id: row.try_get("isn_id")?,
        account_id: row.try_get("account_id")?,
        created_at: row.try_get("created_at")?,
        closed_at: row.try_get("closed_at")?,
        is_latest: row.try_get("is_latest")?,
    })
}

fn map_signal(row: &PgRow) -> StoreResult<Signal> {
    Ok(Signal {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        signal_type_slug: row.try_get("signal_type_slug")?,
        sem_ver: parse_enum(row.try_get::<String, _>("sem_ver")?.as_str())?,
        local_ref: row.try_get("local_ref")?,
        correlation_id: row.try_get("correlation_id")?,
        is_withdrawn: row.try_get("is_withdrawn")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_version(row: &PgRow) -> StoreResult<SignalVersion> {
    Ok(SignalVersion {
        id: row.try_get("id")?,
        signal_id: row.try_get("signal_id")?,
        signal_batch_id: row.try_get("signal_batch_id")?,
        version_number: row.try_get("version_number")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_signal_with_latest(row: &PgRow) -> StoreResult<SignalWithLatest> {
    Ok(SignalWithLatest {
        signal_id: row.try_get("signal_id")?,
        account_id: row.try_get("account_id")?,
        email: row.try_get("email")?,
        signal_type_slug: row.try_get("signal_type_slug")?,
        sem_ver: parse_enum(row.try_get::<String, _>("sem_ver")?.as_str())?,
        local_ref: row.try_get("local_ref")?,
        correlation_id: row.try_get("correlation_id")?,
        is_withdrawn: row.try_get("is_withdrawn")?,
        signal_version_id: row.try_get("signal_version_id")?,
        version_number: row.try_get("version_number")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    })
}

const SIGNAL_WITH_LATEST_SELECT: &str = r#"
SELECT s.id AS signal_id, s.account_id, u.email, s.signal_type_slug, s.sem_ver,
       s.local_ref, s.correlation_id, s.is_withdrawn,
       v.id AS signal_version_id, v.version_number, v.content, v.created_at
FROM signals s
JOIN LATERAL (
    SELECT id, version_number, content, created_at
    FROM signal_versions
    WHERE signal_id = s.id
    ORDER BY version_number DESC
    LIMIT 1
) v ON TRUE
LEFT JOIN users u ON u.account_id = s.account_id
"#;

#[async_trait]
impl AccountStore for PostgresStore {
    async fn create_user(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> StoreResult<(Account, User)> {
        let email = email.to_string();
        let hashed_password = hashed_password.to_string();
        self.with_tx(move |tx| {
            Box::pin(async move {
                // Serialize first-user detection so only one owner can exist.
                sqlx::query("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE")
                    .execute(&mut **tx)
                    .await?;
                let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM users")
                    .fetch_one(&mut **tx)
                    .await?
                    .try_get("n")?;
                let role = if count == 0 {
                    AccountRole::Owner
                } else {
                    AccountRole::Member
                };
                let account_id = Uuid::new_v4();
                let account_row = sqlx::query(
                    "INSERT INTO accounts (id, account_type, account_role, is_active, created_at)
                     VALUES ($1, $2, $3, TRUE, now()) RETURNING *",
                )
                .bind(account_id)
                .bind(AccountType::User.to_string())
                .bind(role.to_string())
                .fetch_one(&mut **tx)
                .await?;
                let user_row = sqlx::query(
                    "INSERT INTO users (account_id, email, hashed_password, created_at)
                     VALUES ($1, $2, $3, now()) RETURNING *",
                )
                .bind(account_id)
                .bind(&email)
                .bind(&hashed_password)
                .fetch_one(&mut **tx)
                .await?;
                Ok((map_account(&account_row)?, map_user(&user_row)?))
            })
        })
        .await
    }

    async fn account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_account).transpose()
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<(Account, User)>> {
        let row = sqlx::query(
            "SELECT a.id, a.account_type, a.account_role, a.is_active, a.created_at,
                    u.account_id, u.email, u.hashed_password, u.created_at AS user_created_at
             FROM users u JOIN accounts a ON a.id = u.account_id
             WHERE u.email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let account = map_account(&row)?;
                let user = User {
                    account_id: row.try_get("account_id")?,
                    email: row.try_get("email")?,
                    hashed_password: row.try_get("hashed_password")?,
                    created_at: row.try_get("user_created_at")?,
                };
                Ok(Some((account, user)))
            }
        }
    }

    async fn user_by_account_id(&self, account_id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_user).transpose()
    }

    async fn set_account_active(&self, account_id: Uuid, active: bool) -> StoreResult<Account> {
        self.with_tx(move |tx| {
            Box::pin(async move {
                let row = sqlx::query("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
                    .bind(account_id)
                    .fetch_optional(&mut **tx)
                    .await?
                    .ok_or_else(|| SignalsdError::NotFound("account not found".to_string()))?;
                let account = map_account(&row)?;
                if account.account_role == AccountRole::Owner && !active {
                    return Err(SignalsdError::Forbidden(
                        "the site owner account cannot be disabled".to_string(),
                    ));
                }
                if !active {
                    sqlx::query(
                        "UPDATE refresh_tokens SET revoked_at = now()
                         WHERE account_id = $1 AND revoked_at IS NULL",
                    )
                    .bind(account_id)
                    .execute(&mut **tx)
                    .await?;
                    sqlx::query(
                        "UPDATE client_secrets SET revoked_at = now()
                         WHERE service_account_account_id = $1
                           AND (revoked_at IS NULL OR revoked_at > now())",
                    )
                    .bind(account_id)
                    .execute(&mut **tx)
                    .await?;
                }
                let row = sqlx::query(
                    "UPDATE accounts SET is_active = $2 WHERE id = $1 RETURNING *",
                )
                .bind(account_id)
                .bind(active)
                .fetch_one(&mut **tx)
                .await?;
                map_account(&row)
            })
        })
        .await
    }

    async fn update_user_password(
        &self,
        account_id: Uuid,
        hashed_password: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET hashed_password = $2 WHERE account_id = $1")
            .bind(account_id)
            .bind(hashed_password)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SignalsdError::NotFound("user not found".to_string()));
        }
        Ok(())
    }

    async fn emails_for_accounts(
        &self,
        account_ids: &[Uuid],
    ) -> StoreResult<Vec<(Uuid, String)>> {
        let rows = sqlx::query("SELECT account_id, email FROM users WHERE account_id = ANY($1)")
            .bind(account_ids)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| Ok((row.try_get("account_id")?, row.try_get("email")?)))
            .collect()
    }
}

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn create_service_account(
        &self,
        client_id: &str,
        organization: &str,
        contact_email: &str,
        one_time: OneTimeClientSecret,
    ) -> StoreResult<(Account, ServiceAccount)> {
        let client_id = client_id.to_string();
        let organization = organization.to_string();
        let contact_email = contact_email.to_string();
        self.with_tx(move |tx| {
            Box::pin(async move {
                let account_id = Uuid::new_v4();
                let account_row = sqlx::query(
                    "INSERT INTO accounts (id, account_type, account_role, is_active, created_at)
                     VALUES ($1, $2, $3, TRUE, now()) RETURNING *",
                )
                .bind(account_id)
                .bind(AccountType::ServiceAccount.to_string())
                .bind(AccountRole::Member.to_string())
                .fetch_one(&mut **tx)
                .await?;
                let sa_row = sqlx::query(
                    "INSERT INTO service_accounts
                         (account_id, client_id, client_organization, client_contact_email, created_at)
                     VALUES ($1, $2, $3, $4, now()) RETURNING *",
                )
                .bind(account_id)
                .bind(&client_id)
                .bind(&organization)
                .bind(&contact_email)
                .fetch_one(&mut **tx)
                .await?;
                sqlx::query(
                    "INSERT INTO one_time_client_secrets
                         (id, service_account_account_id, plaintext_secret, expires_at)
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(one_time.id)
                .bind(account_id)
                .bind(&one_time.plaintext_secret)
                .bind(one_time.expires_at)
                .execute(&mut **tx)
                .await?;
                Ok((map_account(&account_row)?, map_service_account(&sa_row)?))
            })
        })
        .await
    }

    async fn service_account_by_client_id(
        &self,
        client_id: &str,
    ) -> StoreResult<Option<(Account, ServiceAccount)>> {
        let row = sqlx::query(
            "SELECT a.id, a.account_type, a.account_role, a.is_active, a.created_at,
                    s.account_id, s.client_id, s.client_organization, s.client_contact_email,
                    s.created_at AS sa_created_at
             FROM service_accounts s JOIN accounts a ON a.id = s.account_id
             WHERE s.client_id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let account = map_account(&row)?;
                let sa = ServiceAccount {
                    account_id: row.try_get("account_id")?,
                    client_id: row.try_get("client_id")?,
                    client_organization: row.try_get("client_organization")?,
                    client_contact_email: row.try_get("client_contact_email")?,
                    created_at: row.try_get("sa_created_at")?,
                };
                Ok(Some((account, sa)))
            }
        }
    }

    async fn service_account_by_org_contact(
        &self,
        organization: &str,
        contact_email: &str,
    ) -> StoreResult<Option<ServiceAccount>> {
        let row = sqlx::query(
            "SELECT * FROM service_accounts
             WHERE client_organization = $1 AND client_contact_email = $2",
        )
        .bind(organization)
        .bind(contact_email)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_service_account).transpose()
    }

    async fn service_account_by_account_id(
        &self,
        account_id: Uuid,
    ) -> StoreResult<Option<ServiceAccount>> {
        let row = sqlx::query("SELECT * FROM service_accounts WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_service_account).transpose()
    }

    async fn client_id_exists(&self, client_id: &str) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM service_accounts WHERE client_id = $1) AS present",
        )
        .bind(client_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("present")?)
    }

    async fn insert_one_time_secret(&self, secret: OneTimeClientSecret) -> StoreResult<()> {
        self.with_tx(move |tx| {
            Box::pin(async move {
                sqlx::query(
                    "DELETE FROM one_time_client_secrets WHERE service_account_account_id = $1",
                )
                .bind(secret.service_account_account_id)
                .execute(&mut **tx)
                .await?;
                sqlx::query(
                    "INSERT INTO one_time_client_secrets
                         (id, service_account_account_id, plaintext_secret, expires_at)
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(secret.id)
                .bind(secret.service_account_account_id)
                .bind(&secret.plaintext_secret)
                .bind(secret.expires_at)
                .execute(&mut **tx)
                .await?;
                Ok(())
            })
        })
        .await
    }

    async fn one_time_secret_by_id(&self, id: Uuid) -> StoreResult<Option<OneTimeClientSecret>> {
        let row = sqlx::query("SELECT * FROM one_time_client_secrets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => Ok(Some(OneTimeClientSecret {
                id: row.try_get("id")?,
                service_account_account_id: row.try_get("service_account_account_id")?,
                plaintext_secret: row.try_get("plaintext_secret")?,
                expires_at: row.try_get("expires_at")?,
            })),
        }
    }

    async fn consume_one_time_secret(
        &self,
        id: Uuid,
        secret: ClientSecret,
    ) -> StoreResult<ServiceAccount> {
        self.with_tx(move |tx| {
            Box::pin(async move {
                let deleted = sqlx::query(
                    "DELETE FROM one_time_client_secrets WHERE id = $1
                     RETURNING service_account_account_id",
                )
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?
                .ok_or_else(|| {
                    SignalsdError::ResourceExpired("setup secret already used".to_string())
                })?;
                let account_id: Uuid = deleted.try_get("service_account_account_id")?;
                sqlx::query(
                    "INSERT INTO client_secrets
                         (id, service_account_account_id, hashed_secret, created_at, expires_at, revoked_at)
                     VALUES ($1, $2, $3, $4, $5, NULL)",
                )
                .bind(secret.id)
                .bind(account_id)
                .bind(&secret.hashed_secret)
                .bind(secret.created_at)
                .bind(secret.expires_at)
                .execute(&mut **tx)
                .await?;
                let row = sqlx::query("SELECT * FROM service_accounts WHERE account_id = $1")
                    .bind(account_id)
                    .fetch_one(&mut **tx)
                    .await?;
                map_service_account(&row)
            })
        })
        .await
    }

    async fn client_secrets_for(&self, account_id: Uuid) -> StoreResult<Vec<ClientSecret>> {
        let rows = sqlx::query(
            "SELECT * FROM client_secrets
             WHERE service_account_account_id = $1 AND expires_at > now()",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_client_secret).collect()
    }

    async fn rotate_client_secrets(
        &self,
        account_id: Uuid,
        revoke_at: DateTime<Utc>,
        replacement: ClientSecret,
    ) -> StoreResult<()> {
        self.with_tx(move |tx| {
            Box::pin(async move {
                sqlx::query(
                    "UPDATE client_secrets SET revoked_at = $2
                     WHERE service_account_account_id = $1 AND revoked_at IS NULL",
                )
                .bind(account_id)
                .bind(revoke_at)
                .execute(&mut **tx)
                .await?;
                sqlx::query(
                    "INSERT INTO client_secrets
                         (id, service_account_account_id, hashed_secret, created_at, expires_at, revoked_at)
                     VALUES ($1, $2, $3, $4, $5, NULL)",
                )
                .bind(replacement.id)
                .bind(account_id)
                .bind(&replacement.hashed_secret)
                .bind(replacement.created_at)
                .bind(replacement.expires_at)
                .execute(&mut **tx)
                .await?;
                Ok(())
            })
        })
        .await
    }

    async fn revoke_client_secrets(&self, account_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE client_secrets SET revoked_at = now()
             WHERE service_account_account_id = $1
               AND (revoked_at IS NULL OR revoked_at > now())",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_refresh_token(&self, token: RefreshToken) -> StoreResult<()> {
        self.with_tx(move |tx| {
            Box::pin(async move {
                sqlx::query(
                    "UPDATE refresh_tokens SET revoked_at = now()
                     WHERE account_id = $1 AND revoked_at IS NULL",
                )
                .bind(token.account_id)
                .execute(&mut **tx)
                .await?;
                sqlx::query(
                    "INSERT INTO refresh_tokens
                         (hashed_token, account_id, created_at, expires_at, revoked_at)
                     VALUES ($1, $2, $3, $4, NULL)",
                )
                .bind(&token.hashed_token)
                .bind(token.account_id)
                .bind(token.created_at)
                .bind(token.expires_at)
                .execute(&mut **tx)
                .await?;
                Ok(())
            })
        })
        .await
    }

    async fn refresh_token_by_hash(&self, hashed: &str) -> StoreResult<Option<RefreshToken>> {
        let row = sqlx::query("SELECT * FROM refresh_tokens WHERE hashed_token = $1")
            .bind(hashed)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_refresh_token).transpose()
    }

    async fn revoke_refresh_tokens(&self, account_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now()
             WHERE account_id = $1 AND revoked_at IS NULL",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_password_reset(&self, token: PasswordResetToken) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO password_reset_tokens
                 (id, user_account_id, created_by_admin_id, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(token.id)
        .bind(token.user_account_id)
        .bind(token.created_by_admin_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn password_reset_by_id(&self, id: Uuid) -> StoreResult<Option<PasswordResetToken>> {
        let row = sqlx::query("SELECT * FROM password_reset_tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_password_reset).transpose()
    }

    async fn consume_password_reset(&self, id: Uuid, hashed_password: &str) -> StoreResult<bool> {
        let hashed_password = hashed_password.to_string();
        self.with_tx(move |tx| {
            Box::pin(async move {
                let deleted = sqlx::query(
                    "DELETE FROM password_reset_tokens WHERE id = $1 RETURNING user_account_id",
                )
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;
                let Some(row) = deleted else {
                    return Ok(false);
                };
                let user_account_id: Uuid = row.try_get("user_account_id")?;
                sqlx::query("UPDATE users SET hashed_password = $2 WHERE account_id = $1")
                    .bind(user_account_id)
                    .bind(&hashed_password)
                    .execute(&mut **tx)
                    .await?;
                Ok(true)
            })
        })
        .await
    }

    async fn delete_expired_credentials(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let one_time = sqlx::query("DELETE FROM one_time_client_secrets WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        let resets = sqlx::query("DELETE FROM password_reset_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(one_time.rows_affected() + resets.rows_affected())
    }
}

#[async_trait]
impl IsnStore for PostgresStore {
    async fn insert_isn(&self, isn: Isn) -> StoreResult<Isn> {
        let row = sqlx::query(
            "INSERT INTO isns (id, slug, title, detail, visibility, is_in_use, owner_account_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(isn.id)
        .bind(&isn.slug)
        .bind(&isn.title)
        .bind(&isn.detail)
        .bind(isn.visibility.to_string())
        .bind(isn.is_in_use)
        .bind(isn.owner_account_id)
        .bind(isn.created_at)
        .fetch_one(&self.pool)
        .await?;
        map_isn(&row)
    }

    async fn isn_by_slug(&self, slug: &str) -> StoreResult<Option<Isn>> {
        let row = sqlx::query("SELECT * FROM isns WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_isn).transpose()
    }

    async fn update_isn(&self, isn: Isn) -> StoreResult<Isn> {
        let row = sqlx::query(
            "UPDATE isns SET title = $2, detail = $3, visibility = $4, is_in_use = $5
             WHERE id = $1 RETURNING *",
        )
        .bind(isn.id)
        .bind(&isn.title)
        .bind(&isn.detail)
        .bind(isn.visibility.to_string())
        .bind(isn.is_in_use)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SignalsdError::NotFound("ISN not found".to_string()))?;
        map_isn(&row)
    }

    async fn delete_isn(&self, isn_id: Uuid) -> StoreResult<()> {
        self.with_tx(move |tx| {
            Box::pin(async move {
                let referenced: bool = sqlx::query(
                    "SELECT EXISTS (
                         SELECT 1 FROM signals s
                         JOIN signal_types st
                           ON st.slug = s.signal_type_slug AND st.sem_ver = s.sem_ver
                         WHERE st.isn_id = $1
                     ) AS present",
                )
                .bind(isn_id)
                .fetch_one(&mut **tx)
                .await?
                .try_get("present")?;
                if referenced {
                    return Err(SignalsdError::ResourceInUse(
                        "ISN has stored signals and cannot be deleted".to_string(),
                    ));
                }
                sqlx::query(
                    "DELETE FROM signal_processing_failures
                     WHERE signal_batch_id IN (SELECT id FROM signal_batches WHERE isn_id = $1)",
                )
                .bind(isn_id)
                .execute(&mut **tx)
                .await?;
                sqlx::query("DELETE FROM signal_batches WHERE isn_id = $1")
                    .bind(isn_id)
                    .execute(&mut **tx)
                    .await?;
                sqlx::query("DELETE FROM signal_types WHERE isn_id = $1")
                    .bind(isn_id)
                    .execute(&mut **tx)
                    .await?;
                sqlx::query("DELETE FROM isn_accounts WHERE isn_id = $1")
                    .bind(isn_id)
                    .execute(&mut **tx)
                    .await?;
                let result = sqlx::query("DELETE FROM isns WHERE id = $1")
                    .bind(isn_id)
                    .execute(&mut **tx)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(SignalsdError::NotFound("ISN not found".to_string()));
                }
                Ok(())
            })
        })
        .await
    }

    async fn list_isns(&self) -> StoreResult<Vec<Isn>> {
        let rows = sqlx::query("SELECT * FROM isns ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_isn).collect()
    }

    async fn upsert_isn_permission(
        &self,
        isn_id: Uuid,
        account_id: Uuid,
        permission: Permission,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO isn_accounts (isn_id, account_id, permission) VALUES ($1, $2, $3)
             ON CONFLICT (isn_id, account_id) DO UPDATE SET permission = EXCLUDED.permission",
        )
        .bind(isn_id)
        .bind(account_id)
        .bind(permission.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_isn_permission(&self, isn_id: Uuid, account_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM isn_accounts WHERE isn_id = $1 AND account_id = $2")
            .bind(isn_id)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn isn_permissions_for(
        &self,
        account_id: Uuid,
    ) -> StoreResult<Vec<(Isn, Permission)>> {
        let rows = sqlx::query(
            "SELECT i.*, p.permission AS granted_permission
             FROM isn_accounts p JOIN isns i ON i.id = p.isn_id
             WHERE p.account_id = $1
             ORDER BY i.slug",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let isn = map_isn(row)?;
                let permission =
                    parse_enum(row.try_get::<String, _>("granted_permission")?.as_str())?;
                Ok((isn, permission))
            })
            .collect()
    }

    async fn public_isn_paths(&self) -> StoreResult<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT i.slug AS isn_slug, st.slug AS type_slug, st.sem_ver
             FROM isns i
             JOIN accounts a ON a.id = i.owner_account_id
             JOIN signal_types st ON st.isn_id = i.id
             WHERE i.visibility = 'public' AND i.is_in_use AND a.is_active AND st.is_in_use",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let isn_slug: String = row.try_get("isn_slug")?;
                let type_slug: String = row.try_get("type_slug")?;
                let sem_ver: SemVer = parse_enum(row.try_get::<String, _>("sem_ver")?.as_str())?;
                Ok((isn_slug, signal_type_path(&type_slug, sem_ver)))
            })
            .collect()
    }
}

#[async_trait]
impl SignalTypeStore for PostgresStore {
    async fn insert_signal_type(&self, signal_type: SignalType) -> StoreResult<SignalType> {
        let row = sqlx::query(
            "INSERT INTO signal_types
                 (id, isn_id, slug, sem_ver, schema_url, schema_content, title, detail,
                  readme_url, is_in_use, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING *",
        )
        .bind(signal_type.id)
        .bind(signal_type.isn_id)
        .bind(&signal_type.slug)
        .bind(signal_type.sem_ver.to_string())
        .bind(&signal_type.schema_url)
        .bind(&signal_type.schema_content)
        .bind(&signal_type.title)
        .bind(&signal_type.detail)
        .bind(&signal_type.readme_url)
        .bind(signal_type.is_in_use)
        .bind(signal_type.created_at)
        .fetch_one(&self.pool)
        .await?;
        map_signal_type(&row)
    }

    async fn signal_types_by_slug(&self, slug: &str) -> StoreResult<Vec<SignalType>> {
        let rows = sqlx::query("SELECT * FROM signal_types WHERE slug = $1")
            .bind(slug)
            .fetch_all(&self.pool)
            .await?;
        let mut types: Vec<SignalType> = rows
            .iter()
            .map(map_signal_type)
            .collect::<StoreResult<_>>()?;
        types.sort_by_key(|st| st.sem_ver);
        Ok(types)
    }

    async fn signal_type_by_path(
        &self,
        slug: &str,
        sem_ver: SemVer,
    ) -> StoreResult<Option<SignalType>> {
        let row = sqlx::query("SELECT * FROM signal_types WHERE slug = $1 AND sem_ver = $2")
            .bind(slug)
            .bind(sem_ver.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_signal_type).transpose()
    }

    async fn list_signal_types(&self, isn_id: Uuid) -> StoreResult<Vec<SignalType>> {
        let rows = sqlx::query("SELECT * FROM signal_types WHERE isn_id = $1 ORDER BY slug")
            .bind(isn_id)
            .fetch_all(&self.pool)
            .await?;
        let mut types: Vec<SignalType> = rows
            .iter()
            .map(map_signal_type)
            .collect::<StoreResult<_>>()?;
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
        let row = sqlx::query(
            "UPDATE signal_types
             SET readme_url = COALESCE($3, readme_url),
                 detail = COALESCE($4, detail),
                 is_in_use = COALESCE($5, is_in_use)
             WHERE slug = $1 AND sem_ver = $2
             RETURNING *",
        )
        .bind(slug)
        .bind(sem_ver.to_string())
        .bind(readme_url)
        .bind(detail)
        .bind(is_in_use)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_signal_type).transpose()
    }

    async fn delete_signal_type(&self, slug: &str, sem_ver: SemVer) -> StoreResult<()> {
        let slug = slug.to_string();
        self.with_tx(move |tx| {
            Box::pin(async move {
                let referenced: bool = sqlx::query(
                    "SELECT EXISTS (
                         SELECT 1 FROM signals WHERE signal_type_slug = $1 AND sem_ver = $2
                     ) AS present",
                )
                .bind(&slug)
                .bind(sem_ver.to_string())
                .fetch_one(&mut **tx)
                .await?
                .try_get("present")?;
                if referenced {
                    return Err(SignalsdError::ResourceInUse(format!(
                        "signal type {slug}/v{sem_ver} has signals and cannot be deleted"
                    )));
                }
                let result = sqlx::query("DELETE FROM signal_types WHERE slug = $1 AND sem_ver = $2")
                    .bind(&slug)
                    .bind(sem_ver.to_string())
                    .execute(&mut **tx)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(SignalsdError::NotFound(format!(
                        "signal type {slug}/v{sem_ver} not found"
                    )));
                }
                Ok(())
            })
        })
        .await
    }

    async fn in_use_paths_for_isns(
        &self,
        isn_ids: &[Uuid],
    ) -> StoreResult<Vec<(Uuid, String)>> {
        let rows = sqlx::query(
            "SELECT isn_id, slug, sem_ver FROM signal_types
             WHERE isn_id = ANY($1) AND is_in_use
             ORDER BY slug, sem_ver",
        )
        .bind(isn_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let isn_id: Uuid = row.try_get("isn_id")?;
                let slug: String = row.try_get("slug")?;
                let sem_ver: SemVer = parse_enum(row.try_get::<String, _>("sem_ver")?.as_str())?;
                Ok((isn_id, signal_type_path(&slug, sem_ver)))
            })
            .collect()
    }
}

#[async_trait]
impl BatchStore for PostgresStore {
    async fn open_batch(
        &self,
        isn_id: Uuid,
        account_id: Uuid,
    ) -> StoreResult<(SignalBatch, Option<SignalBatch>)> {
        self.with_tx(move |tx| {
            Box::pin(async move {
                let closed = sqlx::query(
                    "UPDATE signal_batches SET is_latest = FALSE, closed_at = now()
                     WHERE isn_id = $1 AND account_id = $2 AND is_latest
                     RETURNING *",
                )
                .bind(isn_id)
                .bind(account_id)
                .fetch_optional(&mut **tx)
                .await?;
                let closed = closed.as_ref().map(map_batch).transpose()?;
                let row = sqlx::query(
                    "INSERT INTO signal_batches (id, isn_id, account_id, created_at, closed_at, is_latest)
                     VALUES ($1, $2, $3, now(), NULL, TRUE) RETURNING *",
                )
                .bind(Uuid::new_v4())
                .bind(isn_id)
                .bind(account_id)
                .fetch_one(&mut **tx)
                .await?;
                Ok((map_batch(&row)?, closed))
            })
        })
        .await
    }

    async fn latest_batch(
        &self,
        isn_id: Uuid,
        account_id: Uuid,
    ) -> StoreResult<Option<SignalBatch>> {
        let row = sqlx::query(
            "SELECT * FROM signal_batches WHERE isn_id = $1 AND account_id = $2 AND is_latest",
        )
        .bind(isn_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_batch).transpose()
    }

    async fn get_or_create_latest_batch(
        &self,
        isn_id: Uuid,
        account_id: Uuid,
    ) -> StoreResult<SignalBatch> {
        self.with_tx(move |tx| {
            Box::pin(async move {
                let inserted = sqlx::query(
                    "INSERT INTO signal_batches (id, isn_id, account_id, created_at, closed_at, is_latest)
                     VALUES ($1, $2, $3, now(), NULL, TRUE)
                     ON CONFLICT (isn_id, account_id) WHERE is_latest DO NOTHING
                     RETURNING *",
                )
                .bind(Uuid::new_v4())
                .bind(isn_id)
                .bind(account_id)
                .fetch_optional(&mut **tx)
                .await?;
                let row = match inserted {
                    Some(row) => row,
                    None => {
                        sqlx::query(
                            "SELECT * FROM signal_batches
                             WHERE isn_id = $1 AND account_id = $2 AND is_latest",
                        )
                        .bind(isn_id)
                        .bind(account_id)
                        .fetch_one(&mut **tx)
                        .await?
                    }
                };
                map_batch(&row)
            })
        })
        .await
    }

    async fn batch_by_id(&self, id: Uuid) -> StoreResult<Option<SignalBatch>> {
        let row = sqlx::query("SELECT * FROM signal_batches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_batch).transpose()
    }

    async fn open_batches_for(&self, account_id: Uuid) -> StoreResult<Vec<SignalBatch>> {
        let rows = sqlx::query(
            "SELECT * FROM signal_batches
             WHERE account_id = $1 AND is_latest AND closed_at IS NULL",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_batch).collect()
    }

    async fn search_batches(&self, filter: BatchSearchFilter) -> StoreResult<Vec<SignalBatch>> {
        let rows = sqlx::query(
            "SELECT * FROM signal_batches
             WHERE isn_id = $1
               AND ($2::uuid IS NULL OR account_id = $2)
               AND (NOT $3::boolean OR is_latest)
               AND (NOT $4::boolean OR NOT is_latest)
               AND ($5::timestamptz IS NULL OR created_at >= $5)
               AND ($6::timestamptz IS NULL OR created_at <= $6)
               AND ($7::timestamptz IS NULL OR closed_at >= $7)
               AND ($8::timestamptz IS NULL OR closed_at <= $8)
             ORDER BY created_at, id",
        )
        .bind(filter.isn_id)
        .bind(filter.account_id)
        .bind(filter.latest)
        .bind(filter.previous)
        .bind(filter.created_after)
        .bind(filter.created_before)
        .bind(filter.closed_after)
        .bind(filter.closed_before)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_batch).collect()
    }

    async fn batch_stored_counts(&self, batch_id: Uuid) -> StoreResult<Vec<BatchStoredCount>> {
        let rows = sqlx::query(
            "SELECT s.signal_type_slug, s.sem_ver, COUNT(*) AS stored_count
             FROM signal_versions v JOIN signals s ON s.id = v.signal_id
             WHERE v.signal_batch_id = $1
             GROUP BY s.signal_type_slug, s.sem_ver
             ORDER BY s.signal_type_slug, s.sem_ver",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(BatchStoredCount {
                    signal_type_slug: row.try_get("signal_type_slug")?,
                    sem_ver: parse_enum(row.try_get::<String, _>("sem_ver")?.as_str())?,
                    stored_count: row.try_get("stored_count")?,
                })
            })
            .collect()
    }

    async fn batch_failures(&self, batch_id: Uuid) -> StoreResult<Vec<LedgerFailure>> {
        let rows = sqlx::query(
            "SELECT f.signal_type_slug, f.sem_ver, f.local_ref, f.error_code, f.error_message,
                    f.created_at,
                    EXISTS (
                        SELECT 1 FROM signals s
                        JOIN signal_versions v ON v.signal_id = s.id
                        WHERE s.account_id = b.account_id
                          AND s.signal_type_slug = f.signal_type_slug
                          AND s.sem_ver = f.sem_ver
                          AND s.local_ref = f.local_ref
                          AND v.created_at >= f.created_at
                    ) AS resolved
             FROM signal_processing_failures f
             JOIN signal_batches b ON b.id = f.signal_batch_id
             WHERE f.signal_batch_id = $1
             ORDER BY f.created_at",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(LedgerFailure {
                    signal_type_slug: row.try_get("signal_type_slug")?,
                    sem_ver: parse_enum(row.try_get::<String, _>("sem_ver")?.as_str())?,
                    local_ref: row.try_get("local_ref")?,
                    error_code: parse_enum(row.try_get::<String, _>("error_code")?.as_str())?,
                    error_message: row.try_get("error_message")?,
                    created_at: row.try_get("created_at")?,
                    resolved: row.try_get("resolved")?,
                })
            })
            .collect()
    }

    async fn record_processing_failure(
        &self,
        failure: SignalProcessingFailure,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO signal_processing_failures
                 (signal_batch_id, signal_type_slug, sem_ver, local_ref, error_code,
                  error_message, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(failure.signal_batch_id)
        .bind(&failure.signal_type_slug)
        .bind(failure.sem_ver.to_string())
        .bind(&failure.local_ref)
        .bind(failure.error_code.to_string())
        .bind(&failure.error_message)
        .bind(failure.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SignalStore for PostgresStore {
    async fn store_signal_version(&self, write: SignalWrite) -> StoreResult<StoredSignal> {
        self.with_tx(move |tx| {
            Box::pin(async move {
                // Upsert-then-lock: the DO NOTHING insert either creates the
                // master (leaving it locked by this transaction) or loses the
                // race, in which case the select takes the row lock. Either
                // way the version append below is serialized per master.
                let inserted = sqlx::query(
                    "INSERT INTO signals
                         (id, account_id, signal_type_slug, sem_ver, local_ref, correlation_id,
                          is_withdrawn, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, FALSE, now())
                     ON CONFLICT (account_id, signal_type_slug, sem_ver, local_ref) DO NOTHING
                     RETURNING id, correlation_id",
                )
                .bind(Uuid::new_v4())
                .bind(write.account_id)
                .bind(&write.signal_type_slug)
                .bind(write.sem_ver.to_string())
                .bind(&write.local_ref)
                .bind(write.correlation_id)
                .fetch_optional(&mut **tx)
                .await?;

                let signal_id = match inserted {
                    Some(row) => row.try_get::<Uuid, _>("id")?,
                    None => {
                        let row = sqlx::query(
                            "SELECT id, correlation_id FROM signals
                             WHERE account_id = $1 AND signal_type_slug = $2
                               AND sem_ver = $3 AND local_ref = $4
                             FOR UPDATE",
                        )
                        .bind(write.account_id)
                        .bind(&write.signal_type_slug)
                        .bind(write.sem_ver.to_string())
                        .bind(&write.local_ref)
                        .fetch_one(&mut **tx)
                        .await?;
                        let id: Uuid = row.try_get("id")?;
                        let existing: Option<Uuid> = row.try_get("correlation_id")?;
                        match (existing, write.correlation_id) {
                            (Some(have), Some(want)) if have != want => {
                                return Err(SignalsdError::InvalidCorrelationId(format!(
                                    "signal {:?} is already correlated to {have}",
                                    write.local_ref
                                )));
                            }
                            (None, Some(want)) => {
                                sqlx::query(
                                    "UPDATE signals SET correlation_id = $2 WHERE id = $1",
                                )
                                .bind(id)
                                .bind(want)
                                .execute(&mut **tx)
                                .await?;
                            }
                            _ => {}
                        }
                        sqlx::query("UPDATE signals SET is_withdrawn = FALSE WHERE id = $1")
                            .bind(id)
                            .execute(&mut **tx)
                            .await?;
                        id
                    }
                };

                let version_row = sqlx::query(
                    "INSERT INTO signal_versions
                         (id, signal_id, signal_batch_id, version_number, content, created_at)
                     SELECT $1, $2, $3, COALESCE(MAX(version_number), 0) + 1, $4, now()
                     FROM signal_versions WHERE signal_id = $2
                     RETURNING id, version_number",
                )
                .bind(Uuid::new_v4())
                .bind(signal_id)
                .bind(write.batch_id)
                .bind(&write.content)
                .fetch_one(&mut **tx)
                .await?;

                Ok(StoredSignal {
                    local_ref: write.local_ref,
                    signal_id,
                    signal_version_id: version_row.try_get("id")?,
                    version_number: version_row.try_get("version_number")?,
                })
            })
        })
        .await
    }

    async fn signal_in_isn(&self, signal_id: Uuid, isn_id: Uuid) -> StoreResult<Option<Signal>> {
        let row = sqlx::query(
            "SELECT s.* FROM signals s
             JOIN signal_types st
               ON st.slug = s.signal_type_slug AND st.sem_ver = s.sem_ver
             WHERE s.id = $1 AND st.isn_id = $2",
        )
        .bind(signal_id)
        .bind(isn_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_signal).transpose()
    }

    async fn set_signal_withdrawn(
        &self,
        account_id: Uuid,
        slug: &str,
        sem_ver: SemVer,
        local_ref: &str,
        withdrawn: bool,
    ) -> StoreResult<Option<Signal>> {
        let row = sqlx::query(
            "UPDATE signals SET is_withdrawn = $5
             WHERE account_id = $1 AND signal_type_slug = $2 AND sem_ver = $3 AND local_ref = $4
             RETURNING *",
        )
        .bind(account_id)
        .bind(slug)
        .bind(sem_ver.to_string())
        .bind(local_ref)
        .bind(withdrawn)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_signal).transpose()
    }

    async fn search_signals(
        &self,
        filter: SignalSearchFilter,
    ) -> StoreResult<Vec<SignalWithLatest>> {
        let sql = format!(
            "{SIGNAL_WITH_LATEST_SELECT}
             WHERE s.signal_type_slug = $1 AND s.sem_ver = $2
               AND ($3::uuid IS NULL OR s.account_id = $3)
               AND ($4::uuid IS NULL OR s.id = $4)
               AND ($5::text IS NULL OR s.local_ref = $5)
               AND ($6::boolean OR NOT s.is_withdrawn)
               AND ($7::timestamptz IS NULL OR v.created_at >= $7)
               AND ($8::timestamptz IS NULL OR v.created_at <= $8)
             ORDER BY v.created_at, s.id"
        );
        let rows = sqlx::query(&sql)
            .bind(&filter.signal_type_slug)
            .bind(filter.sem_ver.to_string())
            .bind(filter.account_id)
            .bind(filter.signal_id)
            .bind(filter.local_ref)
            .bind(filter.include_withdrawn)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_signal_with_latest).collect()
    }

    async fn correlated_signals(&self, ids: &[Uuid]) -> StoreResult<Vec<SignalWithLatest>> {
        let sql = format!(
            "{SIGNAL_WITH_LATEST_SELECT}
             WHERE s.correlation_id = ANY($1)
             ORDER BY v.created_at, s.id"
        );
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&self.pool).await?;
        rows.iter().map(map_signal_with_latest).collect()
    }

    async fn previous_versions(&self, ids: &[Uuid]) -> StoreResult<Vec<SignalVersion>> {
        let rows = sqlx::query(
            "SELECT v.* FROM signal_versions v
             WHERE v.signal_id = ANY($1)
               AND v.version_number < (
                   SELECT MAX(version_number) FROM signal_versions x
                   WHERE x.signal_id = v.signal_id
               )
             ORDER BY v.signal_id, v.version_number",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_version).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
