// src/core/auth/service.rs

//! The authentication service: registration, login, refresh-token rotation,
//! client-credentials authentication, service-account setup and secret
//! rotation, and admin-initiated password resets.

use crate::core::SignalsdError;
use crate::core::auth::claims::ClaimsAssembler;
use crate::core::auth::password::{hash_password, validate_password, verify_password};
use crate::core::auth::tokens::{
    TokenSigner, access_token_ttl, generate_opaque_token, hash_opaque_token, refresh_token_ttl,
};
use crate::core::ident::{derive_slug, normalize_email};
use crate::core::model::*;
use crate::core::store::Store;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

fn one_time_secret_ttl() -> Duration {
    Duration::hours(48)
}

fn client_secret_ttl() -> Duration {
    Duration::days(365)
}

fn rotation_grace() -> Duration {
    Duration::minutes(5)
}

fn password_reset_ttl() -> Duration {
    Duration::hours(48)
}

/// The outcome of any token-issuing flow. `refresh_token` is the plaintext,
/// present only for interactive user flows; the handler moves it into the
/// cookie.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: Option<String>,
    pub account: Account,
}

/// What service-account registration hands back: the setup identifier the
/// operator exchanges exactly once for the client secret.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceAccountSetup {
    pub client_id: String,
    pub setup_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// A plaintext client secret, returned exactly once.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IssuedClientSecret {
    pub client_id: String,
    pub client_secret: String,
    pub expires_at: DateTime<Utc>,
}

pub struct AuthService {
    store: Arc<dyn Store>,
    signer: Arc<TokenSigner>,
    assembler: ClaimsAssembler,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, signer: Arc<TokenSigner>) -> Self {
        let assembler = ClaimsAssembler::new(store.clone());
        Self {
            store,
            signer,
            assembler,
        }
    }

    pub fn assembler(&self) -> &ClaimsAssembler {
        &self.assembler
    }

    // --- User registration and login ---

    pub async fn register_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Account, User), SignalsdError> {
        let email = normalize_email(email)?;
        validate_password(password)?;
        let hashed = Self::hash_blocking(password.to_string()).await?;
        let (account, user) = self.store.create_user(&email, &hashed).await?;
        info!(account_id = %account.id, role = %account.account_role, "registered user");
        Ok((account, user))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedTokens, SignalsdError> {
        let email = normalize_email(&email.to_ascii_lowercase())?;
        let Some((account, user)) = self.store.user_by_email(&email).await? else {
            // Burn a verification anyway so the timing of the response does
            // not reveal whether the mailbox is registered.
            let _ = Self::verify_blocking(password.to_string(), dummy_hash()).await;
            return Err(SignalsdError::Authentication(
                "invalid email or password".to_string(),
            ));
        };
        let verified =
            Self::verify_blocking(password.to_string(), user.hashed_password.clone()).await?;
        if !verified {
            return Err(SignalsdError::Authentication(
                "invalid email or password".to_string(),
            ));
        }
        if !account.is_active {
            return Err(SignalsdError::Forbidden("account is disabled".to_string()));
        }
        let access_token = self.mint_access_token(&account).await?;
        let refresh_token = self.issue_refresh_token(account.id).await?;
        Ok(IssuedTokens {
            access_token,
            expires_in: access_token_ttl().num_seconds(),
            refresh_token: Some(refresh_token),
            account,
        })
    }

    /// Revokes the caller's refresh tokens (interactive sign-out).
    pub async fn logout(&self, account_id: Uuid) -> Result<(), SignalsdError> {
        self.store.revoke_refresh_tokens(account_id).await
    }

    // --- Token refresh ---

    pub async fn refresh(&self, presented: &str) -> Result<IssuedTokens, SignalsdError> {
        let hashed = hash_opaque_token(presented);
        let Some(token) = self.store.refresh_token_by_hash(&hashed).await? else {
            return Err(SignalsdError::Authentication(
                "unknown refresh token".to_string(),
            ));
        };
        if token.revoked_at.is_some() {
            return Err(SignalsdError::Authentication(
                "refresh token has been revoked".to_string(),
            ));
        }
        if token.expires_at <= Utc::now() {
            return Err(SignalsdError::RefreshTokenExpired);
        }
        let account = self
            .store
            .account_by_id(token.account_id)
            .await?
            .ok_or_else(|| SignalsdError::Authentication("account not found".to_string()))?;
        if !account.is_active {
            return Err(SignalsdError::Forbidden("account is disabled".to_string()));
        }
        let access_token = self.mint_access_token(&account).await?;
        let refresh_token = self.issue_refresh_token(account.id).await?;
        Ok(IssuedTokens {
            access_token,
            expires_in: access_token_ttl().num_seconds(),
            refresh_token: Some(refresh_token),
            account,
        })
    }

    // --- Client credentials ---

    pub async fn client_credentials(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<IssuedTokens, SignalsdError> {
        let Some((account, _)) = self.store.service_account_by_client_id(client_id).await? else {
            return Err(SignalsdError::Authentication(
                "invalid client credentials".to_string(),
            ));
        };
        if !account.is_active {
            return Err(SignalsdError::Forbidden("account is disabled".to_string()));
        }
        // Any secret still inside its rotation grace window authenticates.
        let now = Utc::now();
        let presented = hash_opaque_token(client_secret);
        let secrets = self.store.client_secrets_for(account.id).await?;
        let matched = secrets
            .iter()
            .filter(|s| s.is_usable(now))
            .any(|s| s.hashed_secret == presented);
        if !matched {
            warn!(client_id, "client credential verification failed");
            return Err(SignalsdError::Authentication(
                "invalid client credentials".to_string(),
            ));
        }
        let access_token = self.mint_access_token(&account).await?;
        Ok(IssuedTokens {
            access_token,
            expires_in: access_token_ttl().num_seconds(),
            refresh_token: None,
            account,
        })
    }

    // --- Service-account lifecycle ---

    /// Registers a service account, or re-issues a setup secret when the
    /// `(organization, contact email)` pair is already registered.
    pub async fn register_service_account(
        &self,
        organization: &str,
        contact_email: &str,
    ) -> Result<ServiceAccountSetup, SignalsdError> {
        let contact_email = normalize_email(contact_email)?;
        let organization = organization.trim();
        if organization.is_empty() {
            return Err(SignalsdError::MalformedBody(
                "client_organization must not be empty".to_string(),
            ));
        }
        let one_time = OneTimeClientSecret {
            id: Uuid::new_v4(),
            service_account_account_id: Uuid::nil(),
            plaintext_secret: generate_opaque_token(),
            expires_at: Utc::now() + one_time_secret_ttl(),
        };

        if let Some(existing) = self
            .store
            .service_account_by_org_contact(organization, &contact_email)
            .await?
        {
            let one_time = OneTimeClientSecret {
                service_account_account_id: existing.account_id,
                ..one_time
            };
            let setup = ServiceAccountSetup {
                client_id: existing.client_id,
                setup_id: one_time.id,
                expires_at: one_time.expires_at,
            };
            self.store.insert_one_time_secret(one_time).await?;
            info!(client_id = %setup.client_id, "re-issued service account setup secret");
            return Ok(setup);
        }

        let client_id = self.derive_client_id(organization).await?;
        let setup = ServiceAccountSetup {
            client_id: client_id.clone(),
            setup_id: one_time.id,
            expires_at: one_time.expires_at,
        };
        self.store
            .create_service_account(&client_id, organization, &contact_email, one_time)
            .await?;
        info!(client_id = %setup.client_id, "registered service account");
        Ok(setup)
    }

    /// A unique client id derived from the organization name; a short random
    /// suffix is appended when the slug is taken.
    async fn derive_client_id(&self, organization: &str) -> Result<String, SignalsdError> {
        let base = format!("sa_{}", derive_slug(organization));
        if !self.store.client_id_exists(&base).await? {
            return Ok(base);
        }
        for _ in 0..4 {
            let candidate = format!("{base}_{}", &generate_opaque_token()[..6]);
            if !self.store.client_id_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(SignalsdError::Internal(
            "could not derive a unique client id".to_string(),
        ))
    }

    /// The single GET that exchanges a one-time setup secret for the stored
    /// client secret. A consumed or expired secret is gone.
    pub async fn consume_setup_secret(
        &self,
        setup_id: Uuid,
    ) -> Result<IssuedClientSecret, SignalsdError> {
        let Some(one_time) = self.store.one_time_secret_by_id(setup_id).await? else {
            return Err(SignalsdError::ResourceExpired(
                "setup secret has already been used or never existed".to_string(),
            ));
        };
        if one_time.expires_at <= Utc::now() {
            return Err(SignalsdError::ResourceExpired(
                "setup secret has expired".to_string(),
            ));
        }
        let now = Utc::now();
        let secret = ClientSecret {
            id: Uuid::new_v4(),
            service_account_account_id: one_time.service_account_account_id,
            hashed_secret: hash_opaque_token(&one_time.plaintext_secret),
            created_at: now,
            expires_at: now + client_secret_ttl(),
            revoked_at: None,
        };
        let expires_at = secret.expires_at;
        let service_account = self.store.consume_one_time_secret(setup_id, secret).await?;
        Ok(IssuedClientSecret {
            client_id: service_account.client_id,
            client_secret: one_time.plaintext_secret,
            expires_at,
        })
    }

    /// Self-service rotation: every current secret keeps working for the
    /// grace window, the replacement is returned exactly once.
    pub async fn rotate_client_secret(
        &self,
        account_id: Uuid,
    ) -> Result<IssuedClientSecret, SignalsdError> {
        let Some(service_account) = self.store.service_account_by_account_id(account_id).await?
        else {
            return Err(SignalsdError::Forbidden(
                "secret rotation is limited to service accounts".to_string(),
            ));
        };
        let now = Utc::now();
        let plaintext = generate_opaque_token();
        let replacement = ClientSecret {
            id: Uuid::new_v4(),
            service_account_account_id: account_id,
            hashed_secret: hash_opaque_token(&plaintext),
            created_at: now,
            expires_at: now + client_secret_ttl(),
            revoked_at: None,
        };
        let expires_at = replacement.expires_at;
        self.store
            .rotate_client_secrets(account_id, now + rotation_grace(), replacement)
            .await?;
        info!(client_id = %service_account.client_id, "rotated client secret");
        Ok(IssuedClientSecret {
            client_id: service_account.client_id,
            client_secret: plaintext,
            expires_at,
        })
    }

    // --- Password reset ---

    pub async fn init_password_reset(
        &self,
        admin_account_id: Uuid,
        user_email: &str,
    ) -> Result<PasswordResetToken, SignalsdError> {
        let email = normalize_email(user_email)?;
        let Some((_, user)) = self.store.user_by_email(&email).await? else {
            return Err(SignalsdError::NotFound(format!(
                "no user registered for {email}"
            )));
        };
        let now = Utc::now();
        let token = PasswordResetToken {
            id: Uuid::new_v4(),
            user_account_id: user.account_id,
            created_by_admin_id: admin_account_id,
            created_at: now,
            expires_at: now + password_reset_ttl(),
        };
        self.store.create_password_reset(token.clone()).await?;
        info!(user_account_id = %user.account_id, "created password reset token");
        Ok(token)
    }

    /// Backs the GET that renders the one-shot reset form.
    pub async fn password_reset_status(
        &self,
        token_id: Uuid,
    ) -> Result<PasswordResetToken, SignalsdError> {
        let Some(token) = self.store.password_reset_by_id(token_id).await? else {
            return Err(SignalsdError::ResourceExpired(
                "reset token has already been used or never existed".to_string(),
            ));
        };
        if token.expires_at <= Utc::now() {
            return Err(SignalsdError::ResourceExpired(
                "reset token has expired".to_string(),
            ));
        }
        Ok(token)
    }

    pub async fn complete_password_reset(
        &self,
        token_id: Uuid,
        new_password: &str,
    ) -> Result<(), SignalsdError> {
        let token = self.password_reset_status(token_id).await?;
        validate_password(new_password)?;
        let hashed = Self::hash_blocking(new_password.to_string()).await?;
        if !self.store.consume_password_reset(token_id, &hashed).await? {
            return Err(SignalsdError::ResourceExpired(
                "reset token has already been used".to_string(),
            ));
        }
        // A reset invalidates outstanding sessions.
        self.store.revoke_refresh_tokens(token.user_account_id).await?;
        Ok(())
    }

    // --- Token minting ---

    pub async fn mint_access_token(&self, account: &Account) -> Result<String, SignalsdError> {
        let claims = self
            .assembler
            .claims_for(account, access_token_ttl())
            .await?;
        self.signer.sign(&claims)
    }

    async fn issue_refresh_token(&self, account_id: Uuid) -> Result<String, SignalsdError> {
        let plaintext = generate_opaque_token();
        let now = Utc::now();
        self.store
            .replace_refresh_token(RefreshToken {
                hashed_token: hash_opaque_token(&plaintext),
                account_id,
                created_at: now,
                expires_at: now + refresh_token_ttl(),
                revoked_at: None,
            })
            .await?;
        Ok(plaintext)
    }

    // --- Blocking helpers for the CPU-bound primitives ---

    async fn hash_blocking(password: String) -> Result<String, SignalsdError> {
        tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| SignalsdError::Internal(format!("hashing task failed: {e}")))?
    }

    async fn verify_blocking(password: String, hash: String) -> Result<bool, SignalsdError> {
        tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| SignalsdError::Internal(format!("hashing task failed: {e}")))
    }
}

/// A syntactically valid Argon2 hash that matches no password, used to keep
/// login timing uniform for unknown mailboxes.
fn dummy_hash() -> String {
    "$argon2id$v=19$m=19456,t=2,p=1$AAAAAAAAAAAAAAAAAAAAAA$\
     AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
        .to_string()
}
