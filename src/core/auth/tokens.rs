// src/core/auth/tokens.rs

//! Token primitives: JWT signing and parsing for access tokens, and the
//! opaque random tokens used for refresh tokens and client secrets. Opaque
//! tokens are stored only as SHA-256 digests.

use crate::core::SignalsdError;
use crate::core::auth::claims::AccessTokenClaims;
use chrono::Duration;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

pub fn access_token_ttl() -> Duration {
    Duration::minutes(30)
}

pub fn refresh_token_ttl() -> Duration {
    Duration::days(30)
}

/// Signs and parses access-token JWTs with the symmetric process secret.
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenSigner {
    pub fn new(secret_key: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret_key.as_bytes()),
            decoding: DecodingKey::from_secret(secret_key.as_bytes()),
        }
    }

    pub fn sign(&self, claims: &AccessTokenClaims) -> Result<String, SignalsdError> {
        Ok(encode(&Header::default(), claims, &self.encoding)?)
    }

    /// Parses and verifies a token. An expired token surfaces as
    /// `AccessTokenExpired` so clients can distinguish it from other
    /// authentication failures.
    pub fn parse(&self, token: &str) -> Result<AccessTokenClaims, SignalsdError> {
        let data = decode::<AccessTokenClaims>(token, &self.decoding, &Validation::default())?;
        Ok(data.claims)
    }
}

/// Generates a 256-bit opaque token, hex-encoded.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The digest under which an opaque token is stored and looked up.
pub fn hash_opaque_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
