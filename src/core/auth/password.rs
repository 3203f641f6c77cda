// src/core/auth/password.rs

//! Password hashing with Argon2. The default parameters are tuned so that
//! verification costs a noticeable fraction of a second on server hardware.

use crate::core::SignalsdError;
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

pub const MIN_PASSWORD_LENGTH: usize = 11;

/// Rejects passwords below the minimum length. Length is the only enforced
/// rule; composition requirements are deliberately not imposed.
pub fn validate_password(password: &str) -> Result<(), SignalsdError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(SignalsdError::PasswordTooShort(MIN_PASSWORD_LENGTH));
    }
    Ok(())
}

/// Hashes a password into a PHC string. CPU-bound; call from a blocking
/// context.
pub fn hash_password(password: &str) -> Result<String, SignalsdError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string();
    Ok(hash)
}

/// Verifies a password against a stored PHC string. CPU-bound; call from a
/// blocking context. An unparsable stored hash counts as a mismatch.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong password!", &hash));
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_password("abcdefghij").is_err());
        assert!(validate_password("abcdefghijk").is_ok());
    }
}
