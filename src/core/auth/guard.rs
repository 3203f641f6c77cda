// src/core/auth/guard.rs

//! Authorization gates evaluated against the claims payload alone.

use crate::core::SignalsdError;
use crate::core::auth::claims::{AccessTokenClaims, IsnClaim};
use crate::core::model::{AccountRole, AccountType, Permission};

/// Requires that the caller holds one of the listed roles. The owner passes
/// every role gate.
pub fn require_role(
    claims: &AccessTokenClaims,
    allowed: &[AccountRole],
) -> Result<(), SignalsdError> {
    if claims.role == AccountRole::Owner || allowed.contains(&claims.role) {
        return Ok(());
    }
    Err(SignalsdError::Forbidden(format!(
        "requires one of the roles: {}",
        allowed
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

/// Requires an interactive user rather than a service account.
pub fn require_user_account(claims: &AccessTokenClaims) -> Result<(), SignalsdError> {
    if claims.account_type != AccountType::User {
        return Err(SignalsdError::Forbidden(
            "this operation is limited to user accounts".to_string(),
        ));
    }
    Ok(())
}

/// Requires that the claims carry at least `needed` on the ISN. A `write`
/// grant satisfies a `read` requirement.
pub fn require_isn_permission<'c>(
    claims: &'c AccessTokenClaims,
    isn_slug: &str,
    needed: Permission,
) -> Result<&'c IsnClaim, SignalsdError> {
    let claim = claims.isn_perms.get(isn_slug).ok_or_else(|| {
        SignalsdError::Forbidden(format!("no permission on ISN {isn_slug:?}"))
    })?;
    let satisfied = match needed {
        Permission::Read => true,
        Permission::Write => claim.permission == Permission::Write,
    };
    if !satisfied {
        return Err(SignalsdError::Forbidden(format!(
            "requires {needed} permission on ISN {isn_slug:?}"
        )));
    }
    Ok(claim)
}

/// Requires the permission and that the signal-type path is addressable in
/// the caller's claims for the ISN.
pub fn require_signal_type_path<'c>(
    claims: &'c AccessTokenClaims,
    isn_slug: &str,
    signal_type_path: &str,
    needed: Permission,
) -> Result<&'c IsnClaim, SignalsdError> {
    let claim = require_isn_permission(claims, isn_slug, needed)?;
    if !claim
        .signal_type_paths
        .iter()
        .any(|p| p == signal_type_path)
    {
        return Err(SignalsdError::Forbidden(format!(
            "signal type {signal_type_path:?} is not available on ISN {isn_slug:?}"
        )));
    }
    Ok(claim)
}
