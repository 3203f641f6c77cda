// src/server/handlers/mod.rs

//! Request handlers, grouped by resource. Handlers stay thin: extract,
//! gate, delegate to a core service, serialize.

pub mod admin;
pub mod auth;
pub mod batches;
pub mod health;
pub mod isns;
pub mod signal_types;
pub mod signals;

use crate::core::SignalsdError;
use crate::core::auth::claims::AccessTokenClaims;
use crate::core::auth::guard;
use crate::core::model::{AccountRole, Isn, Permission};

/// ISN administration: the site owner and admins everywhere, plus the ISN's
/// owning account.
pub fn require_isn_admin(
    claims: &AccessTokenClaims,
    isn: &Isn,
) -> Result<(), SignalsdError> {
    if matches!(claims.role, AccountRole::Owner | AccountRole::Admin)
        || isn.owner_account_id == claims.account_id()
    {
        return Ok(());
    }
    Err(SignalsdError::Forbidden(format!(
        "requires administrative access to ISN {:?}",
        isn.slug
    )))
}

/// Read access to an ISN's metadata: a read or write grant, or admin access.
pub fn require_isn_read(
    claims: &AccessTokenClaims,
    isn: &Isn,
) -> Result<(), SignalsdError> {
    match guard::require_isn_permission(claims, &isn.slug, Permission::Read) {
        Ok(_) => Ok(()),
        Err(denied) => require_isn_admin(claims, isn).map_err(|_| denied),
    }
}
