//! Merchant User Principal
//!
//! The authenticated identity held in the session: the resolved
//! [`UserRecord`] plus a non-empty set of roles.
//!
//! A principal never carries hash material. The record's password hash is
//! cleared on construction; session tokens keep a fingerprint instead.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::user::UserRecord;

/// Role granted to every authenticated merchant user
pub const ROLE_MERCHANT_USER: &str = "ROLE_MERCHANT_USER";

/// Errors constructing a principal
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PrincipalError {
    /// A principal must carry at least one role
    #[error("a principal requires at least one role")]
    NoRoles,

    /// Role names must not be blank
    #[error("role name must not be blank")]
    BlankRole,
}

/// An authenticated merchant user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredPrincipal")]
pub struct MerchantUser {
    user: UserRecord,
    roles: BTreeSet<String>,
}

// Session data is untrusted input; the role invariant is re-checked on load
#[derive(Deserialize)]
struct StoredPrincipal {
    user: UserRecord,
    roles: BTreeSet<String>,
}

impl TryFrom<StoredPrincipal> for MerchantUser {
    type Error = PrincipalError;

    fn try_from(stored: StoredPrincipal) -> Result<Self, Self::Error> {
        Self::new(stored.user, stored.roles)
    }
}

impl MerchantUser {
    /// Create a principal with the given roles
    pub fn new<I, S>(mut user: UserRecord, roles: I) -> Result<Self, PrincipalError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: BTreeSet<String> = roles.into_iter().map(Into::into).collect();
        if roles.is_empty() {
            return Err(PrincipalError::NoRoles);
        }
        if roles.iter().any(|r| r.trim().is_empty()) {
            return Err(PrincipalError::BlankRole);
        }
        user.password_hash.clear();
        Ok(Self { user, roles })
    }

    /// Create a principal with exactly one role
    pub fn with_role(user: UserRecord, role: impl Into<String>) -> Result<Self, PrincipalError> {
        Self::new(user, [role.into()])
    }

    /// Login identity
    pub fn username(&self) -> &str {
        &self.user.username
    }

    /// Underlying user record
    pub fn user(&self) -> &UserRecord {
        &self.user
    }

    /// Granted roles, sorted
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    /// Check for a role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Same roles, fresh user record
    pub(crate) fn with_user(&self, mut user: UserRecord) -> Self {
        user.password_hash.clear();
        Self {
            user,
            roles: self.roles.clone(),
        }
    }
}
