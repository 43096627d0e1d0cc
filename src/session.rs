//! Security Tokens and Token Refresh (AC-12, IA-2)
//!
//! A [`SecurityToken`] is what the host persists in its session after a
//! successful login. The crate never owns cookies or session storage; it
//! reads and writes tokens through the [`TokenStorage`] trait.
//!
//! # Refresh
//!
//! When a merchant user's record changes out of band (status, profile data,
//! password), [`SecurityTokenUpdater`] re-fetches the record and replaces the
//! principal in the stored token. There is no live link between the session
//! and the user store; every refresh is an explicit re-fetch.
//!
//! | Situation | Result |
//! |-----------|--------|
//! | merchant role not granted | `Unchanged` |
//! | record unchanged | `Unchanged` |
//! | profile data changed | `Updated(token)` |
//! | user gone, blocked, or password changed | `Revoked` (token cleared) |
//!
//! # Usage
//!
//! ```ignore
//! let updater = SecurityTokenUpdater::new(provider, ROLE_MERCHANT_USER);
//! let checker = TokenRoleChecker::new(&storage);
//!
//! match updater.refresh(&storage, &checker)? {
//!     TokenRefresh::Revoked => { /* redirect to login */ }
//!     _ => {}
//! }
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::crypto::{constant_time_str_eq, credential_fingerprint};
use crate::error::{ProviderError, StoreError};
use crate::observability::SecurityEvent;
use crate::principal::MerchantUser;
use crate::provider::MerchantUserProvider;
use crate::user::UserRecord;

// ============================================================================
// Security Token
// ============================================================================

/// Authenticated session state for one merchant user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityToken {
    /// Firewall zone that issued the token
    pub firewall: String,
    /// Authenticated principal
    pub principal: MerchantUser,
    /// Fingerprint of the password hash at login time
    pub credential_fingerprint: String,
    /// When the user authenticated
    pub authenticated_at: DateTime<Utc>,
}

impl SecurityToken {
    /// Issue a token for a freshly authenticated principal
    pub fn new(
        firewall: impl Into<String>,
        principal: MerchantUser,
        credential_fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            firewall: firewall.into(),
            principal,
            credential_fingerprint: credential_fingerprint.into(),
            authenticated_at: Utc::now(),
        }
    }

    /// Login identity of the principal
    pub fn username(&self) -> &str {
        self.principal.username()
    }
}

// ============================================================================
// Host Interfaces
// ============================================================================

/// Per-session token slot provided by the host
pub trait TokenStorage: Send + Sync {
    /// Current token, if authenticated
    fn get(&self) -> Option<SecurityToken>;

    /// Store a token
    fn set(&self, token: SecurityToken);

    /// Remove the token
    fn clear(&self);
}

/// In-memory token slot, for tests and request-scoped use
#[derive(Debug, Default)]
pub struct InMemoryTokenStorage {
    token: RwLock<Option<SecurityToken>>,
}

impl InMemoryTokenStorage {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot holding a token
    pub fn with_token(token: SecurityToken) -> Self {
        Self {
            token: RwLock::new(Some(token)),
        }
    }
}

impl TokenStorage for InMemoryTokenStorage {
    fn get(&self) -> Option<SecurityToken> {
        self.token.read().clone()
    }

    fn set(&self, token: SecurityToken) {
        *self.token.write() = Some(token);
    }

    fn clear(&self) {
        *self.token.write() = None;
    }
}

/// Answers "does the current session hold this role"
pub trait AuthorizationChecker {
    /// Whether the role is granted
    fn is_granted(&self, role: &str) -> bool;
}

/// Checks roles against the principal in a token storage
pub struct TokenRoleChecker<'a> {
    storage: &'a dyn TokenStorage,
}

impl<'a> TokenRoleChecker<'a> {
    /// Check roles of the token held by `storage`
    pub fn new(storage: &'a dyn TokenStorage) -> Self {
        Self { storage }
    }
}

impl AuthorizationChecker for TokenRoleChecker<'_> {
    fn is_granted(&self, role: &str) -> bool {
        self.storage
            .get()
            .is_some_and(|token| token.principal.has_role(role))
    }
}

// ============================================================================
// Token Updater
// ============================================================================

/// Outcome of a token refresh
#[derive(Debug, Clone, PartialEq)]
pub enum TokenRefresh {
    /// The principal changed; the new token has been stored
    Updated(SecurityToken),
    /// Nothing to do
    Unchanged,
    /// The user can no longer log in; the token has been cleared
    Revoked,
}

/// Re-synchronizes the stored principal with the user store
#[derive(Debug, Clone)]
pub struct SecurityTokenUpdater {
    provider: MerchantUserProvider,
    role: String,
}

impl SecurityTokenUpdater {
    /// Create an updater acting on sessions that hold `role`
    pub fn new(provider: MerchantUserProvider, role: impl Into<String>) -> Self {
        Self {
            provider,
            role: role.into(),
        }
    }

    /// Re-fetch the user and replace the stored principal if it changed
    pub fn refresh(
        &self,
        storage: &dyn TokenStorage,
        checker: &dyn AuthorizationChecker,
    ) -> Result<TokenRefresh, StoreError> {
        if !checker.is_granted(&self.role) {
            return Ok(TokenRefresh::Unchanged);
        }
        let Some(token) = storage.get() else {
            return Ok(TokenRefresh::Unchanged);
        };

        match self.provider.refresh(token.username()) {
            Ok(record) => Ok(self.apply(storage, token, record)),
            Err(ProviderError::NotFound) | Err(ProviderError::Restricted(_)) => {
                Ok(revoke(storage, &token, "user no longer resolvable"))
            }
            Err(ProviderError::Store(err)) => Err(err),
        }
    }

    /// Replace the stored principal with an explicitly supplied record.
    ///
    /// Used when the host has just saved the record itself and wants the
    /// session to follow without another lookup.
    pub fn update_with(
        &self,
        storage: &dyn TokenStorage,
        checker: &dyn AuthorizationChecker,
        record: UserRecord,
    ) -> TokenRefresh {
        if !checker.is_granted(&self.role) {
            return TokenRefresh::Unchanged;
        }
        let Some(token) = storage.get() else {
            return TokenRefresh::Unchanged;
        };
        if record.username != token.username() {
            tracing::warn!(
                session_user = %token.username(),
                record_user = %record.username,
                "Ignoring token update for a different user"
            );
            return TokenRefresh::Unchanged;
        }
        if !record.is_active() {
            return revoke(storage, &token, "account no longer active");
        }

        self.apply(storage, token, record)
    }

    fn apply(
        &self,
        storage: &dyn TokenStorage,
        token: SecurityToken,
        record: UserRecord,
    ) -> TokenRefresh {
        let fingerprint = credential_fingerprint(&record.password_hash);
        if !constant_time_str_eq(&fingerprint, &token.credential_fingerprint) {
            return revoke(storage, &token, "credential changed");
        }

        let principal = token.principal.with_user(record);
        if principal == token.principal {
            return TokenRefresh::Unchanged;
        }

        let updated = SecurityToken { principal, ..token };
        storage.set(updated.clone());
        tracing::debug!(username = %updated.username(), "Security token refreshed");
        TokenRefresh::Updated(updated)
    }
}

fn revoke(storage: &dyn TokenStorage, token: &SecurityToken, reason: &'static str) -> TokenRefresh {
    storage.clear();
    crate::security_event!(
        SecurityEvent::SessionDestroyed,
        username = %token.username(),
        firewall = %token.firewall,
        reason = reason,
        "Security token revoked"
    );
    TokenRefresh::Revoked
}
