//! Error Types (SI-11)
//!
//! Errors are split by concern. Only [`AuthenticationFailure`] ever crosses
//! the authenticator boundary; everything raised while resolving a user or
//! validating a secret is folded into it first, so callers cannot tell an
//! unknown account from a wrong password or a blocked one.
//!
//! # Taxonomy
//!
//! | Error | Raised by | Visible to clients as |
//! |-------|-----------|------------------------|
//! | [`StoreError`] | user store, attempt store | `StoreUnavailable` |
//! | [`ProviderError::NotFound`] | user provider | `InvalidCredentials` |
//! | [`ProviderError::Restricted`] | user provider | `InvalidCredentials` |
//! | malformed form input | authenticator | `MalformedCredentials` |

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Infrastructure Errors
// ============================================================================

/// Failure of a backing store (user records or attempt counters).
///
/// These are infrastructure errors, not authentication outcomes. The
/// pipeline never retries them; retry policy belongs to the host.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with data that could not be interpreted
    #[error("store returned corrupt data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::Unavailable`]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }
}

// ============================================================================
// Provider Errors
// ============================================================================

/// Why a login restriction rule vetoed a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionReason {
    /// Too many failed attempts for this identity (AC-7)
    TooManyAttempts,
    /// Too many failed attempts from this source address (AC-7)
    AddressBlocked,
    /// The account exists but is not active
    AccountInactive,
    /// Application specific rule
    Custom(String),
}

impl RestrictionReason {
    /// Stable code for logs
    pub fn code(&self) -> &str {
        match self {
            Self::TooManyAttempts => "too_many_attempts",
            Self::AddressBlocked => "address_blocked",
            Self::AccountInactive => "account_inactive",
            Self::Custom(code) => code,
        }
    }
}

impl fmt::Display for RestrictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors raised while resolving a user record.
///
/// `NotFound` and `Restricted` are internal distinctions, kept for logging.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// No record matched the lookup criteria
    #[error("user not found")]
    NotFound,

    /// A login restriction rule denied the lookup
    #[error("login restricted: {0}")]
    Restricted(RestrictionReason),

    /// The user or attempt store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Authentication Failures
// ============================================================================

/// The only failure categories the authenticator emits.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationFailure {
    /// Identity or secret missing or malformed in the request
    #[error("malformed credentials")]
    MalformedCredentials,

    /// Unknown identity, wrong secret, or blocked account (merged on purpose)
    #[error("invalid credentials")]
    InvalidCredentials,

    /// A backing store failed; the client should try again later
    #[error("authentication store unavailable")]
    StoreUnavailable,
}

impl AuthenticationFailure {
    /// Stable machine readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedCredentials => "malformed_credentials",
            Self::InvalidCredentials => "invalid_credentials",
            Self::StoreUnavailable => "store_unavailable",
        }
    }

    /// Message that is safe to show to the end user.
    ///
    /// Malformed and invalid credentials share one message so the failing
    /// step is never revealed.
    pub fn message(&self) -> &'static str {
        match self {
            Self::MalformedCredentials | Self::InvalidCredentials => "Authentication failed!",
            Self::StoreUnavailable => "Authentication is temporarily unavailable. Please try again.",
        }
    }

    /// Normalize a provider error into a client-visible failure
    pub fn from_provider(err: &ProviderError) -> Self {
        match err {
            ProviderError::NotFound | ProviderError::Restricted(_) => Self::InvalidCredentials,
            ProviderError::Store(_) => Self::StoreUnavailable,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Invalid security configuration, detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A path pattern did not compile
    #[error("invalid path pattern `{pattern}`: {source}")]
    InvalidPattern {
        /// Offending pattern
        pattern: String,
        /// Regex compiler error
        #[source]
        source: regex::Error,
    },

    /// A value could not be parsed
    #[error("invalid value for {key}: `{value}`")]
    InvalidValue {
        /// Setting name
        key: &'static str,
        /// Raw value
        value: String,
    },

    /// Password hashing parameters were rejected
    #[error("invalid hashing parameters: {0}")]
    Hashing(String),
}

// ============================================================================
// JSON Error Body
// ============================================================================

/// JSON error body used by the access middleware
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    pub status: StatusCode,
    /// Error code
    pub error: &'static str,
    /// Human-readable message
    pub message: &'static str,
}

impl ErrorResponse {
    /// Body for a request that lacks the required role
    pub fn access_denied() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            error: "forbidden",
            message: "Access denied",
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_errors_collapse_to_invalid_credentials() {
        assert_eq!(
            AuthenticationFailure::from_provider(&ProviderError::NotFound),
            AuthenticationFailure::InvalidCredentials
        );
        assert_eq!(
            AuthenticationFailure::from_provider(&ProviderError::Restricted(
                RestrictionReason::TooManyAttempts
            )),
            AuthenticationFailure::InvalidCredentials
        );
        assert_eq!(
            AuthenticationFailure::from_provider(&ProviderError::Store(StoreError::unavailable(
                "down"
            ))),
            AuthenticationFailure::StoreUnavailable
        );
    }

    #[test]
    fn test_failure_messages_do_not_leak_step() {
        assert_eq!(
            AuthenticationFailure::MalformedCredentials.message(),
            AuthenticationFailure::InvalidCredentials.message()
        );
        assert_ne!(
            AuthenticationFailure::StoreUnavailable.message(),
            AuthenticationFailure::InvalidCredentials.message()
        );
    }

    #[test]
    fn test_restriction_codes() {
        assert_eq!(RestrictionReason::TooManyAttempts.code(), "too_many_attempts");
        assert_eq!(RestrictionReason::Custom("tenant".into()).code(), "tenant");
        assert_eq!(RestrictionReason::AccountInactive.to_string(), "account_inactive");
    }

    #[test]
    fn test_error_response_status() {
        let response = ErrorResponse::access_denied().into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
