//! Security Event Logging
//!
//! Structured logging for the events of the merchant login pipeline
//! (AU-2 Audit Events, AU-3 Content of Audit Records).
//!
//! # Usage
//!
//! ```ignore
//! use merchant_portal_security::observability::SecurityEvent;
//!
//! security_event!(
//!     SecurityEvent::AuthenticationFailure,
//!     identity = %identity,
//!     ip_address = %context.addr_for_log(),
//!     reason = "invalid_credentials",
//!     "Merchant authentication failed"
//! );
//! ```
//!
//! Identities and addresses may be logged. Secrets, hashes and credential
//! fingerprints never are.

use std::fmt;

/// Security events raised by the login pipeline and the access middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    // Authentication events
    /// Merchant user authenticated
    AuthenticationSuccess,
    /// Login attempt rejected
    AuthenticationFailure,
    /// Merchant user logged out
    Logout,
    /// Security token stored in the session
    SessionCreated,
    /// Security token revoked
    SessionDestroyed,

    // Authorization events
    /// Protected path reached with the required role
    AccessGranted,
    /// Protected path refused
    AccessDenied,

    // Blocker events
    /// Attempt threshold reached for a source address
    BruteForceDetected,
    /// Identity locked after repeated failures
    AccountLocked,
    /// Lockout cleared
    AccountUnlocked,
    /// Attempt on an identity or address already locked
    SuspiciousActivity,

    // System events
    /// Firewall zone or access rules registered
    ConfigurationChanged,
}

impl SecurityEvent {
    /// Get the event category for filtering/grouping
    pub fn category(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess
            | Self::AuthenticationFailure
            | Self::Logout
            | Self::SessionCreated
            | Self::SessionDestroyed => "authentication",

            Self::AccessGranted | Self::AccessDenied => "authorization",

            Self::BruteForceDetected
            | Self::AccountLocked
            | Self::AccountUnlocked
            | Self::SuspiciousActivity => "security",

            Self::ConfigurationChanged => "system",
        }
    }

    /// Get the severity level for the event
    pub fn severity(&self) -> Severity {
        match self {
            Self::BruteForceDetected | Self::SuspiciousActivity => Severity::Critical,

            Self::AuthenticationFailure | Self::AccessDenied | Self::AccountLocked => {
                Severity::High
            }

            Self::AuthenticationSuccess
            | Self::AccountUnlocked
            | Self::SessionDestroyed
            | Self::ConfigurationChanged => Severity::Medium,

            Self::AccessGranted | Self::Logout | Self::SessionCreated => Severity::Low,
        }
    }

    /// Get the event name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess => "authentication_success",
            Self::AuthenticationFailure => "authentication_failure",
            Self::Logout => "logout",
            Self::SessionCreated => "session_created",
            Self::SessionDestroyed => "session_destroyed",
            Self::AccessGranted => "access_granted",
            Self::AccessDenied => "access_denied",
            Self::BruteForceDetected => "brute_force_detected",
            Self::AccountLocked => "account_locked",
            Self::AccountUnlocked => "account_unlocked",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::ConfigurationChanged => "configuration_changed",
        }
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine operations
    Low,
    /// Important state changes
    Medium,
    /// Security-relevant failures
    High,
    /// Immediate attention required
    Critical,
}

impl Severity {
    /// Lowercase name, as logged in the `severity` field
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log a security event with structured fields.
///
/// Adds `security_event`, `category` and `severity` fields and picks the
/// level from the severity: critical → `error`, high → `warn`,
/// medium → `info`, low → `debug`.
///
/// ```ignore
/// security_event!(
///     SecurityEvent::AccountLocked,
///     identity = %identity,
///     lockout_secs = 1800,
///     "Merchant account locked"
/// );
/// ```
#[macro_export]
macro_rules! security_event {
    ($event:expr, $($field:tt)*) => {{
        let event = $event;
        let category = event.category();
        let event_name = event.name();

        match event.severity() {
            $crate::observability::Severity::Critical => {
                ::tracing::error!(
                    security_event = event_name,
                    category = category,
                    severity = "critical",
                    $($field)*
                );
            }
            $crate::observability::Severity::High => {
                ::tracing::warn!(
                    security_event = event_name,
                    category = category,
                    severity = "high",
                    $($field)*
                );
            }
            $crate::observability::Severity::Medium => {
                ::tracing::info!(
                    security_event = event_name,
                    category = category,
                    severity = "medium",
                    $($field)*
                );
            }
            $crate::observability::Severity::Low => {
                ::tracing::debug!(
                    security_event = event_name,
                    category = category,
                    severity = "low",
                    $($field)*
                );
            }
        }
    }};
}

pub use security_event;
