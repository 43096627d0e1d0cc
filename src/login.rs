//! Login Attempt Blocker (AC-7)
//!
//! NIST SP 800-53 AC-7 (Unsuccessful Logon Attempts): counts failed merchant
//! logins per identity and per source address, and refuses further attempts
//! once a threshold is reached inside the attempt window.
//!
//! # STIG References
//!
//! - **UBTU-22-411045**: Lock account after unsuccessful login attempts (AC-7)
//! - **UBTU-22-411050**: Automatically unlock accounts after lockout duration (AC-7)
//! - **APSC-DV-000210**: Limit failed login attempts (AC-7)
//!
//! # Storage
//!
//! Counters live behind the [`AttemptStore`] trait. Every store operation is
//! a single atomic read-modify-write, so two concurrent failures for the same
//! identity are both counted. [`InMemoryAttemptStore`] is suitable for
//! single-instance deployments; multi-instance hosts implement the trait over
//! a shared backend with atomic increments.
//!
//! # Usage
//!
//! ```ignore
//! use merchant_portal_security::login::{LoginBlocker, LockoutPolicy};
//! use std::time::Duration;
//!
//! let policy = LockoutPolicy::builder()
//!     .max_attempts(3)
//!     .attempt_window(Duration::from_secs(60))
//!     .build();
//! let blocker = LoginBlocker::new(policy);
//!
//! if blocker.is_blocked("bob@merchant.test", &ctx)? {
//!     // reject before touching the password
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{ConfigError, RestrictionReason, StoreError};
use crate::observability::SecurityEvent;
use crate::provider::{LoginRestriction, LoginSubject, LookupPurpose, RestrictionDecision};
use crate::request::RequestContext;

// ============================================================================
// Lockout Policy (AC-7)
// ============================================================================

/// Lockout policy configuration (AC-7)
#[derive(Debug, Clone, PartialEq)]
pub struct LockoutPolicy {
    /// Number of failed attempts before lockout
    pub max_attempts: u32,

    /// Time window for counting attempts.
    /// Attempts older than this are not counted
    pub attempt_window: Duration,

    /// Duration of lockout after max attempts reached
    pub lockout_duration: Duration,

    /// Whether to use progressive lockout (longer each time)
    pub progressive_lockout: bool,

    /// Maximum lockout duration for progressive lockout
    pub max_lockout_duration: Duration,

    /// Multiplier for progressive lockout
    pub lockout_multiplier: f64,

    /// Whether to track by source address in addition to identity
    pub track_by_ip: bool,

    /// Maximum failed attempts per address
    pub max_ip_attempts: u32,

    /// Address lockout duration
    pub ip_lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    /// - 5 failed attempts before lockout
    /// - 30 minute attempt window
    /// - lockout lasts as long as the window
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_window: Duration::from_secs(30 * 60),
            lockout_duration: Duration::from_secs(30 * 60),
            progressive_lockout: true,
            max_lockout_duration: Duration::from_secs(24 * 60 * 60),
            lockout_multiplier: 2.0,
            track_by_ip: true,
            max_ip_attempts: 20, // shared NATs put many merchants behind one address
            ip_lockout_duration: Duration::from_secs(60 * 60),
        }
    }
}

impl LockoutPolicy {
    /// Create a new builder
    pub fn builder() -> LockoutPolicyBuilder {
        LockoutPolicyBuilder::default()
    }

    /// Create a strict policy for high-security environments
    pub fn strict() -> Self {
        Self {
            max_attempts: 3,
            attempt_window: Duration::from_secs(60 * 60),
            lockout_duration: Duration::from_secs(60 * 60),
            progressive_lockout: true,
            max_lockout_duration: Duration::from_secs(24 * 60 * 60),
            lockout_multiplier: 3.0,
            track_by_ip: true,
            max_ip_attempts: 10,
            ip_lockout_duration: Duration::from_secs(2 * 60 * 60),
        }
    }

    /// Reject thresholds and durations that would lock on the first failure
    /// or never lock at all
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &'static str, value: String| -> Result<(), ConfigError> {
            Err(ConfigError::InvalidValue { key, value })
        };

        if self.max_attempts == 0 {
            return invalid("lockout_threshold", "0".to_string());
        }
        if self.attempt_window.is_zero() {
            return invalid("attempt_window", "0s".to_string());
        }
        if self.lockout_duration.is_zero() {
            return invalid("lockout_duration", "0s".to_string());
        }
        if !self.lockout_multiplier.is_finite() || self.lockout_multiplier < 1.0 {
            return invalid("lockout_multiplier", self.lockout_multiplier.to_string());
        }
        if self.track_by_ip {
            if self.max_ip_attempts == 0 {
                return invalid("ip_threshold", "0".to_string());
            }
            if self.ip_lockout_duration.is_zero() {
                return invalid("ip_lockout_duration", "0s".to_string());
            }
        }
        Ok(())
    }

    /// Calculate lockout duration based on lockout count (for progressive lockout)
    pub fn calculate_lockout_duration(&self, lockout_count: u32) -> Duration {
        if !self.progressive_lockout || lockout_count <= 1 {
            return self.lockout_duration;
        }

        // NaN and shrinking multipliers fall back to a flat lockout
        let base = if self.lockout_multiplier.is_finite() {
            self.lockout_multiplier.max(1.0)
        } else {
            1.0
        };
        let exponent = i32::try_from(lockout_count - 1).unwrap_or(i32::MAX);
        let duration_secs = self.lockout_duration.as_secs_f64() * base.powi(exponent);
        let cap = self
            .max_lockout_duration
            .max(self.lockout_duration)
            .as_secs_f64();

        Duration::from_secs_f64(duration_secs.min(cap))
    }

    /// Address failures at which a brute force alert is raised
    pub fn brute_force_alert_level(&self) -> u32 {
        (self.max_ip_attempts / 2).max(1)
    }

    /// Failure threshold for a key
    pub fn threshold_for(&self, key: &AttemptKey) -> u32 {
        match key {
            AttemptKey::Identity(_) => self.max_attempts,
            AttemptKey::Address(_) => self.max_ip_attempts,
        }
    }

    /// Lockout to apply to a key on its `lockout_count`-th lockout
    pub fn lockout_for(&self, key: &AttemptKey, lockout_count: u32) -> Duration {
        match key {
            AttemptKey::Identity(_) => self.calculate_lockout_duration(lockout_count),
            AttemptKey::Address(_) => self.ip_lockout_duration,
        }
    }
}

/// Builder for LockoutPolicy
#[derive(Debug, Clone, Default)]
pub struct LockoutPolicyBuilder {
    policy: LockoutPolicy,
}

impl LockoutPolicyBuilder {
    /// Set maximum failed attempts before lockout
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    /// Set the time window for counting attempts
    pub fn attempt_window(mut self, duration: Duration) -> Self {
        self.policy.attempt_window = duration;
        self
    }

    /// Set lockout duration
    pub fn lockout_duration(mut self, duration: Duration) -> Self {
        self.policy.lockout_duration = duration;
        self
    }

    /// Enable/disable progressive lockout
    pub fn progressive_lockout(mut self, enabled: bool) -> Self {
        self.policy.progressive_lockout = enabled;
        self
    }

    /// Set maximum lockout duration
    pub fn max_lockout_duration(mut self, duration: Duration) -> Self {
        self.policy.max_lockout_duration = duration;
        self
    }

    /// Set lockout multiplier for progressive lockout
    pub fn lockout_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.lockout_multiplier = multiplier;
        self
    }

    /// Enable/disable address tracking
    pub fn track_by_ip(mut self, enabled: bool) -> Self {
        self.policy.track_by_ip = enabled;
        self
    }

    /// Set maximum attempts per address
    pub fn max_ip_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_ip_attempts = attempts;
        self
    }

    /// Set address lockout duration
    pub fn ip_lockout_duration(mut self, duration: Duration) -> Self {
        self.policy.ip_lockout_duration = duration;
        self
    }

    /// Build the policy
    pub fn build(self) -> LockoutPolicy {
        self.policy
    }
}

// ============================================================================
// Attempt Records
// ============================================================================

/// What a counter is keyed by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttemptKey {
    /// Login identity, case-folded
    Identity(String),
    /// Client source address
    Address(IpAddr),
}

impl AttemptKey {
    /// Key for a login identity.
    ///
    /// Identities are trimmed and lowercased so `Bob` and `bob ` share a counter.
    pub fn identity(identity: &str) -> Self {
        Self::Identity(identity.trim().to_lowercase())
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity(id) => write!(f, "identity:{id}"),
            Self::Address(ip) => write!(f, "address:{ip}"),
        }
    }
}

/// Tracks login attempts for a single key
#[derive(Debug, Clone, Default)]
pub struct AttemptRecord {
    /// Recent failed attempt timestamps
    pub failed_attempts: Vec<Instant>,
    /// Number of times this key has been locked out
    pub lockout_count: u32,
    /// When the current lockout started (if locked out)
    pub lockout_started: Option<Instant>,
    /// Duration of current lockout
    pub lockout_duration: Duration,
    /// Last successful login
    pub last_success: Option<Instant>,
}

impl AttemptRecord {
    /// Count recent failed attempts within the window
    pub fn recent_failures(&self, window: Duration) -> u32 {
        let now = Instant::now();
        self.failed_attempts
            .iter()
            .filter(|&&t| now.duration_since(t) < window)
            .count() as u32
    }

    /// Check if currently locked out
    pub fn is_locked_out(&self) -> bool {
        self.remaining_lockout().is_some()
    }

    /// Get remaining lockout time
    pub fn remaining_lockout(&self) -> Option<Duration> {
        let started = self.lockout_started?;
        self.lockout_duration
            .checked_sub(Instant::now().duration_since(started))
            .filter(|remaining| !remaining.is_zero())
    }

    /// Start lockout
    pub fn start_lockout(&mut self, duration: Duration) {
        self.lockout_started = Some(Instant::now());
        self.lockout_duration = duration;
        self.lockout_count += 1;
    }

    /// Manually unlock (admin action)
    pub fn unlock(&mut self) {
        self.lockout_started = None;
        self.failed_attempts.clear();
    }

    /// Drop attempts outside the window, and reset an expired lockout so the
    /// key starts a fresh window
    pub fn cleanup(&mut self, window: Duration) {
        if self.lockout_started.is_some() && !self.is_locked_out() {
            self.unlock();
        }
        let now = Instant::now();
        self.failed_attempts
            .retain(|&t| now.duration_since(t) < window);
    }

    fn is_idle(&self) -> bool {
        self.failed_attempts.is_empty() && !self.is_locked_out()
    }
}

/// Counter state right after a failure was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureTally {
    /// Failures inside the window, including this one
    pub failed_count: u32,
    /// Remaining lockout, if the key is locked
    pub lockout: Option<Duration>,
    /// Whether this failure started the lockout
    pub newly_locked: bool,
}

/// Lockout information returned when checking lockout status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutInfo {
    /// Time left until the lockout lifts
    pub remaining: Duration,
    /// Number of times locked out
    pub lockout_count: u32,
}

impl LockoutInfo {
    /// Get remaining lockout time in seconds
    pub fn remaining_secs(&self) -> u64 {
        self.remaining.as_secs()
    }
}

// ============================================================================
// Attempt Store
// ============================================================================

/// Backing store for attempt counters.
///
/// Each method must be atomic with respect to other calls on the same key.
pub trait AttemptStore: Send + Sync + fmt::Debug {
    /// Append a failure, locking the key when its threshold is reached
    fn record_failure(
        &self,
        key: &AttemptKey,
        policy: &LockoutPolicy,
    ) -> Result<FailureTally, StoreError>;

    /// Current lockout of a key, if any
    fn lockout(&self, key: &AttemptKey) -> Result<Option<LockoutInfo>, StoreError>;

    /// Failures inside the window
    fn failure_count(&self, key: &AttemptKey, window: Duration) -> Result<u32, StoreError>;

    /// Clear the failure counter (lockout history is kept for progressive lockout)
    fn record_success(&self, key: &AttemptKey) -> Result<(), StoreError>;

    /// Lift a lockout and clear failures. Returns whether the key was known
    fn unlock(&self, key: &AttemptKey) -> Result<bool, StoreError>;

    /// Drop records with no recent failures and no active lockout
    fn purge_expired(&self, window: Duration) -> Result<usize, StoreError>;
}

/// In-memory attempt store (AC-7)
#[derive(Debug, Default)]
pub struct InMemoryAttemptStore {
    records: Mutex<HashMap<AttemptKey, AttemptRecord>>,
}

impl InMemoryAttemptStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a key's record (for admin/debugging)
    pub fn get(&self, key: &AttemptKey) -> Option<AttemptRecord> {
        self.records.lock().get(key).cloned()
    }
}

impl AttemptStore for InMemoryAttemptStore {
    fn record_failure(
        &self,
        key: &AttemptKey,
        policy: &LockoutPolicy,
    ) -> Result<FailureTally, StoreError> {
        let mut records = self.records.lock();
        let record = records.entry(key.clone()).or_default();

        record.cleanup(policy.attempt_window);
        record.failed_attempts.push(Instant::now());

        let failed_count = record.recent_failures(policy.attempt_window);
        let newly_locked = failed_count >= policy.threshold_for(key) && !record.is_locked_out();
        if newly_locked {
            let duration = policy.lockout_for(key, record.lockout_count + 1);
            record.start_lockout(duration);
        }

        Ok(FailureTally {
            failed_count,
            lockout: record.remaining_lockout(),
            newly_locked,
        })
    }

    fn lockout(&self, key: &AttemptKey) -> Result<Option<LockoutInfo>, StoreError> {
        let records = self.records.lock();
        Ok(records.get(key).and_then(|record| {
            record.remaining_lockout().map(|remaining| LockoutInfo {
                remaining,
                lockout_count: record.lockout_count,
            })
        }))
    }

    fn failure_count(&self, key: &AttemptKey, window: Duration) -> Result<u32, StoreError> {
        let records = self.records.lock();
        Ok(records
            .get(key)
            .map(|record| record.recent_failures(window))
            .unwrap_or(0))
    }

    fn record_success(&self, key: &AttemptKey) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(key) {
            record.failed_attempts.clear();
            record.last_success = Some(Instant::now());
        }
        Ok(())
    }

    fn unlock(&self, key: &AttemptKey) -> Result<bool, StoreError> {
        let mut records = self.records.lock();
        Ok(match records.get_mut(key) {
            Some(record) => {
                record.unlock();
                true
            }
            None => false,
        })
    }

    fn purge_expired(&self, window: Duration) -> Result<usize, StoreError> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| {
            record.cleanup(window);
            !record.is_idle()
        });
        Ok(before - records.len())
    }
}

// ============================================================================
// Login Blocker
// ============================================================================

/// Result of recording a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    /// Number of recent failed attempts for the identity
    pub failed_count: u32,
    /// Number of remaining attempts before lockout
    pub remaining_attempts: u32,
    /// Whether the identity is locked out
    pub is_locked_out: bool,
    /// Remaining lockout, if locked out
    pub lockout_duration: Option<Duration>,
    /// Whether the source address crossed the brute force alert level
    pub brute_force_detected: bool,
}

/// Login attempt blocker (AC-7).
///
/// Cheap to clone; clones share the same store.
#[derive(Debug, Clone)]
pub struct LoginBlocker {
    policy: LockoutPolicy,
    store: Arc<dyn AttemptStore>,
}

impl LoginBlocker {
    /// Create a blocker backed by an in-memory store
    pub fn new(policy: LockoutPolicy) -> Self {
        Self::with_store(policy, Arc::new(InMemoryAttemptStore::new()))
    }

    /// Create a blocker backed by a custom store
    pub fn with_store(policy: LockoutPolicy, store: Arc<dyn AttemptStore>) -> Self {
        Self { policy, store }
    }

    /// The active policy
    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    fn address_key(&self, context: &RequestContext) -> Option<AttemptKey> {
        context
            .source_addr
            .filter(|_| self.policy.track_by_ip)
            .map(AttemptKey::Address)
    }

    /// Why an attempt would be refused, if it would be.
    ///
    /// The address is checked first, so a sprayed address is reported even
    /// for identities it has never tried.
    pub fn check(
        &self,
        identity: &str,
        context: &RequestContext,
    ) -> Result<Option<RestrictionReason>, StoreError> {
        if let Some(key) = self.address_key(context) {
            if self.store.lockout(&key)?.is_some() {
                return Ok(Some(RestrictionReason::AddressBlocked));
            }
        }

        let blocked = self.store.lockout(&AttemptKey::identity(identity))?;
        Ok(blocked.map(|_| RestrictionReason::TooManyAttempts))
    }

    /// Whether an attempt for this identity and address is refused
    pub fn is_blocked(&self, identity: &str, context: &RequestContext) -> Result<bool, StoreError> {
        Ok(self.check(identity, context)?.is_some())
    }

    /// Record a failed attempt for the identity and, if tracked, the address
    pub fn record_failure(
        &self,
        identity: &str,
        context: &RequestContext,
    ) -> Result<AttemptResult, StoreError> {
        let key = AttemptKey::identity(identity);
        let tally = self.store.record_failure(&key, &self.policy)?;

        if tally.newly_locked {
            log_account_locked(identity, tally.failed_count, tally.lockout.unwrap_or_default());
        }

        let mut brute_force_detected = false;
        if let Some(ip_key) = self.address_key(context) {
            let ip_tally = self.store.record_failure(&ip_key, &self.policy)?;
            let addr = context.addr_for_log();

            let alert_level = self.policy.brute_force_alert_level();
            brute_force_detected = ip_tally.failed_count >= alert_level;
            if ip_tally.failed_count == alert_level {
                log_brute_force_detected(&addr, ip_tally.failed_count);
            }
            if ip_tally.newly_locked {
                log_address_locked(&addr, ip_tally.failed_count);
            }
        }

        let remaining = self.policy.max_attempts.saturating_sub(tally.failed_count);
        log_login_failure(identity, &context.addr_for_log(), tally.failed_count, remaining);

        Ok(AttemptResult {
            failed_count: tally.failed_count,
            remaining_attempts: remaining,
            is_locked_out: tally.lockout.is_some(),
            lockout_duration: tally.lockout,
            brute_force_detected,
        })
    }

    /// Reset the identity's and the address's failure counters after a
    /// successful login. Lockout history is kept.
    pub fn record_success(&self, identity: &str, context: &RequestContext) -> Result<(), StoreError> {
        self.store.record_success(&AttemptKey::identity(identity))?;
        if let Some(key) = self.address_key(context) {
            self.store.record_success(&key)?;
        }
        Ok(())
    }

    /// Failures recorded for an identity inside the window
    pub fn failure_count(&self, identity: &str) -> Result<u32, StoreError> {
        self.store
            .failure_count(&AttemptKey::identity(identity), self.policy.attempt_window)
    }

    /// Manually unlock an identity (admin action)
    pub fn unlock(&self, identity: &str) -> Result<(), StoreError> {
        if self.store.unlock(&AttemptKey::identity(identity))? {
            log_unlocked(&AttemptKey::identity(identity));
        }
        Ok(())
    }

    /// Manually unlock a source address (admin action)
    pub fn unlock_address(&self, addr: IpAddr) -> Result<(), StoreError> {
        let key = AttemptKey::Address(addr);
        if self.store.unlock(&key)? {
            log_unlocked(&key);
        }
        Ok(())
    }

    /// Clean up expired records (call periodically)
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let window = self.policy.attempt_window;
        self.store.purge_expired(window)
    }
}

impl LoginRestriction for LoginBlocker {
    fn name(&self) -> &'static str {
        "login_blocker"
    }

    fn check(&self, subject: &LoginSubject<'_>) -> Result<RestrictionDecision, StoreError> {
        // Someone else's failed attempts must not end a live session
        if subject.purpose == LookupPurpose::Refresh {
            return Ok(RestrictionDecision::Allow);
        }

        Ok(match LoginBlocker::check(self, subject.identity, subject.context)? {
            Some(reason) => {
                log_attempt_blocked(subject.identity, &subject.context.addr_for_log(), &reason);
                RestrictionDecision::Deny(reason)
            }
            None => RestrictionDecision::Allow,
        })
    }
}

// ============================================================================
// Security Event Logging (AU-2, AU-3)
// ============================================================================

fn log_login_failure(identity: &str, addr: &str, failed_count: u32, remaining: u32) {
    crate::security_event!(
        SecurityEvent::AuthenticationFailure,
        identity = %identity,
        ip_address = %addr,
        failed_count = failed_count,
        remaining_attempts = remaining,
        "Merchant login failed"
    );
}

fn log_account_locked(identity: &str, failed_count: u32, duration: Duration) {
    crate::security_event!(
        SecurityEvent::AccountLocked,
        identity = %identity,
        failed_count = failed_count,
        lockout_duration_secs = duration.as_secs(),
        "Merchant identity locked due to failed login attempts"
    );
}

fn log_unlocked(key: &AttemptKey) {
    crate::security_event!(
        SecurityEvent::AccountUnlocked,
        key = %key,
        "Login lockout lifted by administrator"
    );
}

fn log_brute_force_detected(addr: &str, attempt_count: u32) {
    crate::security_event!(
        SecurityEvent::BruteForceDetected,
        ip_address = %addr,
        attempt_count = attempt_count,
        "Possible brute force attack detected"
    );
}

fn log_address_locked(addr: &str, attempt_count: u32) {
    crate::security_event!(
        SecurityEvent::SuspiciousActivity,
        ip_address = %addr,
        attempt_count = attempt_count,
        "Address locked due to excessive failed attempts"
    );
}

fn log_attempt_blocked(identity: &str, addr: &str, reason: &RestrictionReason) {
    crate::security_event!(
        SecurityEvent::AuthenticationFailure,
        identity = %identity,
        ip_address = %addr,
        reason = %reason,
        "Login attempt blocked by lockout"
    );
}

// ============================================================================
// Tests
// ============================================================================
