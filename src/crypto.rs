//! Cryptographic utilities for credential handling (IA-5)
//!
//! ## Security Patterns
//!
//! - **Salted hashing**: secrets are stored as Argon2id PHC strings
//! - **Constant-time comparison**: prevents timing attacks on secret comparisons
//! - **Dummy verification**: the "no such user" path burns the same hashing
//!   work as the "wrong password" path

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::ConfigError;

/// Performs constant-time comparison of two byte slices.
///
/// Standard `==` returns as soon as it finds a mismatching byte, which lets
/// an attacker recover secrets one byte at a time by measuring response
/// times. `subtle` compares every byte regardless of where the inputs differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Performs constant-time comparison of two strings.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}

/// Fingerprint of a stored credential hash.
///
/// Kept in session tokens instead of the hash itself, so a password change
/// can be detected without persisting hash material in the session.
pub fn credential_fingerprint(password_hash: &str) -> String {
    let digest = Sha256::digest(password_hash.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

// ============================================================================
// Hashing Parameters
// ============================================================================

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for HashingParams {
    /// OWASP recommended minimum for Argon2id (19 MiB, 2 passes, 1 lane)
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl HashingParams {
    /// Cheap parameters for tests. Never use in production.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

// ============================================================================
// Credential Validator
// ============================================================================

/// Hashes and verifies merchant user secrets.
///
/// Verification reads the cost parameters from the stored PHC string, so
/// records hashed with older parameters keep verifying after a cost change.
#[derive(Clone)]
pub struct CredentialValidator {
    argon2: Argon2<'static>,
    dummy_hash: String,
}

impl std::fmt::Debug for CredentialValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialValidator")
            .field("params", self.argon2.params())
            .finish_non_exhaustive()
    }
}

impl CredentialValidator {
    /// Create a validator with the given cost parameters
    pub fn new(params: HashingParams) -> Result<Self, ConfigError> {
        let params = Params::new(params.memory_kib, params.iterations, params.parallelism, None)
            .map_err(|e| ConfigError::Hashing(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(b"merchant-portal-dummy-secret", &salt)
            .map_err(|e| ConfigError::Hashing(e.to_string()))?
            .to_string();

        Ok(Self { argon2, dummy_hash })
    }

    /// Hash a secret into a PHC string with a fresh random salt
    pub fn hash(&self, secret: &str) -> Result<String, argon2::password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|h| h.to_string())
    }

    /// Verify a secret against a stored hash.
    ///
    /// An unparseable stored hash is treated as a mismatch, after spending
    /// the same work as a real verification.
    pub fn verify(&self, secret: &str, stored_hash: &str) -> bool {
        match PasswordHash::new(stored_hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => {
                tracing::warn!("Stored credential hash is not a valid PHC string");
                self.verify_dummy(secret);
                false
            }
        }
    }

    /// Run a verification that can never succeed.
    ///
    /// Called when no user record is available so the response time matches
    /// a wrong-password attempt.
    pub fn verify_dummy(&self, secret: &str) {
        if let Ok(parsed) = PasswordHash::new(&self.dummy_hash) {
            let _ = self.argon2.verify_password(secret.as_bytes(), &parsed);
        }
    }
}
