//! Merchant Login Form Authenticator (IA-2, AC-7)
//!
//! One pass per login request, no state retained between requests:
//!
//! 1. **Extract credentials** from the submitted form
//! 2. **Resolve the user** through [`MerchantUserProvider`] (the attempt
//!    blocker runs here as a login restriction)
//! 3. **Validate the secret** against the stored Argon2id hash
//! 4. **Build the principal** with the configured role
//!
//! Every failure leaves as an [`AuthenticationFailure`]; an unknown account,
//! a blocked account and a wrong password all produce `InvalidCredentials`,
//! burn the same hashing work, and count against the blocker.

use std::fmt;
use std::sync::Arc;

use axum::http::Method;

use crate::crypto::{credential_fingerprint, CredentialValidator};
use crate::error::{AuthenticationFailure, ProviderError};
use crate::firewall::{FirewallOptions, MERCHANT_USER_FIREWALL};
use crate::login::LoginBlocker;
use crate::observability::SecurityEvent;
use crate::principal::{MerchantUser, ROLE_MERCHANT_USER};
use crate::provider::MerchantUserProvider;
use crate::request::{LoginRequest, RequestContext};
use crate::session::SecurityToken;

/// Longest identity or secret accepted, in characters
pub const MAX_CREDENTIAL_LENGTH: usize = 4096;

/// Identity and secret taken from a login form
#[derive(Clone)]
pub struct Credentials {
    /// Login identity, trimmed
    pub identity: String,
    secret: String,
}

impl Credentials {
    /// The submitted secret
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Result of one authentication pass
#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticationOutcome {
    /// The user is authenticated
    Success {
        /// The authenticated principal
        principal: MerchantUser,
        /// Fingerprint of the verified credential hash
        credential_fingerprint: String,
    },
    /// Authentication failed
    Failure(AuthenticationFailure),
}

impl AuthenticationOutcome {
    /// Whether authentication succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The principal, on success
    pub fn principal(&self) -> Option<&MerchantUser> {
        match self {
            Self::Success { principal, .. } => Some(principal),
            Self::Failure(_) => None,
        }
    }

    /// The failure, on failure
    pub fn failure(&self) -> Option<AuthenticationFailure> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(failure) => Some(*failure),
        }
    }

    /// Issue a session token for a successful outcome
    pub fn into_token(self, firewall: &str) -> Option<SecurityToken> {
        match self {
            Self::Success {
                principal,
                credential_fingerprint,
            } => Some(SecurityToken::new(firewall, principal, credential_fingerprint)),
            Self::Failure(_) => None,
        }
    }
}

/// Authenticates merchant users posting the login form
#[derive(Debug, Clone)]
pub struct MerchantLoginFormAuthenticator {
    firewall: String,
    options: FirewallOptions,
    role: String,
    provider: MerchantUserProvider,
    validator: CredentialValidator,
    blocker: LoginBlocker,
}

impl MerchantLoginFormAuthenticator {
    /// Create an authenticator with the default firewall name, options and role.
    ///
    /// The blocker is registered on the provider as a login restriction.
    pub fn new(
        provider: MerchantUserProvider,
        validator: CredentialValidator,
        blocker: LoginBlocker,
    ) -> Self {
        let provider = provider.with_restriction(Arc::new(blocker.clone()));
        Self {
            firewall: MERCHANT_USER_FIREWALL.to_string(),
            options: FirewallOptions::default(),
            role: ROLE_MERCHANT_USER.to_string(),
            provider,
            validator,
            blocker,
        }
    }

    /// Builder: firewall name stamped on issued tokens
    pub fn with_firewall(mut self, name: impl Into<String>) -> Self {
        self.firewall = name.into();
        self
    }

    /// Builder: form options
    pub fn with_options(mut self, options: FirewallOptions) -> Self {
        self.options = options;
        self
    }

    /// Builder: role granted on success
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Firewall name
    pub fn firewall(&self) -> &str {
        &self.firewall
    }

    /// Form options
    pub fn options(&self) -> &FirewallOptions {
        &self.options
    }

    /// The user provider (with the blocker registered)
    pub fn provider(&self) -> &MerchantUserProvider {
        &self.provider
    }

    /// The attempt blocker
    pub fn blocker(&self) -> &LoginBlocker {
        &self.blocker
    }

    /// Whether this authenticator handles the request
    pub fn supports(&self, request: &LoginRequest) -> bool {
        request.method == Method::POST && request.path == self.options.check_path
    }

    /// Read identity and secret from the form
    pub fn extract_credentials(
        &self,
        request: &LoginRequest,
    ) -> Result<Credentials, AuthenticationFailure> {
        let identity = request
            .field(&self.options.username_parameter)
            .map(str::trim)
            .filter(|identity| !identity.is_empty())
            .ok_or(AuthenticationFailure::MalformedCredentials)?;
        let secret = request
            .field(&self.options.password_parameter)
            .filter(|secret| !secret.is_empty())
            .ok_or(AuthenticationFailure::MalformedCredentials)?;

        if identity.chars().count() > MAX_CREDENTIAL_LENGTH
            || secret.chars().count() > MAX_CREDENTIAL_LENGTH
        {
            return Err(AuthenticationFailure::MalformedCredentials);
        }

        Ok(Credentials {
            identity: identity.to_string(),
            secret: secret.to_string(),
        })
    }

    /// Run the full pipeline for one request
    pub fn authenticate(&self, request: &LoginRequest) -> AuthenticationOutcome {
        let credentials = match self.extract_credentials(request) {
            Ok(credentials) => credentials,
            Err(failure) => {
                tracing::debug!(
                    ip_address = %request.context.addr_for_log(),
                    "Login form rejected: malformed credentials"
                );
                return AuthenticationOutcome::Failure(failure);
            }
        };
        self.authenticate_credentials(&credentials, &request.context)
    }

    /// Run resolve, validate and build for already extracted credentials
    pub fn authenticate_credentials(
        &self,
        credentials: &Credentials,
        context: &RequestContext,
    ) -> AuthenticationOutcome {
        let identity = credentials.identity.as_str();

        let record = match self.provider.resolve(identity, context) {
            Ok(record) => record,
            Err(err) => {
                let failure = AuthenticationFailure::from_provider(&err);
                if let ProviderError::Store(store_err) = &err {
                    tracing::error!(error = %store_err, "User store unavailable during login");
                } else {
                    // Same cost as a wrong password on a real account
                    self.validator.verify_dummy(credentials.secret());
                    tracing::debug!(identity = %identity, reason = %err, "User not resolvable");
                    self.note_failure(identity, context);
                }
                return AuthenticationOutcome::Failure(failure);
            }
        };

        if !self.validator.verify(credentials.secret(), &record.password_hash) {
            self.note_failure(identity, context);
            return AuthenticationOutcome::Failure(AuthenticationFailure::InvalidCredentials);
        }

        let fingerprint = credential_fingerprint(&record.password_hash);
        let principal = match MerchantUser::with_role(record, self.role.clone()) {
            Ok(principal) => principal,
            Err(err) => {
                tracing::error!(error = %err, "Cannot build merchant principal");
                return AuthenticationOutcome::Failure(AuthenticationFailure::InvalidCredentials);
            }
        };

        if let Err(err) = self.blocker.record_success(identity, context) {
            tracing::warn!(error = %err, identity = %identity, "Failed to reset login attempts");
        }

        crate::security_event!(
            SecurityEvent::AuthenticationSuccess,
            identity = %identity,
            firewall = %self.firewall,
            ip_address = %context.addr_for_log(),
            "Merchant user authenticated"
        );

        AuthenticationOutcome::Success {
            principal,
            credential_fingerprint: fingerprint,
        }
    }

    fn note_failure(&self, identity: &str, context: &RequestContext) {
        if let Err(err) = self.blocker.record_failure(identity, context) {
            tracing::warn!(error = %err, identity = %identity, "Failed to record login attempt");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::HashingParams;
    use crate::error::StoreError;
    use crate::login::LockoutPolicy;
    use crate::user::{InMemoryUserStore, UserCriteria, UserRecord, UserStatus, UserStore};
    use std::time::Duration;

    const CHECK_PATH: &str = "/security-merchant-portal-gui/login_check";

    struct Fixture {
        store: Arc<InMemoryUserStore>,
        authenticator: MerchantLoginFormAuthenticator,
    }

    fn fixture(policy: LockoutPolicy) -> Fixture {
        let validator = CredentialValidator::new(HashingParams::insecure_fast()).unwrap();
        let store = Arc::new(InMemoryUserStore::new());
        for (name, secret) in [("alice", "alice-secret"), ("bob", "bob-secret")] {
            store.upsert(UserRecord::new(name, validator.hash(secret).unwrap()));
        }
        store.upsert(
            UserRecord::new("carol", validator.hash("carol-secret").unwrap())
                .with_status(UserStatus::Blocked),
        );

        let authenticator = MerchantLoginFormAuthenticator::new(
            MerchantUserProvider::new(store.clone()),
            validator,
            LoginBlocker::new(policy),
        );
        Fixture {
            store,
            authenticator,
        }
    }

    fn login(identity: &str, secret: &str) -> LoginRequest {
        LoginRequest::post(CHECK_PATH)
            .with_field("username", identity)
            .with_field("password", secret)
    }

    #[test]
    fn test_supports_only_post_to_check_path() {
        let f = fixture(LockoutPolicy::default());
        assert!(f.authenticator.supports(&LoginRequest::post(CHECK_PATH)));
        assert!(!f
            .authenticator
            .supports(&LoginRequest::post("/security-merchant-portal-gui/login")));

        let mut get = LoginRequest::post(CHECK_PATH);
        get.method = Method::GET;
        assert!(!f.authenticator.supports(&get));
    }

    #[test]
    fn test_malformed_credentials() {
        let f = fixture(LockoutPolicy::default());
        let malformed = AuthenticationOutcome::Failure(AuthenticationFailure::MalformedCredentials);

        assert_eq!(f.authenticator.authenticate(&LoginRequest::post(CHECK_PATH)), malformed);
        assert_eq!(f.authenticator.authenticate(&login("   ", "x")), malformed);
        assert_eq!(
            f.authenticator
                .authenticate(&LoginRequest::post(CHECK_PATH).with_field("username", "alice")),
            malformed
        );
        let long = "a".repeat(MAX_CREDENTIAL_LENGTH + 1);
        assert_eq!(f.authenticator.authenticate(&login("alice", &long)), malformed);
        assert_eq!(f.authenticator.blocker().failure_count("alice").unwrap(), 0);
    }

    #[test]
    fn test_alice_wrong_then_right() {
        let f = fixture(LockoutPolicy::default());
        let blocker = f.authenticator.blocker();

        let outcome = f.authenticator.authenticate(&login("alice", "wrong"));
        assert_eq!(outcome.failure(), Some(AuthenticationFailure::InvalidCredentials));
        assert_eq!(blocker.failure_count("alice").unwrap(), 1);

        let outcome = f.authenticator.authenticate(&login("alice", "alice-secret"));
        let principal = outcome.principal().unwrap();
        assert_eq!(principal.username(), "alice");
        assert_eq!(principal.roles().collect::<Vec<_>>(), vec![ROLE_MERCHANT_USER]);
        assert_eq!(blocker.failure_count("alice").unwrap(), 0);
    }

    #[test]
    fn test_bob_locked_out_before_correct_attempt() {
        let f = fixture(
            LockoutPolicy::builder()
                .max_attempts(3)
                .attempt_window(Duration::from_secs(60))
                .lockout_duration(Duration::from_secs(60))
                .build(),
        );

        for _ in 0..3 {
            let outcome = f.authenticator.authenticate(&login("bob", "wrong"));
            assert_eq!(outcome.failure(), Some(AuthenticationFailure::InvalidCredentials));
        }

        let outcome = f.authenticator.authenticate(&login("bob", "bob-secret"));
        assert_eq!(outcome.failure(), Some(AuthenticationFailure::InvalidCredentials));

        f.authenticator.blocker().unlock("bob").unwrap();
        assert!(f.authenticator.authenticate(&login("bob", "bob-secret")).is_success());
    }

    #[test]
    fn test_unknown_user_matches_wrong_secret() {
        let f = fixture(LockoutPolicy::default());

        let unknown = f.authenticator.authenticate(&login("mallory", "whatever"));
        let wrong = f.authenticator.authenticate(&login("alice", "whatever"));
        let blocked = f.authenticator.authenticate(&login("carol", "carol-secret"));

        assert_eq!(unknown, wrong);
        assert_eq!(blocked, wrong);
        assert_eq!(f.authenticator.blocker().failure_count("mallory").unwrap(), 1);
    }

    #[test]
    fn test_identity_is_trimmed() {
        let f = fixture(LockoutPolicy::default());
        assert!(f.authenticator.authenticate(&login("  alice ", "alice-secret")).is_success());
    }

    #[test]
    fn test_store_unavailable() {
        struct Down;

        impl UserStore for Down {
            fn find_one(&self, _: &UserCriteria) -> Result<Option<UserRecord>, StoreError> {
                Err(StoreError::unavailable("timeout"))
            }
        }

        let authenticator = MerchantLoginFormAuthenticator::new(
            MerchantUserProvider::new(Arc::new(Down)),
            CredentialValidator::new(HashingParams::insecure_fast()).unwrap(),
            LoginBlocker::new(LockoutPolicy::default()),
        );

        let outcome = authenticator.authenticate(&login("alice", "alice-secret"));
        assert_eq!(outcome.failure(), Some(AuthenticationFailure::StoreUnavailable));
        assert_eq!(authenticator.blocker().failure_count("alice").unwrap(), 0);
    }

    #[test]
    fn test_custom_parameters_and_role() {
        let f = fixture(LockoutPolicy::default());
        let authenticator = f
            .authenticator
            .clone()
            .with_options(FirewallOptions {
                username_parameter: "email".into(),
                password_parameter: "pass".into(),
                ..FirewallOptions::default()
            })
            .with_role("ROLE_MERCHANT_ADMIN");

        let request = LoginRequest::post(CHECK_PATH)
            .with_field("email", "alice")
            .with_field("pass", "alice-secret");
        let outcome = authenticator.authenticate(&request);
        assert!(outcome.principal().unwrap().has_role("ROLE_MERCHANT_ADMIN"));
    }

    #[test]
    fn test_success_token_tracks_credential() {
        let f = fixture(LockoutPolicy::default());
        let hash = f.store.get("alice").unwrap().password_hash;

        let token = f
            .authenticator
            .authenticate(&login("alice", "alice-secret"))
            .into_token(f.authenticator.firewall())
            .unwrap();
        assert_eq!(token.firewall, "MerchantUser");
        assert_eq!(token.credential_fingerprint, credential_fingerprint(&hash));
        assert!(token.principal.user().password_hash.is_empty());
    }
}
