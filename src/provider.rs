//! Merchant User Provider
//!
//! Resolves a login identity to a [`UserRecord`]:
//!
//! 1. seed [`UserCriteria`] with the identity and `status = active`
//! 2. run every [`CriteriaExpander`] in registration order
//! 3. read one record from the [`UserStore`]
//! 4. evaluate every [`LoginRestriction`]; any deny wins, even when a
//!    record was found
//!
//! Restrictions are evaluated for every lookup, including ones that found no
//! record, so a missing account and a restricted one cost the same.

use std::sync::Arc;

use crate::error::{ProviderError, RestrictionReason, StoreError};
use crate::request::RequestContext;
use crate::user::{UserCriteria, UserRecord, UserStatus, UserStore, STATUS_FIELD};

// ============================================================================
// Extension Points
// ============================================================================

/// Why the provider is resolving a user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPurpose {
    /// A login attempt
    Authentication,
    /// Re-loading an already authenticated principal
    Refresh,
}

/// What a restriction rule gets to look at
#[derive(Debug, Clone, Copy)]
pub struct LoginSubject<'a> {
    /// Identity as submitted
    pub identity: &'a str,
    /// Candidate record, if the lookup found one
    pub candidate: Option<&'a UserRecord>,
    /// Client metadata
    pub context: &'a RequestContext,
    /// Why the lookup happens
    pub purpose: LookupPurpose,
}

/// Verdict of a single restriction rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestrictionDecision {
    /// The rule has no objection
    Allow,
    /// The rule vetoes the login
    Deny(RestrictionReason),
}

/// A predicate that can veto a login before the secret is checked.
///
/// All registered rules must allow; their order does not matter.
pub trait LoginRestriction: Send + Sync {
    /// Name for logs
    fn name(&self) -> &'static str;

    /// Evaluate the rule
    fn check(&self, subject: &LoginSubject<'_>) -> Result<RestrictionDecision, StoreError>;
}

/// A refinement step applied to the lookup criteria.
///
/// Expanders run in registration order, each receiving the previous
/// expander's output.
pub trait CriteriaExpander: Send + Sync {
    /// Refine the criteria
    fn expand(&self, criteria: UserCriteria) -> UserCriteria;
}

impl<F> CriteriaExpander for F
where
    F: Fn(UserCriteria) -> UserCriteria + Send + Sync,
{
    fn expand(&self, criteria: UserCriteria) -> UserCriteria {
        self(criteria)
    }
}

/// Denies candidates whose account is not active.
///
/// The default criteria already filter on `status = active`; this rule
/// keeps the guarantee when an expander drops or overrides that filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountStatusRestriction;

impl LoginRestriction for AccountStatusRestriction {
    fn name(&self) -> &'static str {
        "account_status"
    }

    fn check(&self, subject: &LoginSubject<'_>) -> Result<RestrictionDecision, StoreError> {
        Ok(match subject.candidate {
            Some(user) if !user.is_active() => {
                RestrictionDecision::Deny(RestrictionReason::AccountInactive)
            }
            _ => RestrictionDecision::Allow,
        })
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Resolves merchant users for the authenticator and the token updater
#[derive(Clone)]
pub struct MerchantUserProvider {
    store: Arc<dyn UserStore>,
    restrictions: Vec<Arc<dyn LoginRestriction>>,
    expanders: Vec<Arc<dyn CriteriaExpander>>,
}

impl std::fmt::Debug for MerchantUserProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantUserProvider")
            .field(
                "restrictions",
                &self.restrictions.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("expanders", &self.expanders.len())
            .finish()
    }
}

impl MerchantUserProvider {
    /// Create a provider with the account status rule and no expanders
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self {
            store,
            restrictions: vec![Arc::new(AccountStatusRestriction)],
            expanders: Vec::new(),
        }
    }

    /// Builder: register a restriction rule
    pub fn with_restriction(mut self, rule: Arc<dyn LoginRestriction>) -> Self {
        self.restrictions.push(rule);
        self
    }

    /// Builder: register a criteria expander (runs after those already registered)
    pub fn with_expander(mut self, expander: Arc<dyn CriteriaExpander>) -> Self {
        self.expanders.push(expander);
        self
    }

    /// Build the lookup criteria for an identity
    pub fn criteria_for(&self, identity: &str) -> UserCriteria {
        let seed = UserCriteria::for_identity(identity)
            .with_filter(STATUS_FIELD, UserStatus::Active.as_str());

        self.expanders
            .iter()
            .fold(seed, |criteria, expander| expander.expand(criteria))
    }

    /// Resolve an identity for a login attempt
    pub fn resolve(
        &self,
        identity: &str,
        context: &RequestContext,
    ) -> Result<UserRecord, ProviderError> {
        self.lookup(identity, context, LookupPurpose::Authentication)
    }

    /// Re-load an authenticated user, e.g. to refresh a session token
    pub fn refresh(&self, username: &str) -> Result<UserRecord, ProviderError> {
        self.lookup(username, &RequestContext::default(), LookupPurpose::Refresh)
    }

    fn lookup(
        &self,
        identity: &str,
        context: &RequestContext,
        purpose: LookupPurpose,
    ) -> Result<UserRecord, ProviderError> {
        let criteria = self.criteria_for(identity);
        let candidate = self.store.find_one(&criteria)?;

        let subject = LoginSubject {
            identity,
            candidate: candidate.as_ref(),
            context,
            purpose,
        };

        // Every rule runs; the first denial is reported
        let mut denial = None;
        for rule in &self.restrictions {
            if let RestrictionDecision::Deny(reason) = rule.check(&subject)? {
                tracing::debug!(
                    rule = rule.name(),
                    identity = %identity,
                    reason = %reason,
                    "Login restriction denied lookup"
                );
                denial.get_or_insert(reason);
            }
        }

        if let Some(reason) = denial {
            return Err(ProviderError::Restricted(reason));
        }

        candidate.ok_or(ProviderError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::InMemoryUserStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> Arc<InMemoryUserStore> {
        let store = Arc::new(InMemoryUserStore::new());
        store.upsert(UserRecord::new("alice", "h").with_attribute("tenant", "de"));
        store.upsert(UserRecord::new("carol", "h").with_status(UserStatus::Blocked));
        store
    }

    struct DenyIdentity(&'static str);

    impl LoginRestriction for DenyIdentity {
        fn name(&self) -> &'static str {
            "deny_identity"
        }

        fn check(&self, subject: &LoginSubject<'_>) -> Result<RestrictionDecision, StoreError> {
            Ok(if subject.identity == self.0 {
                RestrictionDecision::Deny(RestrictionReason::Custom("denied".into()))
            } else {
                RestrictionDecision::Allow
            })
        }
    }

    struct CountingRule(AtomicUsize);

    impl LoginRestriction for CountingRule {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn check(&self, _: &LoginSubject<'_>) -> Result<RestrictionDecision, StoreError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(RestrictionDecision::Allow)
        }
    }

    struct FailingStore;

    impl UserStore for FailingStore {
        fn find_one(&self, _: &UserCriteria) -> Result<Option<UserRecord>, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
    }

    #[test]
    fn test_resolve_existing_user() {
        let provider = MerchantUserProvider::new(store());
        let user = provider.resolve("alice", &RequestContext::default()).unwrap();
        assert_eq!(user.username, "alice");
    }

    #[test]
    fn test_resolve_unknown_user() {
        let provider = MerchantUserProvider::new(store());
        assert_eq!(
            provider.resolve("nobody", &RequestContext::default()),
            Err(ProviderError::NotFound)
        );
    }

    #[test]
    fn test_blocked_account_is_not_found_by_default_criteria() {
        let provider = MerchantUserProvider::new(store());
        assert_eq!(
            provider.resolve("carol", &RequestContext::default()),
            Err(ProviderError::NotFound)
        );
    }

    #[test]
    fn test_status_rule_holds_when_expander_drops_status_filter() {
        let provider = MerchantUserProvider::new(store())
            .with_expander(Arc::new(|c: UserCriteria| c.without_filter(STATUS_FIELD)));

        assert_eq!(
            provider.resolve("carol", &RequestContext::default()),
            Err(ProviderError::Restricted(RestrictionReason::AccountInactive))
        );
    }

    #[test]
    fn test_restriction_wins_over_existing_record() {
        let provider =
            MerchantUserProvider::new(store()).with_restriction(Arc::new(DenyIdentity("alice")));

        assert!(matches!(
            provider.resolve("alice", &RequestContext::default()),
            Err(ProviderError::Restricted(_))
        ));
    }

    #[test]
    fn test_restrictions_run_without_candidate() {
        let counter = Arc::new(CountingRule(AtomicUsize::new(0)));
        let provider = MerchantUserProvider::new(store()).with_restriction(counter.clone());

        let _ = provider.resolve("nobody", &RequestContext::default());
        let _ = provider.resolve("alice", &RequestContext::default());
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_all_rules_run_after_denial() {
        let counter = Arc::new(CountingRule(AtomicUsize::new(0)));
        let provider = MerchantUserProvider::new(store())
            .with_restriction(Arc::new(DenyIdentity("alice")))
            .with_restriction(counter.clone());

        assert!(provider.resolve("alice", &RequestContext::default()).is_err());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_expanders_disjoint_fields_commute() {
        let tenant = |c: UserCriteria| c.with_filter("tenant", "de");
        let merchant = |c: UserCriteria| c.with_filter("merchant_reference", "MER1");

        let ab = MerchantUserProvider::new(store())
            .with_expander(Arc::new(tenant))
            .with_expander(Arc::new(merchant));
        let ba = MerchantUserProvider::new(store())
            .with_expander(Arc::new(merchant))
            .with_expander(Arc::new(tenant));

        assert_eq!(ab.criteria_for("alice"), ba.criteria_for("alice"));
    }

    #[test]
    fn test_expanders_same_field_last_wins() {
        let provider = MerchantUserProvider::new(store())
            .with_expander(Arc::new(|c: UserCriteria| c.with_filter("tenant", "at")))
            .with_expander(Arc::new(|c: UserCriteria| c.with_filter("tenant", "de")));

        let criteria = provider.criteria_for("alice");
        assert_eq!(criteria.filter("tenant"), Some(&json!("de")));

        let combined = UserCriteria::for_identity("alice")
            .with_filter(STATUS_FIELD, "active")
            .with_filter("tenant", "de");
        assert_eq!(criteria, combined);
        assert!(provider.resolve("alice", &RequestContext::default()).is_ok());
    }

    #[test]
    fn test_expander_can_exclude_user() {
        let provider = MerchantUserProvider::new(store())
            .with_expander(Arc::new(|c: UserCriteria| c.with_filter("tenant", "at")));

        assert_eq!(
            provider.resolve("alice", &RequestContext::default()),
            Err(ProviderError::NotFound)
        );
    }

    #[test]
    fn test_store_failure_propagates() {
        let provider = MerchantUserProvider::new(Arc::new(FailingStore));
        assert!(matches!(
            provider.resolve("alice", &RequestContext::default()),
            Err(ProviderError::Store(StoreError::Unavailable(_)))
        ));
    }

    #[test]
    fn test_refresh_uses_refresh_purpose() {
        struct DenyAuthentication;

        impl LoginRestriction for DenyAuthentication {
            fn name(&self) -> &'static str {
                "deny_authentication"
            }

            fn check(&self, s: &LoginSubject<'_>) -> Result<RestrictionDecision, StoreError> {
                Ok(match s.purpose {
                    LookupPurpose::Authentication => {
                        RestrictionDecision::Deny(RestrictionReason::TooManyAttempts)
                    }
                    LookupPurpose::Refresh => RestrictionDecision::Allow,
                })
            }
        }

        let provider =
            MerchantUserProvider::new(store()).with_restriction(Arc::new(DenyAuthentication));
        assert!(provider.resolve("alice", &RequestContext::default()).is_err());
        assert!(provider.refresh("alice").is_ok());
    }
}
