//! Firewall Registration and Access Rules (AC-3, AC-14)
//!
//! Binds the merchant user pipeline into a named security zone:
//!
//! - one [`FirewallZone`] (default name `MerchantUser`) with its form options
//! - an ordered [`AccessRuleTable`] of `(pattern, requirement)` pairs, first
//!   match wins
//!
//! # AC-14 (Permitted Actions without Identification)
//!
//! Only paths matching a [`AccessRequirement::Public`] rule are reachable
//! without a token. The default table opens the login area
//! (`^/security-merchant-portal-gui`) and requires `ROLE_MERCHANT_USER` for
//! every other `*-merchant-portal-gui/` route.
//!
//! # Authenticator selection
//!
//! [`FirewallMode`] is resolved once from configuration. There is no
//! runtime probing for which login mechanism is available.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use crate::authenticator::MerchantLoginFormAuthenticator;
use crate::error::ConfigError;
use crate::observability::SecurityEvent;
use crate::principal::{MerchantUser, ROLE_MERCHANT_USER};
use crate::provider::MerchantUserProvider;

/// Default zone name
pub const MERCHANT_USER_FIREWALL: &str = "MerchantUser";

/// Pattern of the public login area
pub const PUBLIC_PATH_PATTERN: &str = "^/security-merchant-portal-gui";

/// Pattern of the protected merchant portal routes
pub const MERCHANT_PORTAL_ROUTE_PATTERN: &str = "^/(.+)-merchant-portal-gui/";

/// Errors registering a firewall
#[derive(Debug, Error)]
pub enum FirewallError {
    /// A zone with this name already exists
    #[error("firewall `{0}` is already registered")]
    DuplicateFirewall(String),

    /// Invalid rule or option
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// Access Rules
// ============================================================================

/// What a matched path requires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRequirement {
    /// Reachable without authentication
    Public,
    /// Requires a token whose principal has this role
    Role(String),
}

/// A compiled `(pattern, requirement)` pair.
///
/// Patterns are regular expressions searched anywhere in the path; anchor
/// them with `^` to match prefixes.
#[derive(Debug, Clone)]
pub struct AccessRule {
    pattern: Regex,
    requirement: AccessRequirement,
}

impl AccessRule {
    /// Compile a rule
    pub fn new(pattern: &str, requirement: AccessRequirement) -> Result<Self, ConfigError> {
        let compiled = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: compiled,
            requirement,
        })
    }

    /// Rule making `pattern` public
    pub fn public(pattern: &str) -> Result<Self, ConfigError> {
        Self::new(pattern, AccessRequirement::Public)
    }

    /// Rule requiring `role` for `pattern`
    pub fn role(pattern: &str, role: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(pattern, AccessRequirement::Role(role.into()))
    }

    /// Source pattern
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Requirement when matched
    pub fn requirement(&self) -> &AccessRequirement {
        &self.requirement
    }

    /// Whether the rule applies to `path` (anywhere in it unless anchored)
    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }
}

/// Result of checking a request against the rule table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// No authentication needed
    Public,
    /// The caller holds the required role
    Granted,
    /// A role is required and the caller is not authenticated
    AuthenticationRequired(String),
    /// A role is required and the caller lacks it
    Denied(String),
}

impl AccessDecision {
    /// Whether the request may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Public | Self::Granted)
    }
}

/// Ordered access rules; the first matching rule decides.
///
/// Patterns are unanchored regexes, so a rule matches anywhere in the path.
/// A public `/login` rule placed first also makes `/portal/login-history`
/// public and shadows every rule after it. Anchor patterns with `^` (and `$`
/// for exact paths) and list the narrow public rules before the broad
/// protected ones.
#[derive(Debug, Clone, Default)]
pub struct AccessRuleTable {
    rules: Vec<AccessRule>,
}

impl AccessRuleTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule (evaluated after those already present)
    pub fn push(&mut self, rule: AccessRule) {
        self.rules.push(rule);
    }

    /// Builder: append a rule
    pub fn with_rule(mut self, rule: AccessRule) -> Self {
        self.push(rule);
        self
    }

    /// Compile a table from `(pattern, requirement)` pairs
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, AccessRequirement)>,
    {
        let rules = pairs
            .into_iter()
            .map(|(pattern, requirement)| AccessRule::new(pattern, requirement))
            .collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    /// Requirement of the first rule matching `path`, if any
    pub fn evaluate(&self, path: &str) -> Option<&AccessRequirement> {
        self.rules
            .iter()
            .find(|rule| rule.matches(path))
            .map(AccessRule::requirement)
    }

    /// Decide a request for `principal` (`None` when unauthenticated).
    ///
    /// Paths no rule matches are left to the host and treated as public.
    pub fn decide(&self, path: &str, principal: Option<&MerchantUser>) -> AccessDecision {
        match self.evaluate(path) {
            None | Some(AccessRequirement::Public) => AccessDecision::Public,
            Some(AccessRequirement::Role(role)) => match principal {
                None => AccessDecision::AuthenticationRequired(role.clone()),
                Some(user) if user.has_role(role) => AccessDecision::Granted,
                Some(_) => AccessDecision::Denied(role.clone()),
            },
        }
    }
}

// ============================================================================
// Firewall Options
// ============================================================================

/// Which login mechanism a zone binds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FirewallMode {
    /// The merchant login form authenticator
    #[default]
    Authenticator,
    /// Host-side form login; the zone only carries provider and form options
    LegacyFormLogin,
}

impl FirewallMode {
    /// Parse a configuration value (`authenticator` or `legacy_form_login`)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "authenticator" => Some(Self::Authenticator),
            "legacy_form_login" | "legacy" | "form_login" => Some(Self::LegacyFormLogin),
            _ => None,
        }
    }
}

/// Paths and form field names of the login flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallOptions {
    /// Login form page
    pub login_path: String,
    /// Path the login form posts to
    pub check_path: String,
    /// Logout path
    pub logout_path: String,
    /// Landing page after login when no target is requested
    pub default_target_path: String,
    /// Where failed logins are redirected
    pub failure_path: String,
    /// Form field holding the identity
    pub username_parameter: String,
    /// Form field holding the secret
    pub password_parameter: String,
    /// Form field holding the requested target path
    pub target_path_parameter: String,
}

impl Default for FirewallOptions {
    fn default() -> Self {
        Self {
            login_path: "/security-merchant-portal-gui/login".to_string(),
            check_path: "/security-merchant-portal-gui/login_check".to_string(),
            logout_path: "/security-merchant-portal-gui/logout".to_string(),
            default_target_path: "/dashboard-merchant-portal-gui/dashboard".to_string(),
            failure_path: "/security-merchant-portal-gui/login".to_string(),
            username_parameter: "username".to_string(),
            password_parameter: "password".to_string(),
            target_path_parameter: "_target_path".to_string(),
        }
    }
}

impl FirewallOptions {
    /// Reject relative or empty paths
    pub fn validate(&self) -> Result<(), ConfigError> {
        let paths = [
            ("login_path", &self.login_path),
            ("check_path", &self.check_path),
            ("logout_path", &self.logout_path),
            ("default_target_path", &self.default_target_path),
            ("failure_path", &self.failure_path),
        ];
        for (key, value) in paths {
            if !value.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: value.clone(),
                });
            }
        }

        let params = [
            ("username_parameter", &self.username_parameter),
            ("password_parameter", &self.password_parameter),
            ("target_path_parameter", &self.target_path_parameter),
        ];
        for (key, value) in params {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Security Builder
// ============================================================================

/// Login binding of a zone
#[derive(Debug, Clone)]
pub enum ZoneBinding {
    /// Requests to the check path go through the authenticator
    Authenticator(Arc<MerchantLoginFormAuthenticator>),
    /// The host runs form login against this provider
    FormLogin(MerchantUserProvider),
}

/// A registered security zone
#[derive(Debug, Clone)]
pub struct FirewallZone {
    /// Zone name
    pub name: String,
    /// Login flow options
    pub options: FirewallOptions,
    /// Login binding
    pub binding: ZoneBinding,
}

impl FirewallZone {
    /// Authenticator of the zone, if it binds one
    pub fn authenticator(&self) -> Option<&MerchantLoginFormAuthenticator> {
        match &self.binding {
            ZoneBinding::Authenticator(authenticator) => Some(authenticator),
            ZoneBinding::FormLogin(_) => None,
        }
    }

    /// Mode the zone was registered with
    pub fn mode(&self) -> FirewallMode {
        match self.binding {
            ZoneBinding::Authenticator(_) => FirewallMode::Authenticator,
            ZoneBinding::FormLogin(_) => FirewallMode::LegacyFormLogin,
        }
    }
}

/// Collects zones and access rules from every registrar
#[derive(Debug, Default)]
pub struct SecurityBuilder {
    firewalls: BTreeMap<String, FirewallZone>,
    access_rules: AccessRuleTable,
}

impl SecurityBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a zone. Names are unique
    pub fn add_firewall(&mut self, zone: FirewallZone) -> Result<&mut Self, FirewallError> {
        if self.firewalls.contains_key(&zone.name) {
            return Err(FirewallError::DuplicateFirewall(zone.name));
        }
        zone.options.validate()?;
        self.firewalls.insert(zone.name.clone(), zone);
        Ok(self)
    }

    /// Append access rules after those already registered
    pub fn add_access_rules<I>(&mut self, rules: I) -> &mut Self
    where
        I: IntoIterator<Item = AccessRule>,
    {
        for rule in rules {
            self.access_rules.push(rule);
        }
        self
    }

    /// Look up a zone
    pub fn firewall(&self, name: &str) -> Option<&FirewallZone> {
        self.firewalls.get(name)
    }

    /// Registered zone names
    pub fn firewall_names(&self) -> impl Iterator<Item = &str> {
        self.firewalls.keys().map(String::as_str)
    }

    /// The combined rule table
    pub fn access_rules(&self) -> &AccessRuleTable {
        &self.access_rules
    }
}

// ============================================================================
// Merchant Portal Registrar
// ============================================================================

/// Registers the merchant user zone and its access rules
#[derive(Debug, Clone)]
pub struct MerchantPortalFirewall {
    name: String,
    mode: FirewallMode,
    options: FirewallOptions,
    public_pattern: String,
    protected_pattern: String,
    role: String,
}

impl Default for MerchantPortalFirewall {
    fn default() -> Self {
        Self {
            name: MERCHANT_USER_FIREWALL.to_string(),
            mode: FirewallMode::default(),
            options: FirewallOptions::default(),
            public_pattern: PUBLIC_PATH_PATTERN.to_string(),
            protected_pattern: MERCHANT_PORTAL_ROUTE_PATTERN.to_string(),
            role: ROLE_MERCHANT_USER.to_string(),
        }
    }
}

impl MerchantPortalFirewall {
    /// Registrar with the default zone name, paths and role
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: zone name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder: login mechanism
    pub fn mode(mut self, mode: FirewallMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder: form options
    pub fn options(mut self, options: FirewallOptions) -> Self {
        self.options = options;
        self
    }

    /// Builder: pattern of the public login area
    pub fn public_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.public_pattern = pattern.into();
        self
    }

    /// Builder: pattern of the protected routes
    pub fn protected_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.protected_pattern = pattern.into();
        self
    }

    /// Builder: role required on protected routes
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// The two access rules of the zone, public area first
    pub fn access_rules(&self) -> Result<[AccessRule; 2], ConfigError> {
        Ok([
            AccessRule::public(&self.public_pattern)?,
            AccessRule::role(&self.protected_pattern, self.role.clone())?,
        ])
    }

    /// Register the zone and its rules.
    ///
    /// In [`FirewallMode::Authenticator`] mode the zone binds `authenticator`;
    /// in [`FirewallMode::LegacyFormLogin`] mode only its provider is kept.
    pub fn extend(
        &self,
        builder: &mut SecurityBuilder,
        authenticator: MerchantLoginFormAuthenticator,
    ) -> Result<(), FirewallError> {
        let rules = self.access_rules()?;

        let binding = match self.mode {
            FirewallMode::Authenticator => ZoneBinding::Authenticator(Arc::new(authenticator)),
            FirewallMode::LegacyFormLogin => {
                ZoneBinding::FormLogin(authenticator.provider().clone())
            }
        };

        builder.add_firewall(FirewallZone {
            name: self.name.clone(),
            options: self.options.clone(),
            binding,
        })?;
        builder.add_access_rules(rules);

        crate::security_event!(
            SecurityEvent::ConfigurationChanged,
            firewall = %self.name,
            mode = ?self.mode,
            public_pattern = %self.public_pattern,
            protected_pattern = %self.protected_pattern,
            role = %self.role,
            "Firewall registered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CredentialValidator, HashingParams};
    use crate::login::{LockoutPolicy, LoginBlocker};
    use crate::user::{InMemoryUserStore, UserRecord};

    fn user_with_role(role: &str) -> MerchantUser {
        MerchantUser::with_role(UserRecord::new("alice", "h"), role).unwrap()
    }

    fn authenticator() -> MerchantLoginFormAuthenticator {
        MerchantLoginFormAuthenticator::new(
            MerchantUserProvider::new(Arc::new(InMemoryUserStore::new())),
            CredentialValidator::new(HashingParams::insecure_fast()).unwrap(),
            LoginBlocker::new(LockoutPolicy::default()),
        )
    }

    #[test]
    fn test_public_and_role_rules() {
        let table = AccessRuleTable::from_pairs([
            ("/login", AccessRequirement::Public),
            ("/portal/.*", AccessRequirement::Role("merchant".into())),
        ])
        .unwrap();

        assert_eq!(table.decide("/login", None), AccessDecision::Public);
        assert_eq!(
            table.decide("/portal/orders", None),
            AccessDecision::AuthenticationRequired("merchant".into())
        );
        assert_eq!(
            table.decide("/portal/orders", Some(&user_with_role("viewer"))),
            AccessDecision::Denied("merchant".into())
        );
        assert_eq!(
            table.decide("/portal/orders", Some(&user_with_role("merchant"))),
            AccessDecision::Granted
        );
    }

    #[test]
    fn test_first_match_wins() {
        let table = AccessRuleTable::new()
            .with_rule(AccessRule::public("^/security-merchant-portal-gui").unwrap())
            .with_rule(AccessRule::role("^/(.+)-merchant-portal-gui/", ROLE_MERCHANT_USER).unwrap());

        assert_eq!(
            table.evaluate("/security-merchant-portal-gui/login"),
            Some(&AccessRequirement::Public)
        );
        assert_eq!(
            table.evaluate("/product-merchant-portal-gui/products"),
            Some(&AccessRequirement::Role(ROLE_MERCHANT_USER.into()))
        );
        assert_eq!(table.evaluate("/health"), None);
        assert!(table.decide("/health", None).is_allowed());
    }

    #[test]
    fn test_unanchored_public_rule_shadows_protected_paths() {
        let unanchored = AccessRuleTable::new()
            .with_rule(AccessRule::public("/login").unwrap())
            .with_rule(AccessRule::role("^/portal/", ROLE_MERCHANT_USER).unwrap());
        assert_eq!(unanchored.decide("/portal/login-history", None), AccessDecision::Public);

        let anchored = AccessRuleTable::new()
            .with_rule(AccessRule::public("^/login$").unwrap())
            .with_rule(AccessRule::role("^/portal/", ROLE_MERCHANT_USER).unwrap());
        assert_eq!(anchored.decide("/login", None), AccessDecision::Public);
        assert_eq!(
            anchored.decide("/portal/login-history", None),
            AccessDecision::AuthenticationRequired(ROLE_MERCHANT_USER.into())
        );
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = AccessRule::public("^/(unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_firewall_mode_parse() {
        assert_eq!(FirewallMode::parse("authenticator"), Some(FirewallMode::Authenticator));
        assert_eq!(FirewallMode::parse("Legacy-Form-Login"), Some(FirewallMode::LegacyFormLogin));
        assert_eq!(FirewallMode::parse("auto"), None);
    }

    #[test]
    fn test_options_validation() {
        assert!(FirewallOptions::default().validate().is_ok());

        let relative = FirewallOptions {
            login_path: "login".into(),
            ..FirewallOptions::default()
        };
        assert!(matches!(
            relative.validate(),
            Err(ConfigError::InvalidValue { key: "login_path", .. })
        ));

        let blank = FirewallOptions {
            password_parameter: " ".into(),
            ..FirewallOptions::default()
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_registrar_default_rules() {
        let mut builder = SecurityBuilder::new();
        MerchantPortalFirewall::new()
            .extend(&mut builder, authenticator())
            .unwrap();

        let zone = builder.firewall(MERCHANT_USER_FIREWALL).unwrap();
        assert_eq!(zone.mode(), FirewallMode::Authenticator);
        assert!(zone.authenticator().is_some());

        let patterns: Vec<_> = builder.access_rules().rules().iter().map(|r| r.pattern()).collect();
        assert_eq!(patterns, vec![PUBLIC_PATH_PATTERN, MERCHANT_PORTAL_ROUTE_PATTERN]);
    }

    #[test]
    fn test_registrar_legacy_mode() {
        let mut builder = SecurityBuilder::new();
        MerchantPortalFirewall::new()
            .mode(FirewallMode::LegacyFormLogin)
            .extend(&mut builder, authenticator())
            .unwrap();

        let zone = builder.firewall(MERCHANT_USER_FIREWALL).unwrap();
        assert_eq!(zone.mode(), FirewallMode::LegacyFormLogin);
        assert!(zone.authenticator().is_none());
    }

    #[test]
    fn test_duplicate_firewall_rejected() {
        let mut builder = SecurityBuilder::new();
        let registrar = MerchantPortalFirewall::new();
        registrar.extend(&mut builder, authenticator()).unwrap();

        let err = registrar.extend(&mut builder, authenticator()).unwrap_err();
        assert!(matches!(err, FirewallError::DuplicateFirewall(name) if name == "MerchantUser"));
        assert_eq!(builder.access_rules().rules().len(), 2);

        MerchantPortalFirewall::new()
            .name("MerchantUserApi")
            .extend(&mut builder, authenticator())
            .unwrap();
        assert_eq!(builder.firewall_names().count(), 2);
    }
}
