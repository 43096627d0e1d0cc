//! Merchant portal security configuration
//!
//! Provides a builder-pattern configuration for the firewall zone, the
//! login form, the attempt blocker (AC-7) and password hashing (IA-5).

use std::time::Duration;

use crate::crypto::HashingParams;
use crate::error::ConfigError;
use crate::firewall::{
    AccessRule, FirewallMode, FirewallOptions, MerchantPortalFirewall, MERCHANT_PORTAL_ROUTE_PATTERN,
    MERCHANT_USER_FIREWALL, PUBLIC_PATH_PATTERN,
};
use crate::login::LockoutPolicy;
use crate::parse::{parse_bool, parse_duration};
use crate::principal::ROLE_MERCHANT_USER;
use crate::request::ClientIpSource;

/// Prefix of every environment variable read by [`PortalSecurityConfig::from_env`]
pub const ENV_PREFIX: &str = "MERCHANT_PORTAL_";

/// Configuration of the merchant portal security zone.
///
/// # Example
///
/// ```ignore
/// use merchant_portal_security::PortalSecurityConfig;
///
/// // Load from environment variables
/// let config = PortalSecurityConfig::from_env()?;
///
/// // Or build programmatically
/// let config = PortalSecurityConfig::builder()
///     .firewall_mode(FirewallMode::Authenticator)
///     .lockout_threshold(3)
///     .attempt_window(Duration::from_secs(60))
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PortalSecurityConfig {
    /// Firewall zone name
    pub firewall_name: String,

    /// Login mechanism bound to the zone
    pub firewall_mode: FirewallMode,

    /// Pattern of paths reachable without login (AC-14)
    pub public_path_pattern: String,

    /// Pattern of paths requiring `required_role` (AC-3)
    pub protected_path_pattern: String,

    /// Role granted on login and required on protected paths
    pub required_role: String,

    /// Login form paths and field names
    pub options: FirewallOptions,

    /// Attempt blocker policy (AC-7)
    pub lockout: LockoutPolicy,

    /// Argon2id cost parameters (IA-5)
    pub hashing: HashingParams,

    /// Where the blocker reads the client address from
    pub client_ip_source: ClientIpSource,
}

impl Default for PortalSecurityConfig {
    fn default() -> Self {
        Self {
            firewall_name: MERCHANT_USER_FIREWALL.to_string(),
            firewall_mode: FirewallMode::default(),
            public_path_pattern: PUBLIC_PATH_PATTERN.to_string(),
            protected_path_pattern: MERCHANT_PORTAL_ROUTE_PATTERN.to_string(),
            required_role: ROLE_MERCHANT_USER.to_string(),
            options: FirewallOptions::default(),
            lockout: LockoutPolicy::default(),
            hashing: HashingParams::default(),
            client_ip_source: ClientIpSource::default(),
        }
    }
}

impl PortalSecurityConfig {
    /// Create a new builder for programmatic configuration.
    pub fn builder() -> PortalSecurityConfigBuilder {
        PortalSecurityConfigBuilder::default()
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// All names carry the `MERCHANT_PORTAL_` prefix.
    ///
    /// - `FIREWALL_NAME` (default: "MerchantUser")
    /// - `FIREWALL_MODE`: "authenticator" or "legacy_form_login" (default: "authenticator")
    /// - `PUBLIC_PATH_PATTERN` (default: "^/security-merchant-portal-gui")
    /// - `PROTECTED_PATH_PATTERN` (default: "^/(.+)-merchant-portal-gui/")
    /// - `REQUIRED_ROLE` (default: "ROLE_MERCHANT_USER")
    /// - `LOGIN_PATH`, `CHECK_PATH`, `LOGOUT_PATH`, `DEFAULT_TARGET_PATH`, `FAILURE_PATH`
    /// - `USERNAME_PARAMETER`, `PASSWORD_PARAMETER`, `TARGET_PATH_PARAMETER`
    /// - `LOCKOUT_THRESHOLD`: failed attempts before lockout (default: 5)
    /// - `ATTEMPT_WINDOW`: e.g. "60s", "30m" (default: "30m")
    /// - `LOCKOUT_DURATION`: (default: the attempt window)
    /// - `PROGRESSIVE_LOCKOUT`: "true"/"false" (default: "true")
    /// - `TRACK_BY_IP`: "true"/"false" (default: "true")
    /// - `IP_THRESHOLD`: failed attempts per address (default: 20)
    /// - `IP_LOCKOUT_DURATION`: (default: "1h")
    /// - `HASH_MEMORY_KIB`, `HASH_ITERATIONS`, `HASH_PARALLELISM`: Argon2id costs
    /// - `CLIENT_IP_SOURCE`: "peer" or "forwarded_headers" (default: "peer");
    ///   use "forwarded_headers" only behind a proxy that sets X-Forwarded-For
    ///
    /// Unparseable values are reported, never silently replaced by defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    /// Like [`from_env`](Self::from_env), reading unprefixed names from `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = EnvReader { lookup };

        let firewall_mode = match env.raw("FIREWALL_MODE") {
            Some(value) => FirewallMode::parse(&value).ok_or(ConfigError::InvalidValue {
                key: "MERCHANT_PORTAL_FIREWALL_MODE",
                value,
            })?,
            None => defaults.firewall_mode,
        };

        let client_ip_source = match env.raw("CLIENT_IP_SOURCE") {
            Some(value) => ClientIpSource::parse(&value).ok_or(ConfigError::InvalidValue {
                key: "MERCHANT_PORTAL_CLIENT_IP_SOURCE",
                value,
            })?,
            None => defaults.client_ip_source,
        };

        let d = &defaults.options;
        let options = FirewallOptions {
            login_path: env.string("LOGIN_PATH", &d.login_path),
            check_path: env.string("CHECK_PATH", &d.check_path),
            logout_path: env.string("LOGOUT_PATH", &d.logout_path),
            default_target_path: env.string("DEFAULT_TARGET_PATH", &d.default_target_path),
            failure_path: env.string("FAILURE_PATH", &d.failure_path),
            username_parameter: env.string("USERNAME_PARAMETER", &d.username_parameter),
            password_parameter: env.string("PASSWORD_PARAMETER", &d.password_parameter),
            target_path_parameter: env.string("TARGET_PATH_PARAMETER", &d.target_path_parameter),
        };

        let l = &defaults.lockout;
        let attempt_window = env.duration(
            "ATTEMPT_WINDOW",
            "MERCHANT_PORTAL_ATTEMPT_WINDOW",
            l.attempt_window,
        )?;
        let lockout = LockoutPolicy {
            max_attempts: env.number(
                "LOCKOUT_THRESHOLD",
                "MERCHANT_PORTAL_LOCKOUT_THRESHOLD",
                l.max_attempts,
            )?,
            attempt_window,
            lockout_duration: env.duration(
                "LOCKOUT_DURATION",
                "MERCHANT_PORTAL_LOCKOUT_DURATION",
                attempt_window,
            )?,
            progressive_lockout: env.flag(
                "PROGRESSIVE_LOCKOUT",
                "MERCHANT_PORTAL_PROGRESSIVE_LOCKOUT",
                l.progressive_lockout,
            )?,
            track_by_ip: env.flag("TRACK_BY_IP", "MERCHANT_PORTAL_TRACK_BY_IP", l.track_by_ip)?,
            max_ip_attempts: env.number(
                "IP_THRESHOLD",
                "MERCHANT_PORTAL_IP_THRESHOLD",
                l.max_ip_attempts,
            )?,
            ip_lockout_duration: env.duration(
                "IP_LOCKOUT_DURATION",
                "MERCHANT_PORTAL_IP_LOCKOUT_DURATION",
                l.ip_lockout_duration,
            )?,
            ..l.clone()
        };

        let h = defaults.hashing;
        let hashing = HashingParams {
            memory_kib: env.number("HASH_MEMORY_KIB", "MERCHANT_PORTAL_HASH_MEMORY_KIB", h.memory_kib)?,
            iterations: env.number("HASH_ITERATIONS", "MERCHANT_PORTAL_HASH_ITERATIONS", h.iterations)?,
            parallelism: env.number(
                "HASH_PARALLELISM",
                "MERCHANT_PORTAL_HASH_PARALLELISM",
                h.parallelism,
            )?,
        };

        let config = Self {
            firewall_name: env.string("FIREWALL_NAME", &defaults.firewall_name),
            firewall_mode,
            public_path_pattern: env.string("PUBLIC_PATH_PATTERN", &defaults.public_path_pattern),
            protected_path_pattern: env
                .string("PROTECTED_PATH_PATTERN", &defaults.protected_path_pattern),
            required_role: env.string("REQUIRED_ROLE", &defaults.required_role),
            options,
            lockout,
            hashing,
            client_ip_source,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that cannot be expressed in the types
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.firewall_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "firewall_name",
                value: self.firewall_name.clone(),
            });
        }
        if self.required_role.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "required_role",
                value: self.required_role.clone(),
            });
        }
        self.lockout.validate()?;
        AccessRule::public(&self.public_path_pattern)?;
        AccessRule::public(&self.protected_path_pattern)?;
        self.options.validate()
    }

    /// Registrar for the configured zone
    pub fn registrar(&self) -> MerchantPortalFirewall {
        MerchantPortalFirewall::new()
            .name(self.firewall_name.clone())
            .mode(self.firewall_mode)
            .options(self.options.clone())
            .public_pattern(self.public_path_pattern.clone())
            .protected_pattern(self.protected_path_pattern.clone())
            .role(self.required_role.clone())
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    fn duration(&self, name: &str, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        match self.raw(name) {
            Some(value) => parse_duration(&value).ok_or(ConfigError::InvalidValue { key, value }),
            None => Ok(default),
        }
    }

    fn flag(&self, name: &str, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(name) {
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidValue { key, value }),
            None => Ok(default),
        }
    }

    fn number(&self, name: &str, key: &'static str, default: u32) -> Result<u32, ConfigError> {
        match self.raw(name) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value }),
            None => Ok(default),
        }
    }
}

/// Builder for PortalSecurityConfig
#[derive(Debug, Clone, Default)]
pub struct PortalSecurityConfigBuilder {
    config: PortalSecurityConfig,
}

impl PortalSecurityConfigBuilder {
    /// Set the firewall zone name
    pub fn firewall_name(mut self, name: impl Into<String>) -> Self {
        self.config.firewall_name = name.into();
        self
    }

    /// Select the login mechanism
    pub fn firewall_mode(mut self, mode: FirewallMode) -> Self {
        self.config.firewall_mode = mode;
        self
    }

    /// Set the public path pattern
    pub fn public_path_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.public_path_pattern = pattern.into();
        self
    }

    /// Set the protected path pattern
    pub fn protected_path_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.protected_path_pattern = pattern.into();
        self
    }

    /// Set the required role
    pub fn required_role(mut self, role: impl Into<String>) -> Self {
        self.config.required_role = role.into();
        self
    }

    /// Set the login form options
    pub fn options(mut self, options: FirewallOptions) -> Self {
        self.config.options = options;
        self
    }

    /// Set failed attempts before lockout
    pub fn lockout_threshold(mut self, attempts: u32) -> Self {
        self.config.lockout.max_attempts = attempts;
        self
    }

    /// Set the attempt window; the lockout lasts as long unless set separately
    pub fn attempt_window(mut self, window: Duration) -> Self {
        self.config.lockout.attempt_window = window;
        self.config.lockout.lockout_duration = window;
        self
    }

    /// Set the lockout duration
    pub fn lockout_duration(mut self, duration: Duration) -> Self {
        self.config.lockout.lockout_duration = duration;
        self
    }

    /// Replace the whole lockout policy
    pub fn lockout_policy(mut self, policy: LockoutPolicy) -> Self {
        self.config.lockout = policy;
        self
    }

    /// Set Argon2id cost parameters
    pub fn hashing(mut self, params: HashingParams) -> Self {
        self.config.hashing = params;
        self
    }

    /// Set where the client address is read from
    pub fn client_ip_source(mut self, source: ClientIpSource) -> Self {
        self.config.client_ip_source = source;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PortalSecurityConfig {
        self.config
    }
}
