//! # Merchant Portal Security
//!
//! Login pipeline and firewall for the merchant portal of an Axum
//! application.
//!
//! ## Features
//!
//! - **User Provider** (IA-2): resolves merchant users through an ordered
//!   chain of criteria expanders and login restrictions
//! - **Login Attempt Blocker** (AC-7): per-identity and per-address failure
//!   counters with progressive lockout
//! - **Form Authenticator** (IA-2, IA-5): Argon2id verification with uniform
//!   failures for unknown users, wrong secrets and blocked accounts
//! - **Session Tokens** (AC-12): principal refresh and revocation on
//!   credential change
//! - **Firewall** (AC-3, AC-14): a `MerchantUser` zone with ordered
//!   `(pattern, role)` access rules and an Axum middleware enforcing them
//! - **Security Events** (AU-2, AU-3): structured `tracing` audit records
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use merchant_portal_security::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     observability::init(&ObservabilityConfig::from_env()?)?;
//!
//!     let config = PortalSecurityConfig::from_env()?;
//!     let provider = MerchantUserProvider::new(Arc::new(user_store));
//!     let security = MerchantPortalSecurity::new(&config, provider)?;
//!
//!     let app = Router::new()
//!         .merge(portal_routes)
//!         .with_merchant_firewall(security.guard());
//!     Ok(())
//! }
//! ```

pub mod authenticator;
mod config;
mod crypto;
pub mod error;
pub mod firewall;
pub mod handlers;
mod integration;
mod layers;
pub mod login;
pub mod observability;
mod parse;
pub mod prelude;
pub mod principal;
pub mod provider;
pub mod request;
pub mod session;
pub mod user;

// Re-exports
pub use authenticator::{AuthenticationOutcome, Credentials, MerchantLoginFormAuthenticator};
pub use config::{PortalSecurityConfig, PortalSecurityConfigBuilder, ENV_PREFIX};
pub use crypto::{
    constant_time_eq, constant_time_str_eq, credential_fingerprint, CredentialValidator,
    HashingParams,
};
pub use error::{
    AuthenticationFailure, ConfigError, ErrorResponse, ProviderError, RestrictionReason, StoreError,
};
pub use firewall::{
    AccessDecision, AccessRequirement, AccessRule, AccessRuleTable, FirewallError, FirewallMode,
    FirewallOptions, FirewallZone, MerchantPortalFirewall, SecurityBuilder,
};
pub use handlers::{AuthResponse, DefaultFailureHandler, DefaultSuccessHandler, FlashMessage};
pub use integration::MerchantPortalSecurity;
pub use layers::{firewall_middleware, FirewallGuard, MerchantPortalRouter};
pub use login::{AttemptStore, InMemoryAttemptStore, LockoutPolicy, LoginBlocker};
pub use observability::{ObservabilityConfig, ObservabilityConfigBuilder};
pub use parse::{parse_bool, parse_duration};
pub use principal::{MerchantUser, ROLE_MERCHANT_USER};
pub use provider::{CriteriaExpander, LoginRestriction, MerchantUserProvider};
pub use request::{ClientIpSource, LoginRequest, RequestContext};
pub use session::{
    AuthorizationChecker, InMemoryTokenStorage, SecurityToken, SecurityTokenUpdater, TokenRefresh,
    TokenStorage,
};
pub use user::{InMemoryUserStore, UserCriteria, UserRecord, UserStatus, UserStore};
