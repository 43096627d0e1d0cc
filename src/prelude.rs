//! Common imports for hosts wiring the merchant portal
//!
//! ```ignore
//! use merchant_portal_security::prelude::*;
//!
//! let security = MerchantPortalSecurity::new(&PortalSecurityConfig::from_env()?, provider)?;
//! let app = Router::new().with_merchant_firewall(security.guard());
//! ```

// =============================================================================
// Configuration
// =============================================================================

pub use crate::config::{PortalSecurityConfig, PortalSecurityConfigBuilder};
pub use crate::crypto::HashingParams;
pub use crate::firewall::{FirewallMode, FirewallOptions};
pub use crate::login::LockoutPolicy;

// =============================================================================
// Pipeline
// =============================================================================

pub use crate::integration::MerchantPortalSecurity;
pub use crate::provider::{CriteriaExpander, LoginRestriction, MerchantUserProvider};
pub use crate::request::{ClientIpSource, LoginRequest, RequestContext};
pub use crate::session::{SecurityToken, TokenRefresh, TokenStorage};
pub use crate::user::{UserCriteria, UserRecord, UserStore};

// =============================================================================
// Router Extension (AC-3)
// =============================================================================

pub use crate::layers::{FirewallGuard, MerchantPortalRouter};

// =============================================================================
// Errors and Observability
// =============================================================================

pub use crate::error::{AuthenticationFailure, ConfigError, StoreError};
pub use crate::firewall::FirewallError;
pub use crate::observability::{self, ObservabilityConfig, SecurityEvent};
