//! Integration Support Module
//!
//! Wires a [`PortalSecurityConfig`] into a ready-to-use login pipeline.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use merchant_portal_security::prelude::*;
//!
//! let config = PortalSecurityConfig::from_env()?;
//! let provider = MerchantUserProvider::new(Arc::new(user_store));
//! let security = MerchantPortalSecurity::new(&config, provider)?;
//!
//! // Enforce the access rules on the portal router
//! let app = Router::new()
//!     .merge(portal_routes)
//!     .with_merchant_firewall(security.guard());
//!
//! // In the login_check handler
//! if let Some(response) = security.handle_login(&request, &session) {
//!     return response.into_response();
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::request::Parts;

use crate::authenticator::MerchantLoginFormAuthenticator;
use crate::config::PortalSecurityConfig;
use crate::crypto::CredentialValidator;
use crate::error::StoreError;
use crate::firewall::{FirewallError, FirewallMode, FirewallOptions, FirewallZone, SecurityBuilder};
use crate::handlers::{
    process_login, AuthResponse, DefaultFailureHandler, DefaultSuccessHandler, FailureHandler,
    SuccessHandler,
};
use crate::layers::FirewallGuard;
use crate::login::{AttemptStore, InMemoryAttemptStore, LoginBlocker};
use crate::observability::SecurityEvent;
use crate::provider::MerchantUserProvider;
use crate::request::{ClientIpSource, LoginRequest};
use crate::session::{SecurityTokenUpdater, TokenRefresh, TokenRoleChecker, TokenStorage};

/// The assembled merchant portal security zone
pub struct MerchantPortalSecurity {
    firewall: String,
    options: FirewallOptions,
    client_ip_source: ClientIpSource,
    builder: SecurityBuilder,
    guard: FirewallGuard,
    updater: SecurityTokenUpdater,
    success: Arc<dyn SuccessHandler>,
    failure: Arc<dyn FailureHandler>,
}

impl std::fmt::Debug for MerchantPortalSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantPortalSecurity")
            .field("firewall", &self.firewall)
            .field("options", &self.options)
            .field("client_ip_source", &self.client_ip_source)
            .field("builder", &self.builder)
            .finish_non_exhaustive()
    }
}

impl MerchantPortalSecurity {
    /// Assemble the zone with an in-memory attempt store
    pub fn new(
        config: &PortalSecurityConfig,
        provider: MerchantUserProvider,
    ) -> Result<Self, FirewallError> {
        Self::with_attempt_store(config, provider, Arc::new(InMemoryAttemptStore::new()))
    }

    /// Assemble the zone counting attempts in `attempts`.
    ///
    /// Use a shared store when several instances serve the portal.
    pub fn with_attempt_store(
        config: &PortalSecurityConfig,
        provider: MerchantUserProvider,
        attempts: Arc<dyn AttemptStore>,
    ) -> Result<Self, FirewallError> {
        config.validate()?;

        let validator = CredentialValidator::new(config.hashing)?;
        let blocker = LoginBlocker::with_store(config.lockout.clone(), attempts);
        let authenticator = MerchantLoginFormAuthenticator::new(provider, validator, blocker)
            .with_firewall(config.firewall_name.clone())
            .with_options(config.options.clone())
            .with_role(config.required_role.clone());

        let updater =
            SecurityTokenUpdater::new(authenticator.provider().clone(), config.required_role.clone());

        let mut builder = SecurityBuilder::new();
        config.registrar().extend(&mut builder, authenticator)?;

        let guard = FirewallGuard::new(
            builder.access_rules().clone(),
            config.options.login_path.clone(),
        );

        Ok(Self {
            firewall: config.firewall_name.clone(),
            options: config.options.clone(),
            client_ip_source: config.client_ip_source,
            builder,
            guard,
            updater,
            success: Arc::new(DefaultSuccessHandler::new(config.options.clone())),
            failure: Arc::new(DefaultFailureHandler::new(config.options.clone())),
        })
    }

    /// Replace the success handler
    pub fn with_success_handler(mut self, handler: Arc<dyn SuccessHandler>) -> Self {
        self.success = handler;
        self
    }

    /// Replace the failure handler
    pub fn with_failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure = handler;
        self
    }

    /// The registered zone
    pub fn zone(&self) -> Option<&FirewallZone> {
        self.builder.firewall(&self.firewall)
    }

    /// Login mechanism of the zone
    pub fn mode(&self) -> FirewallMode {
        self.zone().map(FirewallZone::mode).unwrap_or_default()
    }

    /// The bound authenticator (`None` in legacy form-login mode)
    pub fn authenticator(&self) -> Option<&MerchantLoginFormAuthenticator> {
        self.zone().and_then(FirewallZone::authenticator)
    }

    /// Zones and rules collected during assembly
    pub fn security_builder(&self) -> &SecurityBuilder {
        &self.builder
    }

    /// Middleware state enforcing the access rules
    pub fn guard(&self) -> FirewallGuard {
        self.guard.clone()
    }

    /// Build a [`LoginRequest`], reading the client address the configured way
    pub fn login_request(&self, parts: &Parts, form: HashMap<String, String>) -> LoginRequest {
        LoginRequest::from_parts_with(parts, form, self.client_ip_source)
    }

    /// Run the login pipeline for a request to the check path.
    ///
    /// Returns `None` when the zone has no authenticator or the request is
    /// not a login form submission; the host answers those itself.
    pub fn handle_login(
        &self,
        request: &LoginRequest,
        storage: &dyn TokenStorage,
    ) -> Option<AuthResponse> {
        let authenticator = self.authenticator()?;
        if !authenticator.supports(request) {
            return None;
        }
        Some(process_login(
            authenticator,
            request,
            storage,
            self.success.as_ref(),
            self.failure.as_ref(),
        ))
    }

    /// Re-synchronize the session principal with the user store
    pub fn refresh_token(&self, storage: &dyn TokenStorage) -> Result<TokenRefresh, StoreError> {
        let checker = TokenRoleChecker::new(storage);
        self.updater.refresh(storage, &checker)
    }

    /// Token updater acting on sessions of this zone
    pub fn token_updater(&self) -> &SecurityTokenUpdater {
        &self.updater
    }

    /// Clear the session token and redirect to the login page
    pub fn logout(&self, storage: &dyn TokenStorage) -> AuthResponse {
        if let Some(token) = storage.get() {
            crate::security_event!(
                SecurityEvent::Logout,
                username = %token.username(),
                firewall = %token.firewall,
                "Merchant user logged out"
            );
        }
        storage.clear();
        AuthResponse::redirect(self.options.login_path.clone())
    }
}
