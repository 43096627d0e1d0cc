//! Success and Failure Handlers (SI-11)
//!
//! Translate an [`AuthenticationOutcome`] into what the client sees. Both
//! default handlers answer with `303 See Other`:
//!
//! - success stores a [`SecurityToken`] and redirects to the requested target
//!   path when it is a safe local path, else to the default landing page
//! - failure attaches a generic flash message and redirects to the login page
//!
//! Neither response says which step failed (SI-11).

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::authenticator::{AuthenticationOutcome, MerchantLoginFormAuthenticator};
use crate::error::AuthenticationFailure;
use crate::firewall::FirewallOptions;
use crate::observability::SecurityEvent;
use crate::request::LoginRequest;
use crate::session::{SecurityToken, TokenStorage};

// ============================================================================
// Responses
// ============================================================================

/// Severity of a flash message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    /// Error banner
    Error,
}

/// One-shot message for the next rendered page.
///
/// Attached to the response extensions; the host's session layer moves it
/// into its flash bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlashMessage {
    /// Severity
    pub level: FlashLevel,
    /// Text shown to the user
    pub message: &'static str,
}

/// A redirect produced by a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    /// Redirect target
    pub location: String,
    /// Message for the next page
    pub flash: Option<FlashMessage>,
}

impl AuthResponse {
    /// Redirect without a message
    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            flash: None,
        }
    }

    /// Builder: attach an error flash
    pub fn with_error(mut self, message: &'static str) -> Self {
        self.flash = Some(FlashMessage {
            level: FlashLevel::Error,
            message,
        });
        self
    }
}

impl IntoResponse for AuthResponse {
    fn into_response(self) -> Response {
        let location = match HeaderValue::from_str(&self.location) {
            Ok(value) => value,
            Err(_) => HeaderValue::from_static("/"),
        };

        let mut response = (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response();
        if let Some(flash) = self.flash {
            response.extensions_mut().insert(flash);
        }
        response
    }
}

/// Whether `path` is a same-origin absolute path.
///
/// Rejects protocol-relative (`//evil`), backslash and scheme forms, and
/// anything with control characters.
pub fn is_safe_target_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.contains('\\')
        && !path.contains("://")
        && !path.chars().any(char::is_control)
}

// ============================================================================
// Handlers
// ============================================================================

/// Handles a successful authentication
pub trait SuccessHandler: Send + Sync {
    /// Persist the token and build the response
    fn on_success(
        &self,
        request: &LoginRequest,
        token: SecurityToken,
        storage: &dyn TokenStorage,
    ) -> AuthResponse;
}

/// Handles a failed authentication
pub trait FailureHandler: Send + Sync {
    /// Build the response
    fn on_failure(&self, request: &LoginRequest, failure: AuthenticationFailure) -> AuthResponse;
}

/// Stores the token and redirects to the target path
#[derive(Debug, Clone, Default)]
pub struct DefaultSuccessHandler {
    options: FirewallOptions,
}

impl DefaultSuccessHandler {
    /// Create a handler for the given form options
    pub fn new(options: FirewallOptions) -> Self {
        Self { options }
    }

    /// Where to go after login
    pub fn target_path(&self, request: &LoginRequest) -> String {
        request
            .field(&self.options.target_path_parameter)
            .filter(|target| is_safe_target_path(target))
            .filter(|target| *target != self.options.login_path && *target != self.options.check_path)
            .unwrap_or(&self.options.default_target_path)
            .to_string()
    }
}

impl SuccessHandler for DefaultSuccessHandler {
    fn on_success(
        &self,
        request: &LoginRequest,
        token: SecurityToken,
        storage: &dyn TokenStorage,
    ) -> AuthResponse {
        crate::security_event!(
            SecurityEvent::SessionCreated,
            username = %token.username(),
            firewall = %token.firewall,
            ip_address = %request.context.addr_for_log(),
            "Merchant session established"
        );
        storage.set(token);
        AuthResponse::redirect(self.target_path(request))
    }
}

/// Flashes a generic message and redirects to the login page
#[derive(Debug, Clone, Default)]
pub struct DefaultFailureHandler {
    options: FirewallOptions,
}

impl DefaultFailureHandler {
    /// Create a handler for the given form options
    pub fn new(options: FirewallOptions) -> Self {
        Self { options }
    }
}

impl FailureHandler for DefaultFailureHandler {
    fn on_failure(&self, _request: &LoginRequest, failure: AuthenticationFailure) -> AuthResponse {
        AuthResponse::redirect(self.options.failure_path.clone()).with_error(failure.message())
    }
}

/// Authenticate a login request and dispatch to the matching handler.
///
/// The token is written only after a complete success.
pub fn process_login(
    authenticator: &MerchantLoginFormAuthenticator,
    request: &LoginRequest,
    storage: &dyn TokenStorage,
    success: &dyn SuccessHandler,
    failure: &dyn FailureHandler,
) -> AuthResponse {
    match authenticator.authenticate(request) {
        AuthenticationOutcome::Success {
            principal,
            credential_fingerprint,
        } => {
            let token = SecurityToken::new(authenticator.firewall(), principal, credential_fingerprint);
            success.on_success(request, token, storage)
        }
        AuthenticationOutcome::Failure(kind) => failure.on_failure(request, kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CredentialValidator, HashingParams};
    use crate::login::{LockoutPolicy, LoginBlocker};
    use crate::provider::MerchantUserProvider;
    use crate::session::InMemoryTokenStorage;
    use crate::user::{InMemoryUserStore, UserRecord};
    use std::sync::Arc;

    fn authenticator() -> MerchantLoginFormAuthenticator {
        let validator = CredentialValidator::new(HashingParams::insecure_fast()).unwrap();
        let store = Arc::new(InMemoryUserStore::new());
        store.upsert(UserRecord::new("alice", validator.hash("alice-secret").unwrap()));
        MerchantLoginFormAuthenticator::new(
            MerchantUserProvider::new(store),
            validator,
            LoginBlocker::new(LockoutPolicy::default()),
        )
    }

    fn login(secret: &str) -> LoginRequest {
        LoginRequest::post("/security-merchant-portal-gui/login_check")
            .with_field("username", "alice")
            .with_field("password", secret)
    }

    #[test]
    fn test_safe_target_paths() {
        assert!(is_safe_target_path("/product-merchant-portal-gui/products?page=2"));
        assert!(!is_safe_target_path("//evil.example/"));
        assert!(!is_safe_target_path("https://evil.example/"));
        assert!(!is_safe_target_path("/\\evil.example"));
        assert!(!is_safe_target_path("relative/path"));
        assert!(!is_safe_target_path("/a\r\nSet-Cookie: x"));
    }

    #[test]
    fn test_success_redirects_to_target() {
        let handler = DefaultSuccessHandler::default();
        let request = login("x").with_field("_target_path", "/sales-merchant-portal-gui/orders");
        assert_eq!(handler.target_path(&request), "/sales-merchant-portal-gui/orders");

        let unsafe_request = login("x").with_field("_target_path", "//evil.example");
        assert_eq!(
            handler.target_path(&unsafe_request),
            "/dashboard-merchant-portal-gui/dashboard"
        );

        let loop_request = login("x").with_field("_target_path", "/security-merchant-portal-gui/login");
        assert_eq!(
            handler.target_path(&loop_request),
            "/dashboard-merchant-portal-gui/dashboard"
        );
    }

    #[test]
    fn test_process_login_success_stores_token() {
        let authenticator = authenticator();
        let storage = InMemoryTokenStorage::new();

        let response = process_login(
            &authenticator,
            &login("alice-secret"),
            &storage,
            &DefaultSuccessHandler::default(),
            &DefaultFailureHandler::default(),
        );

        assert_eq!(response, AuthResponse::redirect("/dashboard-merchant-portal-gui/dashboard"));
        assert_eq!(storage.get().unwrap().username(), "alice");
    }

    #[test]
    fn test_process_login_failure_flashes_generic_message() {
        let authenticator = authenticator();
        let storage = InMemoryTokenStorage::new();

        let response = process_login(
            &authenticator,
            &login("wrong"),
            &storage,
            &DefaultSuccessHandler::default(),
            &DefaultFailureHandler::default(),
        );

        assert_eq!(response.location, "/security-merchant-portal-gui/login");
        assert_eq!(response.flash.unwrap().message, "Authentication failed!");
        assert!(storage.get().is_none());
    }

    #[test]
    fn test_store_unavailable_message() {
        let response = DefaultFailureHandler::default()
            .on_failure(&login("x"), AuthenticationFailure::StoreUnavailable);
        assert_eq!(
            response.flash.unwrap().message,
            "Authentication is temporarily unavailable. Please try again."
        );
    }

    #[test]
    fn test_into_response_is_see_other() {
        let response = AuthResponse::redirect("/security-merchant-portal-gui/login")
            .with_error("Authentication failed!")
            .into_response();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/security-merchant-portal-gui/login"
        );
        assert_eq!(
            response.extensions().get::<FlashMessage>().unwrap().message,
            "Authentication failed!"
        );
    }
}
