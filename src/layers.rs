//! Access enforcement for Axum routers (AC-3)
//!
//! Provides [`firewall_middleware`] and the [`MerchantPortalRouter`] trait
//! that applies it. The middleware reads the [`SecurityToken`] the host's
//! session layer placed in the request extensions; it never touches cookies.

use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::error::ErrorResponse;
use crate::firewall::{AccessDecision, AccessRuleTable};
use crate::handlers::AuthResponse;
use crate::observability::SecurityEvent;
use crate::session::SecurityToken;

/// Shared state of the access middleware
#[derive(Debug, Clone)]
pub struct FirewallGuard {
    rules: Arc<AccessRuleTable>,
    login_path: String,
}

impl FirewallGuard {
    /// Enforce `rules`, sending unauthenticated users to `login_path`
    pub fn new(rules: AccessRuleTable, login_path: impl Into<String>) -> Self {
        Self {
            rules: Arc::new(rules),
            login_path: login_path.into(),
        }
    }

    /// The enforced rules
    pub fn rules(&self) -> &AccessRuleTable {
        &self.rules
    }
}

/// Extension trait for applying the merchant firewall to an Axum Router.
///
/// # Example
///
/// ```ignore
/// use axum::{Router, routing::get};
/// use merchant_portal_security::{FirewallGuard, MerchantPortalRouter};
///
/// let app = Router::new()
///     .route("/dashboard-merchant-portal-gui/dashboard", get(dashboard))
///     .with_merchant_firewall(guard)
///     .layer(session_layer); // must run first and insert the SecurityToken
/// ```
pub trait MerchantPortalRouter {
    /// Check every request against the guard's access rules
    fn with_merchant_firewall(self, guard: FirewallGuard) -> Self;
}

impl<S> MerchantPortalRouter for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_merchant_firewall(self, guard: FirewallGuard) -> Self {
        self.layer(middleware::from_fn(move |req: Request, next: Next| {
            let guard = guard.clone();
            async move { firewall_middleware(req, next, guard).await }
        }))
    }
}

/// Middleware enforcing the access rule table (AC-3)
///
/// - public or unmatched path: pass through
/// - role required, no token: `303` redirect to the login path
/// - role required, token without the role: `403` JSON error
pub async fn firewall_middleware(req: Request, next: Next, guard: FirewallGuard) -> Response {
    let path = req.uri().path().to_string();
    let token = req.extensions().get::<SecurityToken>();

    match guard.rules.decide(&path, token.map(|t| &t.principal)) {
        AccessDecision::Public => next.run(req).await,
        AccessDecision::Granted => {
            crate::security_event!(
                SecurityEvent::AccessGranted,
                path = %path,
                username = %token.map(SecurityToken::username).unwrap_or_default(),
                "Access granted"
            );
            next.run(req).await
        }
        AccessDecision::AuthenticationRequired(role) => {
            crate::security_event!(
                SecurityEvent::AccessDenied,
                path = %path,
                required_role = %role,
                "Authentication required"
            );
            AuthResponse::redirect(guard.login_path.clone()).into_response()
        }
        AccessDecision::Denied(role) => {
            crate::security_event!(
                SecurityEvent::AccessDenied,
                path = %path,
                required_role = %role,
                username = %token.map(SecurityToken::username).unwrap_or_default(),
                "Access denied: missing role"
            );
            ErrorResponse::access_denied().into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::{AccessRequirement, AccessRule};
    use crate::principal::MerchantUser;
    use crate::user::UserRecord;
    use axum::body::Body;
    use axum::http::{header, Request as HttpRequest, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    fn app() -> Router {
        let rules = AccessRuleTable::from_pairs([
            ("/login", AccessRequirement::Public),
            ("/portal/.*", AccessRequirement::Role("merchant".into())),
        ])
        .unwrap()
        .with_rule(AccessRule::public("^/health").unwrap());

        Router::new()
            .route("/login", get(|| async { "login" }))
            .route("/portal/orders", get(|| async { "orders" }))
            .with_merchant_firewall(FirewallGuard::new(rules, "/login"))
    }

    fn token(role: &str) -> SecurityToken {
        let principal = MerchantUser::with_role(UserRecord::new("alice", "h"), role).unwrap();
        SecurityToken::new("MerchantUser", principal, "fp")
    }

    fn get_request(path: &str, token: Option<SecurityToken>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri(path);
        if let Some(token) = token {
            builder = builder.extension(token);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_public_path_bypasses_auth() {
        let response = app().oneshot(get_request("/login", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_path_redirects_anonymous() {
        let response = app().oneshot(get_request("/portal/orders", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/login");
    }

    #[tokio::test]
    async fn test_protected_path_denies_missing_role() {
        let response = app()
            .oneshot(get_request("/portal/orders", Some(token("viewer"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_protected_path_allows_role() {
        let response = app()
            .oneshot(get_request("/portal/orders", Some(token("merchant"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unmatched_path_passes_through() {
        let response = app().oneshot(get_request("/nope", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
