//! Request Data Consumed by the Pipeline
//!
//! The pipeline never touches the host's HTTP types beyond this module.
//! [`LoginRequest`] carries the submitted form fields; [`RequestContext`]
//! carries the read-only metadata used by the attempt blocker and audit logs.
//!
//! The client address comes from the TCP peer (`ConnectInfo<SocketAddr>`)
//! unless [`ClientIpSource::ForwardedHeaders`] is configured. Forwarded
//! headers are client-controlled when no proxy rewrites them.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{header, request::Parts, HeaderMap, Method};

/// Where the client address is read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientIpSource {
    /// The connection's peer address
    #[default]
    Peer,
    /// Headers set by a trusted reverse proxy, falling back to the peer
    ForwardedHeaders,
}

impl ClientIpSource {
    /// Parse a configuration value (`peer` or `forwarded_headers`)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "peer" => Some(Self::Peer),
            "forwarded_headers" | "forwarded" | "proxy" => Some(Self::ForwardedHeaders),
            _ => None,
        }
    }
}

/// Read-only metadata about the client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Client address, as seen by the host
    pub source_addr: Option<IpAddr>,
    /// Client user agent (for audit logging)
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Context with only a source address
    pub fn from_addr(addr: IpAddr) -> Self {
        Self {
            source_addr: Some(addr),
            user_agent: None,
        }
    }

    /// Context for a direct connection; forwarded headers are ignored
    pub fn from_peer(peer: SocketAddr, headers: &HeaderMap) -> Self {
        Self::resolve(ClientIpSource::Peer, Some(peer), headers)
    }

    /// Build a context from the peer address and request headers.
    ///
    /// With [`ClientIpSource::ForwardedHeaders`], checks (in order) the last
    /// X-Forwarded-For entry (the one appended by the nearest proxy), then
    /// X-Real-IP, then the peer. Only use it behind a proxy that sets them.
    pub fn resolve(source: ClientIpSource, peer: Option<SocketAddr>, headers: &HeaderMap) -> Self {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let peer_ip = peer.map(|addr| addr.ip());
        let source_addr = match source {
            ClientIpSource::Peer => peer_ip,
            ClientIpSource::ForwardedHeaders => client_ip_from_headers(headers).or(peer_ip),
        };

        Self {
            source_addr,
            user_agent,
        }
    }

    /// Source address rendered for logs
    pub fn addr_for_log(&self) -> String {
        self.source_addr
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn client_ip_from_headers(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(last) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.rsplit(',').next())
    {
        if let Ok(ip) = last.trim().parse() {
            return Some(ip);
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// A submitted login form
#[derive(Clone)]
pub struct LoginRequest {
    /// HTTP method
    pub method: Method,
    /// Request path
    pub path: String,
    /// Decoded form fields
    pub form: HashMap<String, String>,
    /// Client metadata
    pub context: RequestContext,
}

impl std::fmt::Debug for LoginRequest {
    // Field values may hold the secret, only names are printed
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("fields", &self.form.keys().collect::<Vec<_>>())
            .field("context", &self.context)
            .finish()
    }
}

impl LoginRequest {
    /// A POST to `path` with no fields
    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            form: HashMap::new(),
            context: RequestContext::default(),
        }
    }

    /// Build from the host's request parts and decoded form body.
    ///
    /// The client address is the peer recorded by
    /// `into_make_service_with_connect_info::<SocketAddr>()`.
    pub fn from_parts(parts: &Parts, form: HashMap<String, String>) -> Self {
        Self::from_parts_with(parts, form, ClientIpSource::Peer)
    }

    /// Like [`from_parts`](Self::from_parts), reading the address from `source`
    pub fn from_parts_with(
        parts: &Parts,
        form: HashMap<String, String>,
        source: ClientIpSource,
    ) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            form,
            context: RequestContext::resolve(source, peer, &parts.headers),
        }
    }

    /// Builder: add a form field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(name.into(), value.into());
        self
    }

    /// Builder: set the client context
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Get a form field
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    fn peer(addr: &str) -> SocketAddr {
        addr.parse().unwrap()
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.50, 10.0.0.1"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
        headers
    }

    #[test]
    fn test_peer_source_ignores_forwarded_headers() {
        let ctx = RequestContext::from_peer(peer("198.51.100.1:50000"), &headers());
        assert_eq!(ctx.source_addr, Some("198.51.100.1".parse().unwrap()));
        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8"));
    }

    #[test]
    fn test_forwarded_source_uses_nearest_proxy_entry() {
        let ctx = RequestContext::resolve(
            ClientIpSource::ForwardedHeaders,
            Some(peer("10.0.0.2:443")),
            &headers(),
        );
        assert_eq!(ctx.source_addr, Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_forwarded_source_falls_back() {
        let mut real_ip = HeaderMap::new();
        real_ip.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        real_ip.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        let ctx = RequestContext::resolve(ClientIpSource::ForwardedHeaders, None, &real_ip);
        assert_eq!(ctx.source_addr, Some("198.51.100.2".parse().unwrap()));

        let ctx = RequestContext::resolve(
            ClientIpSource::ForwardedHeaders,
            Some(peer("192.0.2.9:1234")),
            &HeaderMap::new(),
        );
        assert_eq!(ctx.source_addr, Some("192.0.2.9".parse().unwrap()));
        assert_eq!(RequestContext::default().addr_for_log(), "unknown");
    }

    #[test]
    fn test_client_ip_source_parse() {
        assert_eq!(ClientIpSource::parse("peer"), Some(ClientIpSource::Peer));
        assert_eq!(
            ClientIpSource::parse("Forwarded-Headers"),
            Some(ClientIpSource::ForwardedHeaders)
        );
        assert_eq!(ClientIpSource::parse("header"), None);
    }

    #[test]
    fn test_login_request_from_parts() {
        let (parts, _) = Request::builder()
            .method(Method::POST)
            .uri("/security-merchant-portal-gui/login_check?x=1")
            .header("x-forwarded-for", "203.0.113.50")
            .extension(ConnectInfo(peer("192.0.2.10:40000")))
            .body(())
            .unwrap()
            .into_parts();

        let mut form = HashMap::new();
        form.insert("username".to_string(), "alice".to_string());
        let request = LoginRequest::from_parts(&parts, form.clone());

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.path, "/security-merchant-portal-gui/login_check");
        assert_eq!(request.field("username"), Some("alice"));
        assert_eq!(request.context.source_addr, Some("192.0.2.10".parse().unwrap()));

        let proxied = LoginRequest::from_parts_with(&parts, form, ClientIpSource::ForwardedHeaders);
        assert_eq!(proxied.context.source_addr, Some("203.0.113.50".parse().unwrap()));
    }

    #[test]
    fn test_debug_hides_field_values() {
        let request = LoginRequest::post("/login").with_field("password", "hunter22");
        let debug = format!("{:?}", request);
        assert!(debug.contains("password"));
        assert!(!debug.contains("hunter22"));
    }
}
