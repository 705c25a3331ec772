//! Security headers middleware for the PeakSelf API
//!
//! Every response is JSON (or a redirect), so the CSP denies all resource
//! loading instead of describing what a page may load.
//!
//! Headers added:
//! - X-Frame-Options: DENY
//! - X-Content-Type-Options: nosniff
//! - Referrer-Policy: strict-origin-when-cross-origin
//! - Content-Security-Policy: `default-src 'none'` and friends
//! - Permissions-Policy: every powerful feature disabled
//! - Cross-Origin-Opener-Policy / Cross-Origin-Resource-Policy
//! - Strict-Transport-Security: HTTPS requests in production only

use axum::{
    body::Body,
    extract::State,
    http::{header::HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use peakself_shared_config::Environment;

static X_FRAME_OPTIONS: HeaderName = HeaderName::from_static("x-frame-options");
static X_CONTENT_TYPE_OPTIONS: HeaderName = HeaderName::from_static("x-content-type-options");
static REFERRER_POLICY: HeaderName = HeaderName::from_static("referrer-policy");
static CONTENT_SECURITY_POLICY: HeaderName = HeaderName::from_static("content-security-policy");
static PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");
static CROSS_ORIGIN_OPENER_POLICY: HeaderName =
    HeaderName::from_static("cross-origin-opener-policy");
static CROSS_ORIGIN_RESOURCE_POLICY: HeaderName =
    HeaderName::from_static("cross-origin-resource-policy");
static STRICT_TRANSPORT_SECURITY: HeaderName = HeaderName::from_static("strict-transport-security");

const API_CONTENT_SECURITY_POLICY: &str =
    "default-src 'none'; frame-ancestors 'none'; base-uri 'none'; form-action 'none'";

const API_PERMISSIONS_POLICY: &str = "accelerometer=(), camera=(), geolocation=(), \
     gyroscope=(), magnetometer=(), microphone=(), payment=(), usb=(), interest-cohort=()";

/// Configuration for security headers middleware
#[derive(Debug, Clone)]
pub struct SecurityHeadersConfig {
    /// Send HSTS on HTTPS requests
    pub enable_hsts: bool,

    /// HSTS max-age in seconds (default: 1 year)
    pub hsts_max_age: u64,

    /// Add `includeSubDomains` to HSTS
    pub hsts_include_subdomains: bool,

    /// Add `preload` to HSTS
    pub hsts_preload: bool,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enable_hsts: false,
            hsts_max_age: 31_536_000,
            hsts_include_subdomains: true,
            hsts_preload: false,
        }
    }
}

impl SecurityHeadersConfig {
    /// Production settings: HSTS for one year including subdomains
    pub fn production() -> Self {
        Self {
            enable_hsts: true,
            ..Self::default()
        }
    }

    /// Development settings: no HSTS
    pub fn development() -> Self {
        Self::default()
    }

    pub fn for_environment(environment: Environment) -> Self {
        if environment.is_production() {
            Self::production()
        } else {
            Self::development()
        }
    }

    fn build_hsts_value(&self) -> String {
        let mut value = format!("max-age={}", self.hsts_max_age);

        if self.hsts_include_subdomains {
            value.push_str("; includeSubDomains");
        }

        if self.hsts_preload {
            value.push_str("; preload");
        }

        value
    }
}

/// Security headers middleware
///
/// ```ignore
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(middleware::from_fn_with_state(
///         SecurityHeadersConfig::production(),
///         security_headers,
///     ));
/// ```
pub async fn security_headers(
    State(config): State<SecurityHeadersConfig>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let is_https = is_https_request(&request);

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(X_FRAME_OPTIONS.clone(), HeaderValue::from_static("DENY"));
    headers.insert(
        X_CONTENT_TYPE_OPTIONS.clone(),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        REFERRER_POLICY.clone(),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        CONTENT_SECURITY_POLICY.clone(),
        HeaderValue::from_static(API_CONTENT_SECURITY_POLICY),
    );
    headers.insert(
        PERMISSIONS_POLICY.clone(),
        HeaderValue::from_static(API_PERMISSIONS_POLICY),
    );
    headers.insert(
        CROSS_ORIGIN_OPENER_POLICY.clone(),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        CROSS_ORIGIN_RESOURCE_POLICY.clone(),
        HeaderValue::from_static("same-site"),
    );

    // Browsers ignore HSTS received over plain HTTP (RFC 6797)
    if config.enable_hsts && is_https {
        if let Ok(value) = HeaderValue::from_str(&config.build_hsts_value()) {
            headers.insert(STRICT_TRANSPORT_SECURITY.clone(), value);
        }
    }

    response
}

/// HTTPS according to `x-forwarded-proto` (set by the TLS-terminating proxy)
/// or the request scheme
fn is_https_request(request: &Request<Body>) -> bool {
    if let Some(proto) = request.headers().get("x-forwarded-proto") {
        if let Ok(proto_str) = proto.to_str() {
            return proto_str.eq_ignore_ascii_case("https");
        }
    }

    request
        .uri()
        .scheme_str()
        .is_some_and(|s| s.eq_ignore_ascii_case("https"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{Request, StatusCode},
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    async fn test_handler() -> &'static str {
        "OK"
    }

    fn app(config: SecurityHeadersConfig) -> Router {
        Router::new()
            .route("/", get(test_handler))
            .layer(axum::middleware::from_fn_with_state(config, security_headers))
    }

    async fn get_with_proto(config: SecurityHeadersConfig, proto: Option<&str>) -> Response {
        let mut builder = Request::builder().uri("/");
        if let Some(proto) = proto {
            builder = builder.header("x-forwarded-proto", proto);
        }
        app(config)
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_all_security_headers_present() {
        let response = get_with_proto(SecurityHeadersConfig::development(), None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
        assert_eq!(headers["cross-origin-opener-policy"], "same-origin");
        assert_eq!(headers["cross-origin-resource-policy"], "same-site");
    }

    #[tokio::test]
    async fn test_content_security_policy_denies_everything() {
        let response = get_with_proto(SecurityHeadersConfig::development(), None).await;

        let csp = response.headers()["content-security-policy"].to_str().unwrap();
        assert!(csp.contains("default-src 'none'"));
        assert!(csp.contains("frame-ancestors 'none'"));
        assert!(!csp.contains("'unsafe-inline'"));
    }

    #[tokio::test]
    async fn test_permissions_policy_header() {
        let response = get_with_proto(SecurityHeadersConfig::development(), None).await;

        let permissions = response.headers()["permissions-policy"].to_str().unwrap();
        assert!(permissions.contains("camera=()"));
        assert!(permissions.contains("microphone=()"));
        assert!(permissions.contains("geolocation=()"));
        assert!(permissions.contains("payment=()"));
    }

    #[tokio::test]
    async fn test_hsts_enabled_for_https_requests_in_production() {
        let response = get_with_proto(SecurityHeadersConfig::production(), Some("https")).await;

        let hsts = response.headers()["strict-transport-security"]
            .to_str()
            .unwrap();
        assert_eq!(hsts, "max-age=31536000; includeSubDomains");
    }

    #[tokio::test]
    async fn test_hsts_proto_is_case_insensitive() {
        let response = get_with_proto(SecurityHeadersConfig::production(), Some("HTTPS")).await;
        assert!(response.headers().contains_key("strict-transport-security"));
    }

    #[tokio::test]
    async fn test_no_hsts_for_http_in_production() {
        let response = get_with_proto(SecurityHeadersConfig::production(), Some("http")).await;
        assert!(!response.headers().contains_key("strict-transport-security"));

        let response = get_with_proto(SecurityHeadersConfig::production(), None).await;
        assert!(!response.headers().contains_key("strict-transport-security"));
    }

    #[tokio::test]
    async fn test_no_hsts_in_development() {
        let response = get_with_proto(SecurityHeadersConfig::development(), Some("https")).await;
        assert!(!response.headers().contains_key("strict-transport-security"));
    }

    #[test]
    fn test_config_for_environment() {
        assert!(SecurityHeadersConfig::for_environment(Environment::Production).enable_hsts);
        assert!(!SecurityHeadersConfig::for_environment(Environment::Development).enable_hsts);
        assert!(!SecurityHeadersConfig::for_environment(Environment::Staging).enable_hsts);
    }

    #[test]
    fn test_build_hsts_value_variants() {
        assert_eq!(
            SecurityHeadersConfig::production().build_hsts_value(),
            "max-age=31536000; includeSubDomains"
        );

        let config = SecurityHeadersConfig {
            enable_hsts: true,
            hsts_max_age: 86400,
            hsts_include_subdomains: false,
            hsts_preload: false,
        };
        assert_eq!(config.build_hsts_value(), "max-age=86400");

        let preload = SecurityHeadersConfig {
            hsts_preload: true,
            ..SecurityHeadersConfig::production()
        };
        assert_eq!(
            preload.build_hsts_value(),
            "max-age=31536000; includeSubDomains; preload"
        );
    }
}
