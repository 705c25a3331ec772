//! Middleware components for the PeakSelf API
//!
//! Authentication extractors for Axum handlers:
//! - `AuthUser`: Requires valid authentication, returns 401 if missing/invalid
//! - `MaybeAuthUser`: Optional authentication, returns None if not authenticated
//! - `AdminUser`: Requires admin role, returns 403 if not admin
//!
//! And `from_fn_with_state` middleware:
//! - `csrf_protection`: double-submit cookie check on unsafe methods
//! - `rate_limit`: fixed-window limiter per client IP (one state per bucket)
//! - `security_headers`: hardening headers on every response

pub mod auth;
pub mod csrf;
pub mod rate_limit;
pub mod security_headers;

pub use auth::{AdminUser, AuthRejection, AuthUser, MaybeAuthUser};
pub use csrf::{csrf_protection, CsrfGuard, CSRF_HEADER};
pub use rate_limit::{
    extract_client_ip, rate_limit, InMemoryRateLimiter, RateLimitConfig, RateLimiter,
    RouteRateLimit,
};
pub use security_headers::{security_headers, SecurityHeadersConfig};
