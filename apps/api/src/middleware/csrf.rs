//! CSRF guard middleware
//!
//! Validates the double-submit token on state-changing requests. The token
//! in the `x-csrf-token` header must equal the `csrf_token` cookie.
//!
//! Skipped for:
//! - safe methods (GET, HEAD, OPTIONS, TRACE)
//! - exempt path prefixes (beacon uploads and client error reports)
//! - every request when the guard is disabled

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::config::CsrfSettings;
use crate::cookies::{get_cookie, CSRF_COOKIE};
use crate::error::ApiError;
use crate::services::CsrfService;

/// Header carrying the CSRF token
pub const CSRF_HEADER: &str = "x-csrf-token";

/// State for the CSRF validation middleware
#[derive(Clone)]
pub struct CsrfGuard {
    pub service: CsrfService,
    pub enabled: bool,
    exempt_paths: Arc<Vec<String>>,
}

impl CsrfGuard {
    pub fn new(service: CsrfService, settings: &CsrfSettings) -> Self {
        Self {
            service,
            enabled: settings.enabled,
            exempt_paths: Arc::new(settings.exempt_paths.clone()),
        }
    }

    /// Whether a path falls under one of the exempt prefixes
    ///
    /// Prefixes match whole path segments: `/api/uploads` covers
    /// `/api/uploads/avatar` but not `/api/uploadsx`.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// CSRF validation middleware
pub async fn csrf_protection(
    State(guard): State<CsrfGuard>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !guard.enabled || is_safe_method(request.method()) || guard.is_exempt(request.uri().path())
    {
        return next.run(request).await;
    }

    if let Err(reason) = verify(&guard.service, &request) {
        warn!(
            method = %request.method(),
            path = %request.uri().path(),
            reason,
            "CSRF validation failed"
        );
        return ApiError::CsrfValidation(reason.to_string()).into_response();
    }

    debug!(path = %request.uri().path(), "CSRF token verified");
    next.run(request).await
}

fn verify(service: &CsrfService, request: &Request<Body>) -> Result<(), &'static str> {
    let header_token = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or("missing X-CSRF-Token header")?;

    let cookie_token = get_cookie(request.headers(), CSRF_COOKIE).ok_or("missing CSRF cookie")?;

    if !service.validate_token(header_token, cookie_token) {
        return Err("CSRF token mismatch");
    }

    Ok(())
}
