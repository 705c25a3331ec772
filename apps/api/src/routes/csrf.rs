//! CSRF token issuance
//!
//! `GET /csrf-token` sets the `csrf_token` cookie and returns the same value
//! so the SPA can echo it in the `X-CSRF-Token` header.

use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap},
    response::{AppendHeaders, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::cookies::{get_cookie, CookieSettings, CSRF_COOKIE};
use crate::services::CsrfService;

/// Lifetime of the CSRF cookie (one day)
pub const CSRF_COOKIE_MAX_AGE_SECS: i64 = 24 * 3600;

#[derive(Clone)]
pub struct CsrfState {
    pub service: CsrfService,
    pub cookies: CookieSettings,
}

pub fn csrf_router(state: CsrfState) -> Router {
    Router::new()
        .route("/csrf-token", get(csrf_token))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
}

/// Issue a CSRF token, reusing the cookie's token when it is well formed
async fn csrf_token(State(state): State<CsrfState>, headers: HeaderMap) -> impl IntoResponse {
    let token = get_cookie(&headers, CSRF_COOKIE)
        .filter(|existing| state.service.is_well_formed(existing))
        .map(str::to_string)
        .unwrap_or_else(|| state.service.generate_token());

    let cookie = state
        .cookies
        .readable(CSRF_COOKIE, &token, CSRF_COOKIE_MAX_AGE_SECS);

    (
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(CsrfTokenResponse { csrf_token: token }),
    )
}
