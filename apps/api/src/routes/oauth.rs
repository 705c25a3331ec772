//! Google sign-in routes
//!
//! - `GET /auth/google` - Redirect to Google's consent screen
//! - `GET /auth/google/callback` - Finish sign-in and redirect to the SPA
//!
//! The callback never returns an error body: failures redirect to
//! `{FRONTEND_URL}/login?error=<reason>` with one of `oauth_state`,
//! `oauth_denied` or `oauth_failed`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{
        header::{LOCATION, SET_COOKIE},
        HeaderMap, HeaderName, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::cookies::{get_cookie, CookieSettings, OAUTH_STATE_COOKIE};
use crate::error::{ApiError, ApiResult};
use crate::routes::auth::{request_metadata, session_cookies};
use crate::services::auth::generate_opaque_token;
use crate::services::{AuthService, GoogleOAuthService};

/// Lifetime of the `peak_oauth_state` cookie
pub const OAUTH_STATE_MAX_AGE_SECS: i64 = 600;

/// Shared state for the Google sign-in handlers
#[derive(Clone)]
pub struct OAuthState {
    /// None when Google sign-in is not configured
    pub google: Option<Arc<GoogleOAuthService>>,
    pub auth_service: Arc<AuthService>,
    pub cookies: CookieSettings,
    /// SPA base URL, without trailing slash
    pub frontend_url: String,
    pub trust_proxy: bool,
}

impl OAuthState {
    /// URL of an SPA page
    fn frontend(&self, path: &str) -> String {
        format!("{}{}", self.frontend_url, path)
    }

    fn login_error(&self, reason: &str) -> String {
        self.frontend(&format!("/login?error={}", reason))
    }
}

/// Create the Google sign-in router
pub fn oauth_router(state: OAuthState) -> Router {
    Router::new()
        .route("/google", get(google_authorize))
        .route("/google/callback", get(google_callback))
        .with_state(state)
}

/// Query parameters Google appends to the callback URL
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set when the user denied consent
    pub error: Option<String>,
}

/// 302 Found with the given `Set-Cookie` headers
fn found(location: &str, cookies: Vec<(HeaderName, String)>) -> Response {
    let mut headers = vec![(LOCATION, location.to_string())];
    headers.extend(cookies);
    (StatusCode::FOUND, axum::response::AppendHeaders(headers)).into_response()
}

fn states_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Start Google sign-in
///
/// # Response
/// - 302 Found to the provider, with the `peak_oauth_state` cookie set
/// - 404 Not Found: Google sign-in is not configured
async fn google_authorize(State(state): State<OAuthState>) -> ApiResult<Response> {
    let google = state
        .google
        .as_ref()
        .ok_or_else(|| ApiError::not_found("oauth provider", "google"))?;

    let oauth_state = generate_opaque_token();
    let url = google.authorization_url(&oauth_state)?;

    let cookie =
        state
            .cookies
            .http_only(OAUTH_STATE_COOKIE, &oauth_state, OAUTH_STATE_MAX_AGE_SECS);

    Ok(found(&url, vec![(SET_COOKIE, cookie)]))
}

/// Finish Google sign-in
async fn google_callback(
    State(state): State<OAuthState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> ApiResult<Response> {
    let google = state
        .google
        .as_ref()
        .ok_or_else(|| ApiError::not_found("oauth provider", "google"))?;

    let clear_state = (SET_COOKIE, state.cookies.clear(OAUTH_STATE_COOKIE));

    if let Some(error) = params.error.as_deref() {
        info!(error = %error, "Google sign-in cancelled by provider");
        return Ok(found(&state.login_error("oauth_denied"), vec![clear_state]));
    }

    let state_valid = match (params.state.as_deref(), get_cookie(&headers, OAUTH_STATE_COOKIE)) {
        (Some(provided), Some(expected)) => states_match(provided, expected),
        _ => false,
    };
    if !state_valid {
        warn!("Google sign-in rejected: state mismatch");
        return Ok(found(&state.login_error("oauth_state"), vec![clear_state]));
    }

    let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
        warn!("Google sign-in rejected: missing authorization code");
        return Ok(found(&state.login_error("oauth_failed"), vec![clear_state]));
    };

    let user = match google.sign_in(code).await {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "Google sign-in failed");
            return Ok(found(&state.login_error("oauth_failed"), vec![clear_state]));
        }
    };

    let metadata = request_metadata(&headers, connect_info.as_ref(), state.trust_proxy);
    let issued = match state.auth_service.create_session(user, &metadata).await {
        Ok(issued) => issued,
        Err(e) => {
            e.log();
            return Ok(found(&state.login_error("oauth_failed"), vec![clear_state]));
        }
    };

    info!(user_id = %issued.user.id, session_id = %issued.session_id, "User signed in with Google");

    let axum::response::AppendHeaders(mut cookies) = session_cookies(&state.cookies, &issued);
    cookies.push(clear_state);

    Ok(found(&state.frontend("/auth/callback"), cookies))
}
