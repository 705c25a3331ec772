//! Authentication REST route handlers for PeakSelf
//!
//! Provides endpoints for local (email + password) authentication:
//! - `POST /auth/register` - Create a new user account (rate limited)
//! - `POST /auth/login` - Authenticate and start a session (rate limited)
//! - `POST /auth/logout` - Invalidate the current session
//! - `POST /auth/logout-all` - Invalidate every session of the user
//! - `POST /auth/refresh` - New access token for the current session
//! - `GET /auth/me` - Current user
//! - `GET /auth/sessions` - Active sessions
//! - `DELETE /auth/sessions/:id` - Revoke one of the caller's sessions
//! - `PUT /auth/password` - Change password (rate limited)
//!
//! Successful sign-ins set the `peak_sid` and `peak_token` cookies and also
//! return the access token in the body for bearer clients.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::{
        header::{SET_COOKIE, USER_AGENT},
        HeaderMap, HeaderName, StatusCode,
    },
    middleware,
    response::{AppendHeaders, IntoResponse},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cookies::{CookieSettings, SESSION_COOKIE, TOKEN_COOKIE};
use crate::error::{ApiJson, ApiPath, ApiResult};
use crate::middleware::{extract_client_ip, rate_limit, AuthUser, RouteRateLimit};
use crate::models::user::{AuthResponse, RequestMetadata, UserResponse};
use crate::services::{AuthService, IssuedSession};

/// Shared application state for auth handlers
#[derive(Clone)]
pub struct AuthState {
    /// Authentication service
    pub auth_service: Arc<AuthService>,
    /// Attributes for the session cookies
    pub cookies: CookieSettings,
    /// Read the client IP from proxy headers
    pub trust_proxy: bool,
}

/// Per-route limiters for the credential endpoints
#[derive(Clone)]
pub struct AuthRateLimits {
    pub login: RouteRateLimit,
    pub register: RouteRateLimit,
    pub password: RouteRateLimit,
}

/// Create the authentication router
///
/// # Rate Limits
/// - `/auth/register`: `register` bucket
/// - `/auth/login`: `login` bucket
/// - `/auth/password`: `password` bucket
pub fn auth_router(state: AuthState, limits: AuthRateLimits) -> Router {
    let register_route = Router::new()
        .route("/register", post(register))
        .route_layer(middleware::from_fn_with_state(limits.register, rate_limit))
        .with_state(state.clone());

    let login_route = Router::new()
        .route("/login", post(login))
        .route_layer(middleware::from_fn_with_state(limits.login, rate_limit))
        .with_state(state.clone());

    let password_route = Router::new()
        .route("/password", put(change_password))
        .route_layer(middleware::from_fn_with_state(limits.password, rate_limit))
        .with_state(state.clone());

    let other_routes = Router::new()
        .route("/logout", post(logout))
        .route("/logout-all", post(logout_all))
        .route("/refresh", post(refresh))
        .route("/me", get(me))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", delete(revoke_session))
        .with_state(state);

    Router::new()
        .merge(register_route)
        .merge(login_route)
        .merge(password_route)
        .merge(other_routes)
}

// ========== Request/Response Types ==========

/// Registration request body
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    /// Plain password (8..=128 characters)
    pub password: String,
    pub display_name: String,
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Password change request body
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Generic acknowledgement
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Response for operations revoking several sessions
#[derive(Debug, Serialize)]
pub struct RevokedSessionsResponse {
    pub message: String,
    pub revoked_sessions: u64,
}

// ========== Cookie and metadata helpers ==========

type CookieHeaders = AppendHeaders<Vec<(HeaderName, String)>>;

/// `Set-Cookie` headers for a new session
pub(crate) fn session_cookies(cookies: &CookieSettings, issued: &IssuedSession) -> CookieHeaders {
    let now = chrono::Utc::now();
    let session_max_age = (issued.session_expires_at - now).num_seconds();
    let token_max_age = (issued.access_expires_at - now).num_seconds();

    AppendHeaders(vec![
        (
            SET_COOKIE,
            cookies.http_only(SESSION_COOKIE, &issued.session_token, session_max_age),
        ),
        (
            SET_COOKIE,
            cookies.http_only(TOKEN_COOKIE, &issued.access_token, token_max_age),
        ),
    ])
}

/// `Set-Cookie` headers expiring both session cookies
pub(crate) fn cleared_session_cookies(cookies: &CookieSettings) -> CookieHeaders {
    AppendHeaders(vec![
        (SET_COOKIE, cookies.clear(SESSION_COOKIE)),
        (SET_COOKIE, cookies.clear(TOKEN_COOKIE)),
    ])
}

/// Client address and user agent recorded with a new session
///
/// Addresses that do not parse as IP are dropped since the column is `inet`.
pub(crate) fn request_metadata(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy: bool,
) -> RequestMetadata {
    let ip_address = Some(extract_client_ip(headers, connect_info, trust_proxy))
        .filter(|ip| ip.parse::<IpAddr>().is_ok());

    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.chars().take(512).collect());

    RequestMetadata::new(ip_address, user_agent)
}

fn auth_response(issued: &IssuedSession) -> AuthResponse {
    AuthResponse {
        user: UserResponse::from(issued.user.clone()),
        token: issued.access_token.clone(),
        expires_at: issued.access_expires_at,
    }
}

// ========== Route Handlers ==========

/// Register a new user account
///
/// # Response
/// - 201 Created: user registered and signed in
/// - 400 Bad Request: invalid email, password or display name
/// - 409 Conflict: email already exists
async fn register(
    State(state): State<AuthState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let metadata = request_metadata(&headers, connect_info.as_ref(), state.trust_proxy);

    let issued = state
        .auth_service
        .register(
            &request.email,
            &request.password,
            &request.display_name,
            &metadata,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        session_cookies(&state.cookies, &issued),
        Json(auth_response(&issued)),
    ))
}

/// Login with email and password
///
/// # Response
/// - 200 OK: signed in
/// - 401 Unauthorized: invalid credentials
async fn login(
    State(state): State<AuthState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let metadata = request_metadata(&headers, connect_info.as_ref(), state.trust_proxy);

    let issued = state
        .auth_service
        .login(&request.email, &request.password, &metadata)
        .await?;

    Ok((
        session_cookies(&state.cookies, &issued),
        Json(auth_response(&issued)),
    ))
}

/// Logout and invalidate the current session
///
/// Deactivating the session also revokes every access token bound to it.
async fn logout(State(state): State<AuthState>, auth: AuthUser) -> ApiResult<impl IntoResponse> {
    state.auth_service.logout(auth.session_id).await?;

    Ok((
        cleared_session_cookies(&state.cookies),
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    ))
}

/// Logout every session of the current user
async fn logout_all(
    State(state): State<AuthState>,
    auth: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let revoked = state.auth_service.logout_all(auth.user.id).await?;

    Ok((
        cleared_session_cookies(&state.cookies),
        Json(RevokedSessionsResponse {
            message: "Logged out of all sessions".to_string(),
            revoked_sessions: revoked,
        }),
    ))
}

/// Issue a new access token for the current session
///
/// Slides the session expiry; the `peak_token` cookie is replaced.
async fn refresh(State(state): State<AuthState>, auth: AuthUser) -> ApiResult<impl IntoResponse> {
    let (token, expires_at) = state
        .auth_service
        .refresh(&auth.user, auth.session_id)
        .await?;

    let max_age = (expires_at - chrono::Utc::now()).num_seconds();
    let cookie = state.cookies.http_only(TOKEN_COOKIE, &token, max_age);

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(AuthResponse {
            user: auth.user.into(),
            token,
            expires_at,
        }),
    ))
}

/// Current user
async fn me(auth: AuthUser) -> Json<UserResponse> {
    Json(auth.user.into())
}

/// Active sessions of the current user
async fn list_sessions(
    State(state): State<AuthState>,
    auth: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let sessions = state
        .auth_service
        .list_sessions(auth.user.id, auth.session_id)
        .await?;

    Ok(Json(sessions))
}

/// Revoke one of the caller's own sessions
///
/// # Response
/// - 204 No Content
/// - 404 Not Found: session does not exist or belongs to someone else
async fn revoke_session(
    State(state): State<AuthState>,
    ApiPath(session_id): ApiPath<Uuid>,
    auth: AuthUser,
) -> ApiResult<StatusCode> {
    state
        .auth_service
        .revoke_session(auth.user.id, session_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Change the password and sign out every other session
async fn change_password(
    State(state): State<AuthState>,
    auth: AuthUser,
    ApiJson(request): ApiJson<ChangePasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    let revoked = state
        .auth_service
        .change_password(
            &auth.user,
            auth.session_id,
            &request.current_password,
            &request.new_password,
        )
        .await?;

    Ok(Json(RevokedSessionsResponse {
        message: "Password changed".to_string(),
        revoked_sessions: revoked,
    }))
}
