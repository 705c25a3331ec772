//! Authentication extractors for Axum handlers
//!
//! The caller identity comes from, in order:
//! 1. a signed access token, read from `Authorization: Bearer` or the
//!    `peak_token` cookie, whose session must still be active
//! 2. the opaque `peak_sid` session cookie, looked up by its SHA-256 hash
//!
//! A token that is present but invalid rejects the request; it never falls
//! back to the session cookie.
//!
//! - `AuthUser`: identity required, returns 401 if missing/invalid
//! - `MaybeAuthUser`: never rejects, `None` when not authenticated
//! - `AdminUser`: identity and the `admin` role (re-read from the database) required
//!
//! ```rust,ignore
//! async fn me(auth: AuthUser) -> impl IntoResponse {
//!     Json(UserResponse::from(auth.user))
//! }
//! ```

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::cookies::{get_cookie, SESSION_COOKIE, TOKEN_COOKIE};
use crate::error::ApiError;
use crate::models::user::{Claims, User, UserRole};
use crate::services::auth::hash_token;
use crate::services::AuthService;

/// How the caller proved their identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Signed access token (bearer header or `peak_token` cookie)
    Token,
    /// Opaque `peak_sid` session cookie
    Session,
}

/// Identity resolved from request credentials, before the user row is loaded
#[derive(Debug, Clone)]
struct Identity {
    user_id: Uuid,
    session_id: Uuid,
    claims: Option<Claims>,
    method: AuthMethod,
}

/// Authenticated user extractor - requires valid authentication
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The authenticated user
    pub user: User,
    /// Server-side session backing this request
    pub session_id: Uuid,
    /// Access token claims, when authenticated with a token
    pub claims: Option<Claims>,
    pub method: AuthMethod,
}

/// Optional authentication extractor
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

/// Admin-only extractor - requires admin role
#[derive(Debug, Clone)]
pub struct AdminUser {
    /// The authenticated admin user
    pub user: User,
    pub session_id: Uuid,
}

/// Authentication rejection types
#[derive(Debug)]
pub enum AuthRejection {
    /// No token and no session cookie
    MissingToken,
    /// Token or session is malformed, expired or revoked
    InvalidToken(String),
    /// Database error while resolving the identity
    DatabaseError(sqlx::Error),
    /// Session points at a user that no longer exists
    UserNotFound,
    /// User lacks required admin permissions
    InsufficientPermissions,
    /// AuthService missing from request extensions
    MissingServices,
}

impl From<AuthRejection> for ApiError {
    fn from(rejection: AuthRejection) -> Self {
        match rejection {
            AuthRejection::MissingToken => ApiError::Unauthorized,
            AuthRejection::InvalidToken(reason) => ApiError::InvalidToken(reason),
            AuthRejection::DatabaseError(e) => ApiError::Database(e),
            AuthRejection::UserNotFound => ApiError::InvalidToken("user not found".to_string()),
            AuthRejection::InsufficientPermissions => {
                ApiError::Forbidden("admin access required".to_string())
            }
            AuthRejection::MissingServices => {
                ApiError::Internal("Authentication services not configured".to_string())
            }
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

/// Extract the bearer token from the Authorization header
///
/// The scheme is matched case-insensitively and the header must contain
/// exactly two parts.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split_whitespace();

    let scheme = parts.next()?;
    let token = parts.next()?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    Some(token)
}

fn auth_service(parts: &Parts) -> Result<&AuthService, AuthRejection> {
    parts
        .extensions
        .get::<AuthService>()
        .ok_or(AuthRejection::MissingServices)
}

/// Resolve the caller identity from the request credentials
async fn resolve_identity(
    service: &AuthService,
    headers: &HeaderMap,
) -> Result<Identity, AuthRejection> {
    let token = extract_bearer_token(headers).or_else(|| get_cookie(headers, TOKEN_COOKIE));

    if let Some(token) = token {
        let claims = service
            .verify_access_token(token)
            .map_err(|e| AuthRejection::InvalidToken(e.to_string()))?;

        // Logout deactivates the session, which revokes its tokens
        let active = service
            .sessions()
            .is_active(claims.sid, claims.sub)
            .await
            .map_err(AuthRejection::DatabaseError)?;

        if !active {
            return Err(AuthRejection::InvalidToken(
                "session is no longer active".to_string(),
            ));
        }

        return Ok(Identity {
            user_id: claims.sub,
            session_id: claims.sid,
            claims: Some(claims),
            method: AuthMethod::Token,
        });
    }

    let session_token = get_cookie(headers, SESSION_COOKIE).ok_or(AuthRejection::MissingToken)?;

    let session = service
        .sessions()
        .find_active_by_token_hash(&hash_token(session_token))
        .await
        .map_err(AuthRejection::DatabaseError)?
        .ok_or_else(|| AuthRejection::InvalidToken("session expired or revoked".to_string()))?;

    if let Err(e) = service.sessions().touch(session.id).await {
        tracing::warn!(error = %e, session_id = %session.id, "Failed to update session activity");
    }

    Ok(Identity {
        user_id: session.user_id,
        session_id: session.id,
        claims: None,
        method: AuthMethod::Session,
    })
}

async fn load_user(service: &AuthService, user_id: Uuid) -> Result<User, AuthRejection> {
    service
        .users()
        .find_by_id(user_id)
        .await
        .map_err(AuthRejection::DatabaseError)?
        .ok_or(AuthRejection::UserNotFound)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let service = auth_service(parts)?;
        let identity = resolve_identity(service, &parts.headers).await?;
        let user = load_user(service, identity.user_id).await?;

        Ok(AuthUser {
            user,
            session_id: identity.session_id,
            claims: identity.claims,
            method: identity.method,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match AuthUser::from_request_parts(parts, state).await {
            Ok(auth) => Ok(MaybeAuthUser(Some(auth))),
            Err(AuthRejection::MissingToken) => Ok(MaybeAuthUser(None)),
            Err(rejection) => {
                tracing::debug!(?rejection, "Ignoring failed authentication in MaybeAuthUser");
                Ok(MaybeAuthUser(None))
            }
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let service = auth_service(parts)?;
        let identity = resolve_identity(service, &parts.headers).await?;

        // Fast rejection when the token itself claims a non-admin role
        if let Some(claims) = &identity.claims {
            if claims.role != UserRole::Admin {
                return Err(AuthRejection::InsufficientPermissions);
            }
        }

        // The stored role is authoritative; a demoted admin's token still says admin
        let user = load_user(service, identity.user_id).await?;
        if user.role != UserRole::Admin {
            tracing::warn!(user_id = %user.id, "Admin access denied by stored role");
            return Err(AuthRejection::InsufficientPermissions);
        }

        Ok(AdminUser {
            user,
            session_id: identity.session_id,
        })
    }
}
