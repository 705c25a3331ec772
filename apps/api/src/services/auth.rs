//! Authentication service for PeakSelf
//!
//! This module provides the local authentication flow:
//! - User registration with Argon2id password hashing
//! - Login creating a server-side session plus a signed access token
//! - Access token refresh bound to the session
//! - Session listing, revocation and logout
//! - Password changes

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::{parse_duration_string, Config};
use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::session::SessionResponse;
use crate::models::user::{Claims, RequestMetadata, User, UserRole, TOKEN_ISSUER};
use crate::repositories::{SessionRepository, UserRepository};

/// Minimum password length in characters
pub const MIN_PASSWORD_LENGTH: usize = 8;
/// Maximum password length in characters
pub const MAX_PASSWORD_LENGTH: usize = 128;
/// Maximum display name length in characters
pub const MAX_DISPLAY_NAME_LENGTH: usize = 100;

/// Random bytes in an opaque session token
const OPAQUE_TOKEN_BYTES: usize = 32;

/// Authentication service configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// JWT signing secret
    pub jwt_secret: String,
    /// Access token TTL in seconds (default: 1 hour)
    pub access_token_ttl_secs: i64,
    /// Server-side session TTL in seconds (default: 7 days)
    pub session_ttl_secs: i64,
}

impl AuthConfig {
    /// Create a new AuthConfig with default TTLs
    pub fn new(jwt_secret: String) -> Self {
        Self {
            jwt_secret,
            access_token_ttl_secs: 3600,
            session_ttl_secs: 7 * 24 * 3600,
        }
    }

    /// Create AuthConfig from expiry strings (e.g., "1h", "7d")
    pub fn with_expiry_strings(jwt_secret: String, access_expiry: &str, session_ttl: &str) -> Self {
        Self {
            jwt_secret,
            access_token_ttl_secs: parse_duration_string(access_expiry).unwrap_or(3600),
            session_ttl_secs: parse_duration_string(session_ttl).unwrap_or(7 * 24 * 3600),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_expiry_strings(
            config.jwt_secret.clone(),
            &config.jwt_expiry,
            &config.session_ttl,
        )
    }
}

/// A freshly created session with the credentials to hand to the client
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub user: User,
    pub session_id: Uuid,
    /// Opaque token for the `peak_sid` cookie (only its hash is stored)
    pub session_token: String,
    pub session_expires_at: DateTime<Utc>,
    /// Signed access token for the `peak_token` cookie / bearer header
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
}

/// Authentication service providing registration, login, and session management
#[derive(Clone)]
pub struct AuthService {
    users: UserRepository,
    sessions: SessionRepository,
    config: AuthConfig,
    argon2: Argon2<'static>,
    /// Verified against when the account does not exist so that login
    /// timing does not reveal which emails are registered.
    dummy_password_hash: String,
}

impl AuthService {
    /// Create a new AuthService instance
    pub fn new(pool: PgPool, config: AuthConfig) -> Self {
        let argon2 = Argon2::default();

        let dummy_salt = SaltString::generate(&mut OsRng);
        let dummy_password_hash = argon2
            .hash_password(b"dummy_password_for_timing_attack_prevention", &dummy_salt)
            .expect("dummy password hashing should not fail")
            .to_string();

        Self {
            users: UserRepository::new(pool.clone()),
            sessions: SessionRepository::new(pool),
            config,
            argon2,
            dummy_password_hash,
        }
    }

    pub fn users(&self) -> &UserRepository {
        &self.users
    }

    pub fn sessions(&self) -> &SessionRepository {
        &self.sessions
    }

    /// Register a new user account and sign it in
    ///
    /// # Errors
    /// - `ApiError::Conflict` if email already exists
    /// - `ApiError::ValidationError` if email, password or display name is invalid
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
        metadata: &RequestMetadata,
    ) -> ApiResult<IssuedSession> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(ApiError::ValidationError(
                "invalid email format".to_string(),
            ));
        }
        validate_password(password)?;
        let display_name = validate_display_name(display_name)?;

        if self.users.email_exists(email).await? {
            return Err(ApiError::conflict("user", email));
        }

        let password_hash = self.hash_password(password)?;

        let user = self
            .users
            .create(email, &password_hash, display_name, UserRole::User)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ApiError::conflict("user", email)
                } else {
                    ApiError::Database(e)
                }
            })?;

        tracing::info!(user_id = %user.id, email = %user.email, "User registered successfully");

        self.create_session(user, metadata).await
    }

    /// Authenticate with email and password and create a new session
    ///
    /// # Errors
    /// - `ApiError::Unauthorized` if credentials are invalid or the account has no password
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        metadata: &RequestMetadata,
    ) -> ApiResult<IssuedSession> {
        let user = self.users.find_by_email(email).await?;

        // A hash is verified on every path so response time does not depend
        // on whether the account exists.
        let user = match user {
            Some(u) => match u.password_hash.as_deref() {
                Some(hash) if self.verify_password(password, hash)? => u,
                Some(_) => {
                    tracing::warn!(email = %email, "Login failed: invalid password");
                    return Err(ApiError::Unauthorized);
                }
                None => {
                    let _ = self.verify_password(password, &self.dummy_password_hash);
                    tracing::warn!(email = %email, "Login failed: account has no password");
                    return Err(ApiError::Unauthorized);
                }
            },
            None => {
                let _ = self.verify_password(password, &self.dummy_password_hash);
                tracing::warn!(email = %email, "Login failed: user not found");
                return Err(ApiError::Unauthorized);
            }
        };

        let issued = self.create_session(user, metadata).await?;

        tracing::info!(user_id = %issued.user.id, session_id = %issued.session_id, "User logged in successfully");

        Ok(issued)
    }

    /// Create a session for an already authenticated user
    pub async fn create_session(
        &self,
        user: User,
        metadata: &RequestMetadata,
    ) -> ApiResult<IssuedSession> {
        let session_id = Uuid::new_v4();
        let session_token = generate_opaque_token();
        let session_expires_at = Utc::now() + Duration::seconds(self.config.session_ttl_secs);

        self.sessions
            .create(
                session_id,
                user.id,
                &hash_token(&session_token),
                metadata.ip_address.as_deref(),
                metadata.user_agent.as_deref(),
                session_expires_at,
            )
            .await?;

        self.users.touch_last_login(user.id).await?;

        let (access_token, access_expires_at) = self.issue_access_token(&user, session_id)?;

        Ok(IssuedSession {
            user,
            session_id,
            session_token,
            session_expires_at,
            access_token,
            access_expires_at,
        })
    }

    /// Issue a new access token for the current session and slide its expiry
    ///
    /// # Errors
    /// - `ApiError::InvalidToken` if the session is no longer active
    pub async fn refresh(&self, user: &User, session_id: Uuid) -> ApiResult<(String, DateTime<Utc>)> {
        let session_expires_at = Utc::now() + Duration::seconds(self.config.session_ttl_secs);

        if !self.sessions.extend(session_id, session_expires_at).await? {
            return Err(ApiError::InvalidToken(
                "session is no longer active".to_string(),
            ));
        }

        let token = self.issue_access_token(user, session_id)?;

        tracing::debug!(session_id = %session_id, user_id = %user.id, "Access token refreshed");

        Ok(token)
    }

    /// Logout a specific session
    ///
    /// # Errors
    /// - `ApiError::NotFound` if session doesn't exist
    pub async fn logout(&self, session_id: Uuid) -> ApiResult<()> {
        if !self.sessions.deactivate(session_id).await? {
            return Err(ApiError::not_found("session", session_id.to_string()));
        }

        tracing::info!(session_id = %session_id, "Session logged out");

        Ok(())
    }

    /// Logout all sessions for a user
    pub async fn logout_all(&self, user_id: Uuid) -> ApiResult<u64> {
        let count = self.sessions.deactivate_all_for_user(user_id).await?;
        tracing::info!(user_id = %user_id, sessions_invalidated = count, "All sessions logged out");
        Ok(count)
    }

    /// Active sessions of a user, with the current one flagged
    pub async fn list_sessions(
        &self,
        user_id: Uuid,
        current_session_id: Uuid,
    ) -> ApiResult<Vec<SessionResponse>> {
        let sessions = self.sessions.list_active_for_user(user_id).await?;
        Ok(sessions
            .into_iter()
            .map(|s| SessionResponse::from_session(s, current_session_id))
            .collect())
    }

    /// Revoke one of the user's own sessions
    ///
    /// # Errors
    /// - `ApiError::NotFound` if the session does not belong to the user
    pub async fn revoke_session(&self, user_id: Uuid, session_id: Uuid) -> ApiResult<()> {
        if !self.sessions.deactivate_owned(session_id, user_id).await? {
            return Err(ApiError::not_found("session", session_id.to_string()));
        }

        tracing::info!(user_id = %user_id, session_id = %session_id, "Session revoked");

        Ok(())
    }

    /// Change a user's password and revoke every other session
    ///
    /// # Returns
    /// The number of sessions revoked
    ///
    /// # Errors
    /// - `ApiError::Unauthorized` if the current password is wrong
    /// - `ApiError::ValidationError` if the account has no password or the new one is invalid
    pub async fn change_password(
        &self,
        user: &User,
        session_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> ApiResult<u64> {
        let Some(hash) = user.password_hash.as_deref() else {
            return Err(ApiError::ValidationError(
                "account signs in with Google and has no password".to_string(),
            ));
        };

        if !self.verify_password(current_password, hash)? {
            tracing::warn!(user_id = %user.id, "Password change failed: wrong current password");
            return Err(ApiError::Unauthorized);
        }

        validate_password(new_password)?;

        let new_hash = self.hash_password(new_password)?;
        self.users.update_password(user.id, &new_hash).await?;

        let revoked = self.sessions.deactivate_others(user.id, session_id).await?;

        tracing::info!(user_id = %user.id, sessions_revoked = revoked, "Password changed");

        Ok(revoked)
    }

    /// Verify an access token and return its claims
    ///
    /// Checks signature, expiry, issuer and audience. Session state is
    /// checked separately by the auth guard.
    ///
    /// # Errors
    /// - `ApiError::InvalidToken` if token is invalid, expired, or malformed
    pub fn verify_access_token(&self, token: &str) -> ApiResult<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_audience(&[TOKEN_ISSUER]);

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "Access token verification failed");
            ApiError::InvalidToken(e.to_string())
        })?;

        Ok(token_data.claims)
    }

    /// Sign an access token for a session
    fn issue_access_token(&self, user: &User, session_id: Uuid) -> ApiResult<(String, DateTime<Utc>)> {
        let claims = Claims::new(user, session_id, self.config.access_token_ttl_secs);
        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| ApiError::Internal("access token expiry out of range".to_string()))?;

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )?;

        Ok((token, expires_at))
    }

    /// Hash a password with Argon2id
    fn hash_password(&self, password: &str) -> ApiResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| ApiError::Internal(format!("Password hashing failed: {}", e)))?;
        Ok(hash.to_string())
    }

    /// Verify a password against an Argon2id hash
    fn verify_password(&self, password: &str, hash: &str) -> ApiResult<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| ApiError::Internal(format!("Invalid password hash format: {}", e)))?;

        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

/// Hash a token using SHA-256 for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 32 random bytes, URL-safe base64 without padding (43 characters)
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Simple email validation
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.is_empty() || email.len() > 254 {
        return false;
    }

    // Must have exactly one @ symbol
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }

    let (local, domain) = (parts[0], parts[1]);

    if local.is_empty() || local.len() > 64 {
        return false;
    }

    if domain.is_empty() || !domain.contains('.') {
        return false;
    }

    domain.split('.').all(|part| !part.is_empty())
}

fn validate_password(password: &str) -> ApiResult<()> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LENGTH {
        return Err(ApiError::ValidationError(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    if len > MAX_PASSWORD_LENGTH {
        return Err(ApiError::ValidationError(format!(
            "password must be at most {} characters",
            MAX_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

fn validate_display_name(display_name: &str) -> ApiResult<&str> {
    let trimmed = display_name.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > MAX_DISPLAY_NAME_LENGTH {
        return Err(ApiError::ValidationError(format!(
            "display name must be between 1 and {} characters",
            MAX_DISPLAY_NAME_LENGTH
        )));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_service() -> AuthService {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/peakself_unused")
            .unwrap();
        AuthService::new(pool, AuthConfig::new("unit-test-secret".to_string()))
    }

    fn sample_user(role: UserRole) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "writer@peakium.com".to_string(),
            password_hash: None,
            display_name: "Writer".to_string(),
            avatar_url: None,
            role,
            google_id: None,
            email_verified: false,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("test.user@domain.co.uk"));
        assert!(is_valid_email("user123@test.org"));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("invalid"));
        assert!(!is_valid_email("missing@domain"));
        assert!(!is_valid_email("@domain.com"));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email("user@@domain.com"));
        assert!(!is_valid_email("user@domain..com"));
        assert!(!is_valid_email(&format!("{}@example.com", "a".repeat(250))));
    }

    #[test]
    fn test_hash_token() {
        let token = "test_token_123";
        let hash = hash_token(token);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_token(token));
        assert_ne!(hash, hash_token("different_token"));
    }

    #[test]
    fn test_generate_opaque_token_format() {
        let token = generate_opaque_token();
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, generate_opaque_token());
    }

    #[test]
    fn test_validate_password_bounds() {
        assert_matches!(validate_password("short"), Err(ApiError::ValidationError(_)));
        assert!(validate_password("long enough").is_ok());
        assert_matches!(
            validate_password(&"p".repeat(MAX_PASSWORD_LENGTH + 1)),
            Err(ApiError::ValidationError(_))
        );
    }

    #[test]
    fn test_validate_display_name_trims() {
        assert_eq!(validate_display_name("  Ada  ").unwrap(), "Ada");
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"n".repeat(101)).is_err());
        assert!(validate_display_name(&"n".repeat(100)).is_ok());
    }

    #[test]
    fn test_auth_config_with_expiry_strings() {
        let config = AuthConfig::with_expiry_strings("secret".to_string(), "30m", "14d");
        assert_eq!(config.access_token_ttl_secs, 30 * 60);
        assert_eq!(config.session_ttl_secs, 14 * 24 * 3600);
    }

    #[test]
    fn test_auth_config_invalid_expiry_uses_default() {
        let config = AuthConfig::with_expiry_strings("secret".to_string(), "invalid", "nope");
        assert_eq!(config.access_token_ttl_secs, 3600);
        assert_eq!(config.session_ttl_secs, 7 * 24 * 3600);
    }

    #[tokio::test]
    async fn test_issue_and_verify_access_token() {
        let service = lazy_service();
        let user = sample_user(UserRole::Admin);
        let sid = Uuid::new_v4();

        let (token, expires_at) = service.issue_access_token(&user, sid).unwrap();
        assert!(expires_at > Utc::now());

        let claims = service.verify_access_token(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.sid, sid);
        assert_eq!(claims.role, UserRole::Admin);
        assert_eq!(claims.iss, "peakself");
    }

    #[tokio::test]
    async fn test_verify_rejects_foreign_signature() {
        let service = lazy_service();
        let claims = Claims::new(&sample_user(UserRole::User), Uuid::new_v4(), 3600);
        let forged = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"someone-elses-secret"),
        )
        .unwrap();

        assert_matches!(
            service.verify_access_token(&forged),
            Err(ApiError::InvalidToken(_))
        );
    }

    #[tokio::test]
    async fn test_verify_rejects_expired_token() {
        let service = lazy_service();
        let mut claims = Claims::new(&sample_user(UserRole::User), Uuid::new_v4(), 3600);
        claims.iat -= 7200;
        claims.exp = Utc::now().timestamp() - 3600;
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"unit-test-secret"),
        )
        .unwrap();

        assert_matches!(
            service.verify_access_token(&token),
            Err(ApiError::InvalidToken(_))
        );
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_audience() {
        let service = lazy_service();
        let mut claims = Claims::new(&sample_user(UserRole::User), Uuid::new_v4(), 3600);
        claims.aud = "another-app".to_string();
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"unit-test-secret"),
        )
        .unwrap();

        assert!(service.verify_access_token(&token).is_err());
    }

    #[tokio::test]
    async fn test_password_hash_round_trip() {
        let service = lazy_service();
        let hash = service.hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(service.verify_password("correct horse", &hash).unwrap());
        assert!(!service.verify_password("wrong horse", &hash).unwrap());
        assert!(!service
            .verify_password("anything", &service.dummy_password_hash)
            .unwrap());
    }
}
