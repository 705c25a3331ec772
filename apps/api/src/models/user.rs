//! User and authentication models for PeakSelf
//!
//! This module contains the database models for:
//! - User accounts (local and Google sign-in)
//! - JWT claims and the auth response body

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Issuer and audience of every access token
pub const TOKEN_ISSUER: &str = "peakself";

/// User role enum matching PostgreSQL user_role type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    #[default]
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// User account from the users table
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    /// Unique user identifier
    pub id: Uuid,

    /// User's email address (unique, lowercased)
    pub email: String,

    /// Argon2id hash; None for accounts created through Google sign-in
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,

    /// Display name shown in the UI
    pub display_name: String,

    /// URL to user's avatar image
    pub avatar_url: Option<String>,

    /// User's role (admin, user)
    pub role: UserRole,

    /// Google account subject, when linked
    #[serde(skip_serializing)]
    pub google_id: Option<String>,

    /// Whether email has been verified
    pub email_verified: bool,

    /// Last successful sign-in
    pub last_login_at: Option<DateTime<Utc>>,

    /// Account creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last profile update timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Whether the account can sign in with a password
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// User as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: UserRole,
    pub email_verified: bool,
    pub has_password: bool,
    pub google_linked: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            has_password: user.has_password(),
            google_linked: user.google_id.is_some(),
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            role: user.role,
            email_verified: user.email_verified,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

/// JWT claims payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,

    /// User's email
    pub email: String,

    /// User's role at issue time
    pub role: UserRole,

    /// Session ID
    pub sid: Uuid,

    /// Issued at timestamp (Unix epoch)
    pub iat: i64,

    /// Expiration timestamp (Unix epoch)
    pub exp: i64,

    /// Issuer
    #[serde(default = "default_issuer")]
    pub iss: String,

    /// Audience
    #[serde(default = "default_issuer")]
    pub aud: String,
}

fn default_issuer() -> String {
    TOKEN_ISSUER.to_string()
}

impl Claims {
    /// Create new claims for a user session
    pub fn new(user: &User, session_id: Uuid, access_token_ttl_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            sid: session_id,
            iat: now,
            exp: now + access_token_ttl_secs,
            iss: default_issuer(),
            aud: default_issuer(),
        }
    }

    /// Check if the token has expired
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// Body returned by register, login and refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    /// Signed access token (also set as the `peak_token` cookie)
    pub token: String,
    /// Access token expiration
    pub expires_at: DateTime<Utc>,
}

/// HTTP request metadata stored with each session
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    /// Client IP address (may be from X-Forwarded-For behind proxy)
    pub ip_address: Option<String>,

    /// Client user agent string
    pub user_agent: Option<String>,
}

impl RequestMetadata {
    pub fn new(ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip_address,
            user_agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "reader@peakium.com".to_string(),
            password_hash: None,
            display_name: "Reader".to_string(),
            avatar_url: None,
            role: UserRole::User,
            google_id: Some("google-123".to_string()),
            email_verified: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_user_role_default() {
        assert_eq!(UserRole::default(), UserRole::User);
    }

    #[test]
    fn test_user_role_round_trips_through_strings() {
        assert_eq!("admin".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert_eq!(UserRole::User.to_string(), "user");
        assert!("guest".parse::<UserRole>().is_err());
        assert_eq!(serde_json::to_string(&UserRole::Admin).unwrap(), "\"admin\"");
    }

    #[test]
    fn test_claims_new_sets_issuer_and_audience() {
        let user = sample_user();
        let sid = Uuid::new_v4();
        let claims = Claims::new(&user, sid, 3600);

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.sid, sid);
        assert_eq!(claims.iss, "peakself");
        assert_eq!(claims.aud, "peakself");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(!claims.is_expired());
    }

    #[test]
    fn test_claims_is_expired() {
        let mut claims = Claims::new(&sample_user(), Uuid::new_v4(), 3600);
        claims.exp = Utc::now().timestamp() - 1;
        assert!(claims.is_expired());
    }

    #[test]
    fn test_user_response_hides_secrets() {
        let user = sample_user();
        let response = UserResponse::from(user);
        assert!(!response.has_password);
        assert!(response.google_linked);

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("google_id").is_none());
        assert_eq!(json["role"], "user");
    }
}
