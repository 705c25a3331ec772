//! Google OAuth 2.0 sign-in (authorization-code flow)
//!
//! The browser is sent to Google's consent screen with a random `state`;
//! the callback exchanges the code for an access token, reads the profile
//! from the userinfo endpoint and resolves it to a local account:
//! 1. an account already linked to the Google subject
//! 2. an existing account with the same (verified) email, which gets linked
//! 3. a new password-less account with the `user` role

use std::time::Duration;

use peakself_shared_config::GoogleOAuthConfig;
use reqwest::Client;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::user::User;
use crate::repositories::UserRepository;

/// Scopes requested from Google
pub const GOOGLE_SCOPES: &str = "openid email profile";

/// HTTP request timeout for calls to the provider
const HTTP_TIMEOUT_SECS: u64 = 10;

/// Token endpoint response (only the fields we use)
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// OpenID Connect userinfo response
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleProfile {
    /// Stable Google account identifier
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl GoogleProfile {
    /// Display name for a new account, falling back to the email's local part
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| n.chars().take(100).collect())
            .unwrap_or_else(|| {
                self.email
                    .split('@')
                    .next()
                    .unwrap_or(&self.email)
                    .to_string()
            })
    }
}

/// Google sign-in service
#[derive(Clone)]
pub struct GoogleOAuthService {
    config: GoogleOAuthConfig,
    http: Client,
    users: UserRepository,
}

impl GoogleOAuthService {
    /// Create the service with its own HTTP client
    pub fn new(config: GoogleOAuthConfig, pool: PgPool) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            config,
            http,
            users: UserRepository::new(pool),
        })
    }

    /// Provider authorization URL carrying the given `state`
    pub fn authorization_url(&self, state: &str) -> ApiResult<String> {
        let url = url::Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", GOOGLE_SCOPES),
                ("state", state),
                ("access_type", "online"),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| ApiError::Configuration(format!("invalid GOOGLE_AUTH_URL: {}", e)))?;

        Ok(url.into())
    }

    /// Exchange an authorization code for an access token
    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str) -> ApiResult<TokenResponse> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "OAuth token exchange rejected");
            return Err(ApiError::OAuth(format!(
                "token endpoint returned {}",
                status
            )));
        }

        Ok(response.json::<TokenResponse>().await?)
    }

    /// Fetch the signed-in user's profile
    #[instrument(skip(self, access_token))]
    pub async fn fetch_profile(&self, access_token: &str) -> ApiResult<GoogleProfile> {
        let response = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "OAuth userinfo request rejected");
            return Err(ApiError::OAuth(format!(
                "userinfo endpoint returned {}",
                status
            )));
        }

        let profile = response.json::<GoogleProfile>().await?;
        if profile.sub.is_empty() || profile.email.is_empty() {
            return Err(ApiError::OAuth(
                "profile is missing subject or email".to_string(),
            ));
        }

        Ok(profile)
    }

    /// Find, link or create the local account for a Google profile
    pub async fn resolve_user(&self, profile: &GoogleProfile) -> ApiResult<User> {
        if let Some(user) = self.users.find_by_google_id(&profile.sub).await? {
            return Ok(user);
        }

        if let Some(existing) = self.users.find_by_email(&profile.email).await? {
            if !profile.email_verified {
                warn!(user_id = %existing.id, "Refusing to link Google account with unverified email");
                return Err(ApiError::OAuth(
                    "Google email is not verified".to_string(),
                ));
            }
            if existing.google_id.is_some() {
                return Err(ApiError::conflict("google account", existing.email));
            }

            let user = self
                .users
                .link_google(existing.id, &profile.sub, profile.picture.as_deref())
                .await?;
            info!(user_id = %user.id, "Linked Google account to existing user");
            return Ok(user);
        }

        let user = self
            .users
            .create_from_google(
                &profile.email,
                &profile.display_name(),
                profile.picture.as_deref(),
                &profile.sub,
                profile.email_verified,
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ApiError::conflict("user", profile.email.clone())
                } else {
                    ApiError::Database(e)
                }
            })?;

        info!(user_id = %user.id, "Created user from Google profile");
        Ok(user)
    }

    /// Complete the callback: code exchange, profile fetch, account resolution
    pub async fn sign_in(&self, code: &str) -> ApiResult<User> {
        let token = self.exchange_code(code).await?;
        let profile = self.fetch_profile(&token.access_token).await?;
        self.resolve_user(&profile).await
    }
}
