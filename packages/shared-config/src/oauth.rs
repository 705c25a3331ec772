//! Google OAuth 2.0 configuration types

use crate::{get_env_or_default, get_required_env, ConfigError, ConfigResult};
use std::env;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Google sign-in configuration
#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    /// OAuth client ID issued by Google
    pub client_id: String,

    /// OAuth client secret issued by Google
    pub client_secret: String,

    /// Callback URL registered with Google (points at `/api/auth/google/callback`)
    pub redirect_url: String,

    /// Authorization endpoint the browser is redirected to
    pub auth_url: String,

    /// Token endpoint used for the code exchange
    pub token_url: String,

    /// Userinfo endpoint used to fetch the profile
    pub userinfo_url: String,
}

impl GoogleOAuthConfig {
    /// Load Google OAuth configuration from environment variables
    ///
    /// Returns an error if the client credentials or redirect URL are not set.
    /// Consumers call `.ok()` to get `Option<GoogleOAuthConfig>`.
    pub fn from_env() -> ConfigResult<Self> {
        let client_id = get_required_env("GOOGLE_CLIENT_ID")?;
        let client_secret = get_required_env("GOOGLE_CLIENT_SECRET")?;
        let redirect_url = get_required_env("GOOGLE_REDIRECT_URL")?;

        for (name, value) in [
            ("GOOGLE_CLIENT_ID", &client_id),
            ("GOOGLE_CLIENT_SECRET", &client_secret),
            ("GOOGLE_REDIRECT_URL", &redirect_url),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    name.to_string(),
                    "value cannot be empty".to_string(),
                ));
            }
        }

        if !redirect_url.starts_with("http://") && !redirect_url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(
                "GOOGLE_REDIRECT_URL".to_string(),
                redirect_url,
            ));
        }

        Ok(Self {
            client_id,
            client_secret,
            redirect_url,
            auth_url: get_env_or_default("GOOGLE_AUTH_URL", GOOGLE_AUTH_URL),
            token_url: get_env_or_default("GOOGLE_TOKEN_URL", GOOGLE_TOKEN_URL),
            userinfo_url: get_env_or_default("GOOGLE_USERINFO_URL", GOOGLE_USERINFO_URL),
        })
    }

    /// Check if Google sign-in is configured
    pub fn is_configured() -> bool {
        env::var("GOOGLE_CLIENT_ID").is_ok()
            && env::var("GOOGLE_CLIENT_SECRET").is_ok()
            && env::var("GOOGLE_REDIRECT_URL").is_ok()
    }

    /// Create a configuration against Google's production endpoints
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: redirect_url.into(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
        }
    }

    /// Point the token and userinfo endpoints at another host (useful for testing)
    pub fn with_provider_base(mut self, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        self.auth_url = format!("{}/o/oauth2/v2/auth", base);
        self.token_url = format!("{}/token", base);
        self.userinfo_url = format!("{}/v1/userinfo", base);
        self
    }
}
