//! API server configuration

use std::env;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use peakself_shared_config::{
    get_env_or_default, get_optional_env, parse_bool_env, parse_env, CommonConfig,
    DatabaseConfig, Environment, GoogleOAuthConfig, RedisConfig,
};

use crate::cookies::{CookieSettings, SameSite};
use crate::middleware::rate_limit::RateLimitConfig;

/// Minimum required length for JWT_SECRET to be considered secure
const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Default path prefixes that skip CSRF verification
const DEFAULT_CSRF_EXEMPT_PATHS: &str = "/api/uploads,/api/errors";

/// CSRF guard settings
#[derive(Debug, Clone)]
pub struct CsrfSettings {
    /// Verify the double-submit token on unsafe methods
    pub enabled: bool,
    /// Path prefixes exempt from verification
    pub exempt_paths: Vec<String>,
}

impl Default for CsrfSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            exempt_paths: split_list(DEFAULT_CSRF_EXEMPT_PATHS),
        }
    }
}

/// Per-bucket rate limits
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Master toggle; when false every limiter passes requests through
    pub enabled: bool,
    /// Global limit for every `/api/*` request
    pub api: RateLimitConfig,
    /// `POST /api/auth/login`
    pub login: RateLimitConfig,
    /// `POST /api/auth/register`
    pub register: RateLimitConfig,
    /// `PUT /api/auth/password`
    pub password: RateLimitConfig,
    /// `POST /api/errors`
    pub error_report: RateLimitConfig,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api: RateLimitConfig::api(),
            login: RateLimitConfig::login(),
            register: RateLimitConfig::register(),
            password: RateLimitConfig::password(),
            error_report: RateLimitConfig::error_report(),
        }
    }
}

impl RateLimitSettings {
    /// Load bucket overrides from `RATE_LIMIT_<BUCKET>_MAX` / `_WINDOW_SECS`
    fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: parse_bool_env("RATE_LIMIT_ENABLED", true)?,
            api: load_bucket("API", RateLimitConfig::api())?,
            login: load_bucket("LOGIN", RateLimitConfig::login())?,
            register: load_bucket("REGISTER", RateLimitConfig::register())?,
            password: load_bucket("PASSWORD", RateLimitConfig::password())?,
            error_report: load_bucket("ERROR_REPORT", RateLimitConfig::error_report())?,
        })
    }
}

fn load_bucket(name: &str, default: RateLimitConfig) -> Result<RateLimitConfig> {
    let max_var = format!("RATE_LIMIT_{}_MAX", name);
    let window_var = format!("RATE_LIMIT_{}_WINDOW_SECS", name);

    let max_requests: u32 = parse_env(&max_var, default.max_requests)?;
    let window_secs: u64 = parse_env(&window_var, default.window_secs)?;

    if max_requests == 0 {
        bail!("{} must be greater than zero", max_var);
    }
    if window_secs == 0 {
        bail!("{} must be greater than zero", window_var);
    }

    Ok(RateLimitConfig::new(
        default.key_prefix,
        max_requests,
        window_secs,
    ))
}

/// API server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Common configuration shared with the migration runner
    pub common: CommonConfig,

    /// Server port (default: 8080)
    pub port: u16,

    /// JWT secret for authentication
    pub jwt_secret: String,

    /// Access token expiry (default: 1h)
    pub jwt_expiry: String,

    /// Server-side session lifetime (default: 7d)
    pub session_ttl: String,

    /// Seconds between expired-session sweeps
    pub session_cleanup_interval_secs: u64,

    /// Cookie attributes
    pub cookies: CookieSettings,

    /// CORS allowed origins (optional)
    pub cors_allowed_origins: Option<Vec<String>>,

    /// SPA base URL used for OAuth redirects
    pub frontend_url: String,

    /// Trust `X-Forwarded-For` / `X-Real-IP` for the client address
    pub trust_proxy: bool,

    /// Maximum request body size in bytes
    pub body_limit_bytes: usize,

    /// CSRF guard settings
    pub csrf: CsrfSettings,

    /// Rate limiter settings
    pub rate_limit: RateLimitSettings,

    /// Google sign-in (None when not configured)
    pub google: Option<GoogleOAuthConfig>,

    /// Run embedded migrations on startup
    pub run_migrations: bool,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// In production mode, this function requires:
    /// - `JWT_SECRET`: Must be set and at least 32 characters long
    /// - `DATABASE_URL`: Must be explicitly set (no insecure defaults)
    ///
    /// In development/staging mode, sensible defaults are used for convenience.
    pub fn from_env() -> Result<Self> {
        let environment = Environment::from_str(
            &env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        )
        .unwrap_or_default();
        let is_production = environment.is_production();

        let jwt_secret = Self::load_jwt_secret(is_production)?;

        if is_production {
            Self::validate_database_url()?;
        }

        let common = CommonConfig::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

        let cookies = Self::load_cookie_settings(is_production)?;

        let google = match GoogleOAuthConfig::from_env() {
            Ok(google) => Some(google),
            Err(e) if GoogleOAuthConfig::is_configured() => {
                bail!("Invalid Google OAuth configuration: {}", e)
            }
            Err(_) => None,
        };

        let jwt_expiry = get_env_or_default("JWT_EXPIRY", "1h");
        let session_ttl = get_env_or_default("SESSION_TTL", "7d");
        for (name, value) in [("JWT_EXPIRY", &jwt_expiry), ("SESSION_TTL", &session_ttl)] {
            if parse_duration_string(value).is_none() {
                bail!(
                    "Invalid {} value '{}': expected a number followed by s, m, h, d or w",
                    name,
                    value
                );
            }
        }

        Ok(Self {
            common,

            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid PORT value")?,

            jwt_secret,
            jwt_expiry,
            session_ttl,

            session_cleanup_interval_secs: parse_env("SESSION_CLEANUP_INTERVAL_SECS", 3600)?,

            cookies,

            cors_allowed_origins: get_optional_env("CORS_ORIGINS").map(|s| split_list(&s)),

            frontend_url: get_env_or_default("FRONTEND_URL", "http://localhost:5173")
                .trim_end_matches('/')
                .to_string(),

            trust_proxy: parse_bool_env("TRUST_PROXY", false)?,

            body_limit_bytes: parse_env("BODY_LIMIT_BYTES", 1024 * 1024)?,

            csrf: CsrfSettings {
                enabled: parse_bool_env("CSRF_ENABLED", true)?,
                exempt_paths: split_list(&get_env_or_default(
                    "CSRF_EXEMPT_PATHS",
                    DEFAULT_CSRF_EXEMPT_PATHS,
                )),
            },

            rate_limit: RateLimitSettings::from_env()?,

            google,

            run_migrations: parse_bool_env("RUN_MIGRATIONS", false)?,
        })
    }

    /// Load and validate JWT_SECRET
    ///
    /// In production:
    /// - JWT_SECRET must be explicitly set
    /// - Must be at least MIN_JWT_SECRET_LENGTH characters
    ///
    /// In development: uses a default value with a warning
    fn load_jwt_secret(is_production: bool) -> Result<String> {
        match env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => {
                if is_production && secret.len() < MIN_JWT_SECRET_LENGTH {
                    bail!(
                        "JWT_SECRET must be at least {} characters in production (got {})",
                        MIN_JWT_SECRET_LENGTH,
                        secret.len()
                    );
                }
                Ok(secret)
            }
            _ if is_production => {
                bail!(
                    "JWT_SECRET environment variable is required in production. \
                     Please set a secure secret of at least {} characters.",
                    MIN_JWT_SECRET_LENGTH
                );
            }
            _ => {
                tracing::warn!(
                    "JWT_SECRET not set, using insecure default. \
                     This is only acceptable in development mode."
                );
                Ok("development-secret-change-in-production".to_string())
            }
        }
    }

    /// Validate that DATABASE_URL is explicitly set in production
    fn validate_database_url() -> Result<()> {
        match env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => Ok(()),
            _ => {
                bail!(
                    "DATABASE_URL environment variable is required in production. \
                     Please set your PostgreSQL connection string."
                );
            }
        }
    }

    /// Load cookie attributes; `Secure` defaults to on in production
    fn load_cookie_settings(is_production: bool) -> Result<CookieSettings> {
        let same_site = SameSite::from_str(&get_env_or_default("COOKIE_SAME_SITE", "lax"))
            .map_err(|e| anyhow::anyhow!("Invalid COOKIE_SAME_SITE value: {}", e))?;
        let secure = parse_bool_env("COOKIE_SECURE", is_production)?;

        if same_site == SameSite::None && !secure {
            tracing::warn!("COOKIE_SAME_SITE=none requires Secure cookies; forcing Secure");
        }

        Ok(CookieSettings {
            secure,
            same_site,
            domain: get_optional_env("COOKIE_DOMAIN"),
        })
    }

    // Convenience accessors for common config fields

    /// Get database configuration
    pub fn database(&self) -> &DatabaseConfig {
        &self.common.database
    }

    /// Get Redis configuration
    pub fn redis(&self) -> &RedisConfig {
        &self.common.redis
    }

    /// Get environment mode
    pub fn environment(&self) -> Environment {
        self.common.environment
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.common.environment.is_production()
    }

    /// Check if Google sign-in is available
    pub fn has_google_oauth(&self) -> bool {
        self.google.is_some()
    }

    /// Configuration suitable for tests: development mode, no external services
    pub fn for_tests(database_url: &str) -> Self {
        Self {
            common: CommonConfig {
                database: DatabaseConfig::with_url(database_url),
                redis: RedisConfig::default(),
                environment: Environment::Development,
                log_level: "debug".to_string(),
                log_format: Default::default(),
            },
            port: 0,
            jwt_secret: "test-jwt-secret-for-integration-tests-minimum-32-chars".to_string(),
            jwt_expiry: "1h".to_string(),
            session_ttl: "7d".to_string(),
            session_cleanup_interval_secs: 3600,
            cookies: CookieSettings::default(),
            cors_allowed_origins: None,
            frontend_url: "http://localhost:5173".to_string(),
            trust_proxy: false,
            body_limit_bytes: 1024 * 1024,
            csrf: CsrfSettings::default(),
            rate_limit: RateLimitSettings::default(),
            google: None,
            run_migrations: false,
        }
    }
}

/// Parse duration strings like "15m", "7d", "24h" to seconds
pub fn parse_duration_string(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() || !s.is_ascii() {
        return None;
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: i64 = num_str.parse().ok()?;
    if num <= 0 {
        return None;
    }

    match unit {
        "s" => Some(num),
        "m" => Some(num * 60),
        "h" => Some(num * 3600),
        "d" => Some(num * 24 * 3600),
        "w" => Some(num * 7 * 24 * 3600),
        _ => None,
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure tests that modify environment variables don't run in parallel
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to temporarily set environment variables for a test
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(vars: &[(&str, &str)]) -> Self {
            let saved: Vec<_> = vars
                .iter()
                .map(|(k, v)| {
                    let old = env::var(*k).ok();
                    env::set_var(*k, *v);
                    (k.to_string(), old)
                })
                .collect();
            Self { vars: saved }
        }

        fn remove_vars(vars: &[&str]) -> Self {
            let saved: Vec<_> = vars
                .iter()
                .map(|k| {
                    let old = env::var(*k).ok();
                    env::remove_var(*k);
                    (k.to_string(), old)
                })
                .collect();
            Self { vars: saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (k, v) in &self.vars {
                match v {
                    Some(val) => env::set_var(k, val),
                    None => env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn test_jwt_secret_required_in_production() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::remove_vars(&["JWT_SECRET"]);

        let result = Config::load_jwt_secret(true);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("JWT_SECRET"));
        assert!(err.contains("required in production"));
    }

    #[test]
    fn test_jwt_secret_minimum_length_in_production() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[("JWT_SECRET", "short")]);

        let result = Config::load_jwt_secret(true);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("at least 32 characters"));
    }

    #[test]
    fn test_jwt_secret_valid_in_production() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let secret = "a".repeat(MIN_JWT_SECRET_LENGTH);
        let _guard = EnvGuard::new(&[("JWT_SECRET", &secret)]);

        let result = Config::load_jwt_secret(true);
        assert_eq!(result.unwrap(), secret);
    }

    #[test]
    fn test_jwt_secret_uses_default_in_development() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::remove_vars(&["JWT_SECRET"]);

        let result = Config::load_jwt_secret(false);
        assert_eq!(result.unwrap(), "development-secret-change-in-production");
    }

    #[test]
    fn test_database_url_required_in_production() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::remove_vars(&["DATABASE_URL"]);

        let result = Config::validate_database_url();
        let err = result.unwrap_err().to_string();
        assert!(err.contains("DATABASE_URL"));
        assert!(err.contains("required in production"));
    }

    #[test]
    fn test_empty_database_url_fails() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[("DATABASE_URL", "")]);

        assert!(Config::validate_database_url().is_err());
    }

    #[test]
    fn test_production_from_env_rejects_short_secret() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[
            ("ENVIRONMENT", "production"),
            ("JWT_SECRET", "too-short"),
            ("DATABASE_URL", "postgres://u:p@db/peakself"),
        ]);

        assert!(Config::from_env().is_err());
    }

    #[test]
    fn test_from_env_defaults_in_development() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _unset = EnvGuard::remove_vars(&[
            "ENVIRONMENT",
            "PORT",
            "JWT_EXPIRY",
            "SESSION_TTL",
            "CSRF_ENABLED",
            "CSRF_EXEMPT_PATHS",
            "RATE_LIMIT_ENABLED",
            "RATE_LIMIT_LOGIN_MAX",
            "COOKIE_SECURE",
            "COOKIE_SAME_SITE",
            "GOOGLE_CLIENT_ID",
            "GOOGLE_CLIENT_SECRET",
            "GOOGLE_REDIRECT_URL",
            "FRONTEND_URL",
            "LOG_FORMAT",
        ]);

        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.jwt_expiry, "1h");
        assert_eq!(config.session_ttl, "7d");
        assert!(config.csrf.enabled);
        assert_eq!(config.csrf.exempt_paths, vec!["/api/uploads", "/api/errors"]);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.login.max_requests, 10);
        assert!(!config.cookies.secure);
        assert_eq!(config.cookies.same_site, SameSite::Lax);
        assert!(!config.has_google_oauth());
        assert_eq!(config.frontend_url, "http://localhost:5173");
        assert!(!config.run_migrations);
    }

    #[test]
    fn test_rate_limit_bucket_override() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[
            ("RATE_LIMIT_LOGIN_MAX", "3"),
            ("RATE_LIMIT_LOGIN_WINDOW_SECS", "30"),
        ]);

        let settings = RateLimitSettings::from_env().unwrap();
        assert_eq!(settings.login.max_requests, 3);
        assert_eq!(settings.login.window_secs, 30);
        assert_eq!(settings.login.key_prefix, "login");
        assert_eq!(settings.register.max_requests, 5);
    }

    #[test]
    fn test_rate_limit_invalid_number_fails() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[("RATE_LIMIT_API_MAX", "lots")]);

        assert!(RateLimitSettings::from_env().is_err());
    }

    #[test]
    fn test_rate_limit_zero_window_fails() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[("RATE_LIMIT_PASSWORD_WINDOW_SECS", "0")]);

        let err = RateLimitSettings::from_env().unwrap_err().to_string();
        assert!(err.contains("RATE_LIMIT_PASSWORD_WINDOW_SECS"));
    }

    #[test]
    fn test_cookie_secure_defaults_to_production() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::remove_vars(&["COOKIE_SECURE", "COOKIE_SAME_SITE", "COOKIE_DOMAIN"]);

        assert!(Config::load_cookie_settings(true).unwrap().secure);
        assert!(!Config::load_cookie_settings(false).unwrap().secure);
    }

    #[test]
    fn test_invalid_same_site_fails() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[("COOKIE_SAME_SITE", "sometimes")]);

        assert!(Config::load_cookie_settings(false).is_err());
    }

    #[test]
    fn test_parse_duration_string() {
        assert_eq!(parse_duration_string("15m"), Some(900));
        assert_eq!(parse_duration_string("7d"), Some(604800));
        assert_eq!(parse_duration_string("24h"), Some(86400));
        assert_eq!(parse_duration_string("30s"), Some(30));
        assert_eq!(parse_duration_string("1w"), Some(604800));
        assert_eq!(parse_duration_string(""), None);
        assert_eq!(parse_duration_string("invalid"), None);
        assert_eq!(parse_duration_string("15x"), None);
        assert_eq!(parse_duration_string("0h"), None);
        assert_eq!(parse_duration_string("-5m"), None);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" https://a.com , ,https://b.com"),
            vec!["https://a.com", "https://b.com"]
        );
    }
}
