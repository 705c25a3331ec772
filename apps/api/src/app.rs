//! Router assembly
//!
//! Layers, outermost first:
//! 1. 5xx message sanitizing (production only)
//! 2. panic catcher (standard 500 body)
//! 3. `x-request-id` set and propagated
//! 4. HTTP tracing
//! 5. CORS
//! 6. gzip compression
//! 7. security headers
//! 8. request body limit
//! 9. global `api` rate limit
//! 10. CSRF guard
//!
//! then the `/api` routers (credential endpoints carry their own limiters)
//! and a JSON 404 fallback.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Extension},
    http::{header, HeaderName, Method, Uri},
    middleware, Router,
};
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::error::{panic_response, sanitize_server_errors, ApiError, ApiResult};
use crate::middleware::{
    csrf_protection, rate_limit, security_headers, CsrfGuard, RateLimitConfig, RateLimiter,
    RouteRateLimit, SecurityHeadersConfig, CSRF_HEADER,
};
use crate::routes::{
    admin_router, auth_router, csrf_router, errors_router, health_router, oauth_router,
    AdminState, AuthRateLimits, AuthState, CsrfState, ErrorReportState, HealthState, OAuthState,
};
use crate::services::{AuthConfig, AuthService, CsrfService, GoogleOAuthService, HealthService};

/// Everything the router needs, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub auth_service: AuthService,
    /// None when Google sign-in is not configured
    pub google: Option<Arc<GoogleOAuthService>>,
    pub health_service: HealthService,
    pub csrf_service: CsrfService,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Build the services from configuration
    ///
    /// `redis` backs the rate limiters and the readiness check; without it
    /// limits are kept in process memory.
    pub fn new(config: Config, pool: PgPool, redis: Option<redis::Client>) -> ApiResult<Self> {
        let auth_service = AuthService::new(pool.clone(), AuthConfig::from_config(&config));

        let google = match config.google.clone() {
            Some(google_config) => Some(Arc::new(GoogleOAuthService::new(
                google_config,
                pool.clone(),
            )?)),
            None => None,
        };

        Ok(Self {
            health_service: HealthService::new(pool.clone(), redis.clone()),
            rate_limiter: RateLimiter::new(redis),
            csrf_service: CsrfService::default(),
            config: Arc::new(config),
            pool,
            auth_service,
            google,
        })
    }

    fn route_limit(&self, config: &RateLimitConfig) -> RouteRateLimit {
        RouteRateLimit::new(
            self.rate_limiter.clone(),
            config.clone(),
            self.config.rate_limit.enabled,
            self.config.trust_proxy,
        )
    }
}

/// Build the CORS layer based on configuration.
///
/// In production mode:
/// - If `CORS_ORIGINS` is set, only those origins are allowed
/// - If `CORS_ORIGINS` is not set, CORS requests are rejected (no origins allowed)
///
/// In development mode:
/// - If `CORS_ORIGINS` is set, those origins are used
/// - If `CORS_ORIGINS` is not set, permissive CORS is used for convenience
pub fn build_cors_layer(config: &Config) -> CorsLayer {
    match &config.cors_allowed_origins {
        Some(origins) if !origins.is_empty() => {
            let allowed_origins: Vec<_> = origins
                .iter()
                .filter_map(|origin| {
                    origin.parse().ok().or_else(|| {
                        tracing::warn!("Invalid CORS origin '{}', skipping", origin);
                        None
                    })
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::error!("No valid CORS origins configured, CORS requests will be rejected");
                return CorsLayer::new();
            }

            tracing::info!(
                "CORS configured with {} allowed origin(s): {:?}",
                allowed_origins.len(),
                origins
            );
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::ORIGIN,
                    HeaderName::from_static(CSRF_HEADER),
                ])
                .expose_headers([
                    HeaderName::from_static("x-request-id"),
                    HeaderName::from_static("x-ratelimit-limit"),
                    HeaderName::from_static("x-ratelimit-remaining"),
                    HeaderName::from_static("x-ratelimit-reset"),
                    header::RETRY_AFTER,
                ])
                .allow_credentials(true)
                .max_age(Duration::from_secs(3600))
        }
        _ if config.is_production() => {
            tracing::warn!(
                "CORS_ORIGINS not configured in production mode. \
                 CORS requests will be rejected. Set CORS_ORIGINS to allow cross-origin requests."
            );
            CorsLayer::new()
        }
        _ => {
            tracing::warn!(
                "Using permissive CORS in development mode. \
                 Set CORS_ORIGINS for production-like behavior."
            );
            CorsLayer::permissive()
        }
    }
}

/// Unknown routes
async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found("route", uri.path().to_string())
}

/// Build the full application router
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    let limits = &config.rate_limit;
    let auth_service = Arc::new(state.auth_service.clone());

    let auth_state = AuthState {
        auth_service: Arc::clone(&auth_service),
        cookies: config.cookies.clone(),
        trust_proxy: config.trust_proxy,
    };
    let auth_limits = AuthRateLimits {
        login: state.route_limit(&limits.login),
        register: state.route_limit(&limits.register),
        password: state.route_limit(&limits.password),
    };
    let oauth_state = OAuthState {
        google: state.google.clone(),
        auth_service: Arc::clone(&auth_service),
        cookies: config.cookies.clone(),
        frontend_url: config.frontend_url.clone(),
        trust_proxy: config.trust_proxy,
    };

    let api = Router::new()
        .nest(
            "/auth",
            auth_router(auth_state, auth_limits).merge(oauth_router(oauth_state)),
        )
        .nest(
            "/admin",
            admin_router(AdminState {
                auth_service: Arc::clone(&auth_service),
            }),
        )
        .nest(
            "/health",
            health_router(HealthState::new(state.health_service.clone())),
        )
        .merge(csrf_router(CsrfState {
            service: state.csrf_service.clone(),
            cookies: config.cookies.clone(),
        }))
        .merge(errors_router(
            ErrorReportState {
                trust_proxy: config.trust_proxy,
            },
            state.route_limit(&limits.error_report),
        ));

    let csrf_guard = CsrfGuard::new(state.csrf_service.clone(), &config.csrf);
    let api_limit = state.route_limit(&limits.api);
    let security = SecurityHeadersConfig::for_environment(config.environment());

    let layers = ServiceBuilder::new()
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&config))
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn_with_state(security, security_headers))
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(middleware::from_fn_with_state(api_limit, rate_limit))
        .layer(middleware::from_fn_with_state(csrf_guard, csrf_protection));

    Router::new()
        .nest("/api", api)
        .fallback(not_found)
        .layer(layers)
        // Services for the auth extractors
        .layer(Extension(state.auth_service))
        .layer(Extension(state.pool))
        .layer(middleware::map_response_with_state(
            config.is_production(),
            sanitize_server_errors,
        ))
}
