//! Rate limiting middleware for the PeakSelf API
//!
//! Fixed-window counters keyed by `(bucket, client ip)`. The window opens at
//! the first request of a key and the counter resets once it elapses.
//!
//! Redis is used when configured (`INCR` + `EXPIRE` in a Lua script so
//! every instance shares the same counters). Without Redis, or whenever a
//! Redis call fails, the in-memory limiter takes over and limits become
//! per-instance.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ApiError;

/// How often the in-memory limiter drops expired windows
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Atomic fixed-window increment. Returns `{count, ttl}`.
const FIXED_WINDOW_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('TTL', KEYS[1])
if ttl < 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {current, ttl}
"#;

/// Rate limit configuration for one bucket
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum number of requests allowed in the window
    pub max_requests: u32,
    /// Window size in seconds
    pub window_secs: u64,
    /// Bucket name used in keys (e.g., "login", "register")
    pub key_prefix: String,
}

impl RateLimitConfig {
    /// Create a new rate limit configuration
    pub fn new(key_prefix: impl Into<String>, max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
            key_prefix: key_prefix.into(),
        }
    }

    /// Global API limit: 300 requests per 15 minutes per IP
    pub fn api() -> Self {
        Self::new("api", 300, 900)
    }

    /// Login: 10 attempts per 15 minutes per IP
    pub fn login() -> Self {
        Self::new("login", 10, 900)
    }

    /// Registration: 5 attempts per hour per IP
    pub fn register() -> Self {
        Self::new("register", 5, 3600)
    }

    /// Password change: 5 attempts per 15 minutes per IP
    pub fn password() -> Self {
        Self::new("password", 5, 900)
    }

    /// Client error reports: 30 per minute per IP
    pub fn error_report() -> Self {
        Self::new("error_report", 30, 60)
    }
}

/// Outcome of an allowed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Requests left in the current window
    pub remaining: u32,
    /// Seconds until the window resets
    pub reset_after: u64,
}

/// Whole seconds left in a window, rounded up and never zero
fn secs_until_reset(window: Duration, elapsed: Duration) -> u64 {
    let left = window.saturating_sub(elapsed);
    let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
    secs.max(1)
}

/// One fixed window in the in-memory limiter
#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
    window: Duration,
}

impl RateLimitEntry {
    fn new(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            window,
        }
    }

    /// Count a request, opening a new window if the current one elapsed
    ///
    /// Returns Ok(status) if allowed, Err(retry_after_secs) if rate limited
    fn check_and_record(&mut self, max_requests: u32, now: Instant) -> Result<RateLimitStatus, u64> {
        if self.is_expired(now) {
            self.count = 0;
            self.window_start = now;
        }

        let elapsed = now.saturating_duration_since(self.window_start);
        let reset_after = secs_until_reset(self.window, elapsed);

        if self.count < max_requests {
            self.count += 1;
            Ok(RateLimitStatus {
                remaining: max_requests - self.count,
                reset_after,
            })
        } else {
            Err(reset_after)
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window
    }
}

/// In-memory fixed-window rate limiter
///
/// Used when Redis is not configured or unavailable.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    /// Map of "bucket:client" -> current window
    entries: RwLock<HashMap<String, RateLimitEntry>>,
    /// Last cleanup time
    last_cleanup: RwLock<Instant>,
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRateLimiter {
    /// Create a new in-memory rate limiter
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            last_cleanup: RwLock::new(Instant::now()),
        }
    }

    /// Check if a request should be rate limited
    ///
    /// Returns Ok(status) if allowed, Err(retry_after) if rate limited
    pub async fn check(&self, key: &str, config: &RateLimitConfig) -> Result<RateLimitStatus, u64> {
        self.check_at(key, config, Instant::now()).await
    }

    async fn check_at(
        &self,
        key: &str,
        config: &RateLimitConfig,
        now: Instant,
    ) -> Result<RateLimitStatus, u64> {
        let full_key = format!("{}:{}", config.key_prefix, key);
        let window = Duration::from_secs(config.window_secs);

        self.maybe_cleanup(now).await;

        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(full_key.clone())
            .or_insert_with(|| RateLimitEntry::new(now, window));
        // Pick up configuration changes for the next window
        entry.window = window;

        let result = entry.check_and_record(config.max_requests, now);

        match &result {
            Ok(status) => {
                debug!(key = %full_key, remaining = status.remaining, "In-memory rate limit check passed");
            }
            Err(retry_after) => {
                debug!(key = %full_key, retry_after = retry_after, "In-memory rate limit exceeded");
            }
        }

        result
    }

    /// Drop expired windows to prevent unbounded memory growth
    async fn maybe_cleanup(&self, now: Instant) {
        {
            let last_cleanup = self.last_cleanup.read().await;
            if now.saturating_duration_since(*last_cleanup) < CLEANUP_INTERVAL {
                return;
            }
        }

        let mut last_cleanup = self.last_cleanup.write().await;

        // Double-check after acquiring write lock
        if now.saturating_duration_since(*last_cleanup) < CLEANUP_INTERVAL {
            return;
        }

        *last_cleanup = now;
        drop(last_cleanup);

        self.purge_expired(now).await;
    }

    /// Remove every window that has elapsed; returns how many were removed
    pub async fn purge_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.write().await;
        let initial_count = entries.len();

        entries.retain(|_, entry| !entry.is_expired(now));

        let removed = initial_count - entries.len();
        if removed > 0 {
            debug!(
                removed = removed,
                remaining = entries.len(),
                "Cleaned up expired rate limit entries"
            );
        }
        removed
    }

    /// Get the current number of tracked entries
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Rate limiter shared by every bucket
#[derive(Clone)]
pub struct RateLimiter {
    redis: Option<Arc<redis::Client>>,
    fallback: Arc<InMemoryRateLimiter>,
}

impl RateLimiter {
    /// Create a rate limiter, backed by Redis when a client is given
    pub fn new(redis: Option<redis::Client>) -> Self {
        Self {
            redis: redis.map(Arc::new),
            fallback: Arc::new(InMemoryRateLimiter::new()),
        }
    }

    /// Create a purely in-memory rate limiter
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Whether counters are shared through Redis
    pub fn is_distributed(&self) -> bool {
        self.redis.is_some()
    }

    /// Check if a request should be rate limited
    ///
    /// Returns Ok(status) if allowed, Err(retry_after) if rate limited
    pub async fn check(&self, key: &str, config: &RateLimitConfig) -> Result<RateLimitStatus, u64> {
        let Some(redis) = &self.redis else {
            return self.fallback.check(key, config).await;
        };

        let full_key = format!("ratelimit:{}:{}", config.key_prefix, key);

        let mut conn = match redis.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(
                    error = %e,
                    "Redis unavailable for rate limiting, using in-memory fallback"
                );
                return self.fallback.check(key, config).await;
            }
        };

        let (count, ttl): (i64, i64) = match redis::Script::new(FIXED_WINDOW_SCRIPT)
            .key(&full_key)
            .arg(config.window_secs)
            .invoke_async(&mut conn)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    error = %e,
                    key = %full_key,
                    "Rate limit check failed, using in-memory fallback"
                );
                return self.fallback.check(key, config).await;
            }
        };

        let reset_after = u64::try_from(ttl).unwrap_or(config.window_secs).max(1);
        let max = i64::from(config.max_requests);

        if count <= max {
            let remaining = u32::try_from(max - count).unwrap_or(0);
            debug!(key = %full_key, remaining = remaining, "Rate limit check passed");
            Ok(RateLimitStatus {
                remaining,
                reset_after,
            })
        } else {
            debug!(key = %full_key, retry_after = reset_after, "Rate limit exceeded");
            Err(reset_after)
        }
    }
}

/// Extract the client IP from the connection, or from proxy headers when trusted
///
/// With `trust_proxy`, the first valid address in `X-Forwarded-For` wins,
/// then `X-Real-IP`. Otherwise proxy headers are ignored since clients can
/// forge them.
pub fn extract_client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy: bool,
) -> String {
    if trust_proxy {
        if let Some(ip) = forwarded_ip(headers) {
            return ip.to_string();
        }
    }

    if let Some(connect_info) = connect_info {
        return connect_info.0.ip().to_string();
    }

    warn!("Could not determine client IP for rate limiting");
    "unknown".to_string()
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let from_forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .split(',')
                .find_map(|ip| ip.trim().parse::<IpAddr>().ok())
        });

    from_forwarded_for.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
    })
}

/// State for one rate-limited route (or the global API limit)
#[derive(Clone)]
pub struct RouteRateLimit {
    pub limiter: RateLimiter,
    pub config: RateLimitConfig,
    /// When false the middleware passes every request through
    pub enabled: bool,
    /// Read the client IP from proxy headers
    pub trust_proxy: bool,
}

impl RouteRateLimit {
    pub fn new(limiter: RateLimiter, config: RateLimitConfig, enabled: bool, trust_proxy: bool) -> Self {
        Self {
            limiter,
            config,
            enabled,
            trust_proxy,
        }
    }
}

/// Fixed-window rate limiting middleware
///
/// Allowed responses carry `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
/// `X-RateLimit-Reset`; rejected requests get 429 with `Retry-After`.
pub async fn rate_limit(
    State(state): State<RouteRateLimit>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.enabled {
        return next.run(request).await;
    }

    let client_ip = extract_client_ip(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
        state.trust_proxy,
    );

    match state.limiter.check(&client_ip, &state.config).await {
        Ok(status) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(
                "X-RateLimit-Limit",
                HeaderValue::from(state.config.max_requests),
            );
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(status.remaining));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(status.reset_after));
            response
        }
        Err(retry_after) => {
            warn!(
                ip = %client_ip,
                bucket = %state.config.key_prefix,
                retry_after = retry_after,
                "Rate limit exceeded"
            );
            ApiError::RateLimited { retry_after }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use rstest::rstest;

    fn peer() -> ConnectInfo<SocketAddr> {
        ConnectInfo("192.0.2.7:51000".parse().unwrap())
    }

    #[test]
    fn test_extract_client_ip_uses_peer_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));

        let ip = extract_client_ip(&headers, Some(&peer()), false);
        assert_eq!(ip, "192.0.2.7");
    }

    #[test]
    fn test_extract_client_ip_from_x_forwarded_for_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 10.0.0.1"),
        );

        let ip = extract_client_ip(&headers, Some(&peer()), true);
        assert_eq!(ip, "203.0.113.1");
    }

    #[test]
    fn test_extract_client_ip_from_x_real_ip_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.42"));

        let ip = extract_client_ip(&headers, None, true);
        assert_eq!(ip, "198.51.100.42");
    }

    #[test]
    fn test_extract_client_ip_skips_invalid_forwarded_entries() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("not-an-ip, 203.0.113.9"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.42"));

        let ip = extract_client_ip(&headers, None, true);
        assert_eq!(ip, "203.0.113.9");
    }

    #[test]
    fn test_extract_client_ip_unknown_without_peer() {
        let ip = extract_client_ip(&HeaderMap::new(), None, false);
        assert_eq!(ip, "unknown");
    }

    #[rstest]
    #[case(RateLimitConfig::api(), "api", 300, 900)]
    #[case(RateLimitConfig::login(), "login", 10, 900)]
    #[case(RateLimitConfig::register(), "register", 5, 3600)]
    #[case(RateLimitConfig::password(), "password", 5, 900)]
    #[case(RateLimitConfig::error_report(), "error_report", 30, 60)]
    fn test_default_buckets(
        #[case] config: RateLimitConfig,
        #[case] prefix: &str,
        #[case] max: u32,
        #[case] window: u64,
    ) {
        assert_eq!(config.key_prefix, prefix);
        assert_eq!(config.max_requests, max);
        assert_eq!(config.window_secs, window);
    }

    #[test]
    fn test_secs_until_reset_rounds_up() {
        let window = Duration::from_secs(60);
        assert_eq!(secs_until_reset(window, Duration::ZERO), 60);
        assert_eq!(secs_until_reset(window, Duration::from_millis(500)), 60);
        assert_eq!(secs_until_reset(window, Duration::from_secs(59)), 1);
        assert_eq!(secs_until_reset(window, Duration::from_secs(90)), 1);
    }

    #[test]
    fn test_entry_allows_then_blocks() {
        let start = Instant::now();
        let mut entry = RateLimitEntry::new(start, Duration::from_secs(60));

        assert_eq!(entry.check_and_record(3, start).unwrap().remaining, 2);
        assert_eq!(entry.check_and_record(3, start).unwrap().remaining, 1);
        assert_eq!(entry.check_and_record(3, start).unwrap().remaining, 0);

        let retry_after = entry
            .check_and_record(3, start + Duration::from_secs(20))
            .unwrap_err();
        assert_eq!(retry_after, 40);
    }

    #[test]
    fn test_entry_resets_after_window() {
        let start = Instant::now();
        let window = Duration::from_secs(60);
        let mut entry = RateLimitEntry::new(start, window);

        entry.check_and_record(1, start).unwrap();
        assert!(entry.check_and_record(1, start).is_err());

        let later = start + window;
        let status = entry.check_and_record(1, later).unwrap();
        assert_eq!(status.remaining, 0);
        assert_eq!(status.reset_after, 60);
        assert_eq!(entry.window_start, later);
    }

    #[test]
    fn test_entry_window_starts_at_first_request() {
        let start = Instant::now();
        let mut entry = RateLimitEntry::new(start, Duration::from_secs(10));

        let status = entry
            .check_and_record(5, start + Duration::from_secs(4))
            .unwrap();
        assert_eq!(status.reset_after, 6);
    }

    #[tokio::test]
    async fn test_in_memory_rate_limiter_allows_within_limit() {
        let limiter = InMemoryRateLimiter::new();
        let config = RateLimitConfig::new("test", 3, 60);

        assert_eq!(limiter.check("client1", &config).await.unwrap().remaining, 2);
        assert_eq!(limiter.check("client1", &config).await.unwrap().remaining, 1);
        assert_eq!(limiter.check("client1", &config).await.unwrap().remaining, 0);
    }

    #[tokio::test]
    async fn test_in_memory_rate_limiter_blocks_over_limit() {
        let limiter = InMemoryRateLimiter::new();
        let config = RateLimitConfig::new("test", 2, 60);

        let _ = limiter.check("client1", &config).await;
        let _ = limiter.check("client1", &config).await;

        let retry_after = limiter.check("client1", &config).await.unwrap_err();
        assert!(retry_after > 0);
        assert!(retry_after <= 60);
    }

    #[tokio::test]
    async fn test_in_memory_rate_limiter_different_clients() {
        let limiter = InMemoryRateLimiter::new();
        let config = RateLimitConfig::new("test", 1, 60);

        assert!(limiter.check("client1", &config).await.is_ok());
        assert!(limiter.check("client2", &config).await.is_ok());
        assert!(limiter.check("client1", &config).await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_rate_limiter_different_buckets() {
        let limiter = InMemoryRateLimiter::new();
        let login = RateLimitConfig::new("login", 1, 60);
        let register = RateLimitConfig::new("register", 1, 60);

        assert!(limiter.check("client1", &login).await.is_ok());
        assert!(limiter.check("client1", &register).await.is_ok());
        assert!(limiter.check("client1", &login).await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_rate_limiter_resets_after_window() {
        let limiter = InMemoryRateLimiter::new();
        let config = RateLimitConfig::new("test", 1, 30);
        let start = Instant::now();

        assert!(limiter.check_at("client1", &config, start).await.is_ok());
        assert!(limiter.check_at("client1", &config, start).await.is_err());

        let later = start + Duration::from_secs(30);
        assert!(limiter.check_at("client1", &config, later).await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_expired_entries() {
        let limiter = InMemoryRateLimiter::new();
        let short = RateLimitConfig::new("short", 5, 10);
        let long = RateLimitConfig::new("long", 5, 3600);
        let start = Instant::now();

        limiter.check_at("client1", &short, start).await.unwrap();
        limiter.check_at("client1", &long, start).await.unwrap();
        assert_eq!(limiter.entry_count().await, 2);

        let removed = limiter.purge_expired(start + Duration::from_secs(11)).await;
        assert_eq!(removed, 1);
        assert_eq!(limiter.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_rate_limiter_without_redis_uses_memory() {
        let limiter = RateLimiter::in_memory();
        let config = RateLimitConfig::new("test", 1, 60);

        assert!(!limiter.is_distributed());
        assert!(limiter.check("client1", &config).await.is_ok());
        assert!(limiter.check("client1", &config).await.is_err());
    }

    #[tokio::test]
    async fn test_rate_limiter_falls_back_when_redis_unreachable() {
        // Nothing listens on port 1
        let client = redis::Client::open("redis://127.0.0.1:1").unwrap();
        let limiter = RateLimiter::new(Some(client));
        let config = RateLimitConfig::new("test", 1, 60);

        assert!(limiter.is_distributed());
        assert!(limiter.check("client1", &config).await.is_ok());
        assert!(limiter.check("client1", &config).await.is_err());
    }
}
