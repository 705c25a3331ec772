//! Health check service for verifying external dependencies
//!
//! Readiness depends on:
//! - PostgreSQL database (required)
//! - Redis (only when configured)

use serde::Serialize;
use sqlx::PgPool;
use std::time::{Duration, Instant};

/// Status of an individual service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Service is healthy and responding
    Healthy,
    /// Service is unhealthy or unreachable
    Unhealthy,
    /// Service check was skipped (e.g., optional service not configured)
    Skipped,
}

/// Result of a single service health check
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    /// Name of the service
    pub name: &'static str,
    /// Current status
    pub status: ServiceStatus,
    /// Response time in milliseconds (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// Error message if unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional details about the service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServiceHealth {
    /// Create a healthy service result
    pub fn healthy(name: &'static str, response_time: Duration) -> Self {
        Self {
            name,
            status: ServiceStatus::Healthy,
            response_time_ms: Some(response_time.as_millis() as u64),
            error: None,
            details: None,
        }
    }

    /// Create an unhealthy service result
    pub fn unhealthy(name: &'static str, error: impl Into<String>) -> Self {
        Self {
            name,
            status: ServiceStatus::Unhealthy,
            response_time_ms: None,
            error: Some(error.into()),
            details: None,
        }
    }

    /// Create an unhealthy service result with response time
    pub fn unhealthy_with_time(
        name: &'static str,
        error: impl Into<String>,
        response_time: Duration,
    ) -> Self {
        Self {
            name,
            status: ServiceStatus::Unhealthy,
            response_time_ms: Some(response_time.as_millis() as u64),
            error: Some(error.into()),
            details: None,
        }
    }

    /// Create a skipped service result (for optional services not configured)
    pub fn skipped(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            status: ServiceStatus::Skipped,
            response_time_ms: None,
            error: None,
            details: Some(serde_json::json!({ "reason": reason.into() })),
        }
    }
}

/// Aggregated health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResponse {
    /// Overall status (healthy only if all required services are healthy)
    pub status: ServiceStatus,
    /// Individual service health results
    pub services: Vec<ServiceHealth>,
    /// Total time to complete all health checks
    pub total_time_ms: u64,
    /// API version
    pub version: &'static str,
}

impl HealthCheckResponse {
    /// Create a new health check response from individual service results
    pub fn new(services: Vec<ServiceHealth>, total_time: Duration) -> Self {
        let status = if services
            .iter()
            .all(|s| s.status == ServiceStatus::Healthy || s.status == ServiceStatus::Skipped)
        {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Unhealthy
        };

        Self {
            status,
            services,
            total_time_ms: total_time.as_millis() as u64,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Check if overall health is good
    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }
}

/// Timeout applied to each dependency check
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health check service for verifying external dependencies
#[derive(Clone)]
pub struct HealthService {
    pool: PgPool,
    redis: Option<redis::Client>,
}

impl HealthService {
    /// Create a new health service; Redis is skipped when not configured
    pub fn new(pool: PgPool, redis: Option<redis::Client>) -> Self {
        Self { pool, redis }
    }

    /// Check PostgreSQL connectivity through the shared pool
    pub async fn check_database(&self) -> ServiceHealth {
        let start = Instant::now();

        let query = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool);
        match tokio::time::timeout(CHECK_TIMEOUT, query).await {
            Ok(Ok(_)) => ServiceHealth::healthy("database", start.elapsed()),
            Ok(Err(e)) => ServiceHealth::unhealthy_with_time(
                "database",
                format!("Query failed: {}", e),
                start.elapsed(),
            ),
            Err(_) => ServiceHealth::unhealthy_with_time(
                "database",
                "Query timed out",
                start.elapsed(),
            ),
        }
    }

    /// Check Redis connectivity with PING
    pub async fn check_redis(&self) -> ServiceHealth {
        let Some(client) = &self.redis else {
            return ServiceHealth::skipped("redis", "REDIS_URL not configured");
        };

        let start = Instant::now();

        let ping = async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            redis::cmd("PING").query_async::<_, String>(&mut conn).await
        };

        match tokio::time::timeout(CHECK_TIMEOUT, ping).await {
            Ok(Ok(response)) if response == "PONG" => {
                ServiceHealth::healthy("redis", start.elapsed())
            }
            Ok(Ok(response)) => ServiceHealth::unhealthy_with_time(
                "redis",
                format!("Unexpected PING response: {}", response),
                start.elapsed(),
            ),
            Ok(Err(e)) => ServiceHealth::unhealthy_with_time(
                "redis",
                format!("PING failed: {}", e),
                start.elapsed(),
            ),
            Err(_) => ServiceHealth::unhealthy_with_time("redis", "PING timed out", start.elapsed()),
        }
    }

    /// Run all health checks in parallel
    pub async fn check_all(&self) -> HealthCheckResponse {
        let start = Instant::now();

        let (db_health, redis_health) = tokio::join!(self.check_database(), self.check_redis());

        HealthCheckResponse::new(vec![db_health, redis_health], start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_health_healthy() {
        let health = ServiceHealth::healthy("test", Duration::from_millis(50));
        assert_eq!(health.status, ServiceStatus::Healthy);
        assert_eq!(health.response_time_ms, Some(50));
        assert!(health.error.is_none());
    }

    #[test]
    fn test_service_health_unhealthy() {
        let health = ServiceHealth::unhealthy("test", "Connection refused");
        assert_eq!(health.status, ServiceStatus::Unhealthy);
        assert!(health.response_time_ms.is_none());
        assert_eq!(health.error, Some("Connection refused".to_string()));
    }

    #[test]
    fn test_service_health_skipped() {
        let health = ServiceHealth::skipped("test", "Not configured");
        assert_eq!(health.status, ServiceStatus::Skipped);
    }

    #[test]
    fn test_health_check_response_all_healthy() {
        let services = vec![
            ServiceHealth::healthy("db", Duration::from_millis(10)),
            ServiceHealth::healthy("redis", Duration::from_millis(5)),
        ];
        let response = HealthCheckResponse::new(services, Duration::from_millis(15));
        assert!(response.is_healthy());
        assert_eq!(response.status, ServiceStatus::Healthy);
    }

    #[test]
    fn test_health_check_response_one_unhealthy() {
        let services = vec![
            ServiceHealth::healthy("db", Duration::from_millis(10)),
            ServiceHealth::unhealthy("redis", "Connection refused"),
        ];
        let response = HealthCheckResponse::new(services, Duration::from_millis(15));
        assert!(!response.is_healthy());
        assert_eq!(response.status, ServiceStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_redis_check_skipped_when_not_configured() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/peakself_unused")
            .unwrap();
        let service = HealthService::new(pool, None);

        let health = service.check_redis().await;
        assert_eq!(health.status, ServiceStatus::Skipped);
    }

    #[tokio::test]
    async fn test_redis_check_unhealthy_when_unreachable() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/peakself_unused")
            .unwrap();
        let client = redis::Client::open("redis://127.0.0.1:1").unwrap();
        let service = HealthService::new(pool, Some(client));

        let health = service.check_redis().await;
        assert_eq!(health.status, ServiceStatus::Unhealthy);
        assert!(health.error.is_some());
    }

    #[test]
    fn test_health_check_response_with_skipped() {
        let services = vec![
            ServiceHealth::healthy("db", Duration::from_millis(10)),
            ServiceHealth::skipped("optional", "Not configured"),
        ];
        let response = HealthCheckResponse::new(services, Duration::from_millis(15));
        assert!(response.is_healthy());
    }
}
