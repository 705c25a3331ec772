use std::net::SocketAddr;
use std::time::Duration;

use peakself_api::{
    build_router, config::Config, db, repositories::SessionRepository,
    services::session_sweeper::spawn_session_sweeper, telemetry, AppState,
};
use peakself_shared_config::RedisConfig;

/// Connect to Redis when configured; `None` falls back to in-memory rate limits
async fn connect_redis(config: &RedisConfig) -> Option<redis::Client> {
    let url = config.connection_url()?;

    let client = match redis::Client::open(url.as_str()) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Redis client creation failed, using in-memory rate limiting");
            return None;
        }
    };

    let timeout = Duration::from_secs(config.connect_timeout_secs);
    let ping = async {
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await
    };

    match tokio::time::timeout(timeout, ping).await {
        Ok(Ok(_)) => {
            tracing::info!("Redis connected for rate limiting");
            Some(client)
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Redis connection failed, using in-memory rate limiting");
            None
        }
        Err(_) => {
            tracing::warn!("Redis connection timed out, using in-memory rate limiting");
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;
    telemetry::init_tracing(&config.common);

    tracing::info!(
        environment = %config.environment(),
        "Starting PeakSelf API server on port {}",
        config.port
    );

    let pool = db::connect(config.database()).await?;

    if config.run_migrations {
        db::run_migrations(&pool).await?;
    } else {
        tracing::info!("RUN_MIGRATIONS not set, skipping migrations (use peakself-migrate)");
    }

    let redis_client = connect_redis(config.redis()).await;
    if !config.rate_limit.enabled {
        tracing::warn!("Rate limiting DISABLED by RATE_LIMIT_ENABLED=false");
    }

    if config.has_google_oauth() {
        tracing::info!("Google sign-in enabled");
    }

    let _sweeper = spawn_session_sweeper(
        SessionRepository::new(pool.clone()),
        config.session_cleanup_interval_secs,
    );

    let port = config.port;
    let state = AppState::new(config, pool, redis_client)?;
    let app = build_router(state);

    // Run the server with ConnectInfo to capture client addresses
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
