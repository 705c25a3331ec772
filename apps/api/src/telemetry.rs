//! Tracing subscriber setup

use peakself_shared_config::{CommonConfig, LogFormat};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` / `LOG_LEVEL` does not parse
const DEFAULT_FILTER: &str = "peakself_api=debug,tower_http=debug";

/// Install the global subscriber, human-readable or JSON
pub fn init_tracing(common: &CommonConfig) {
    let filter = EnvFilter::try_new(&common.log_level).unwrap_or_else(|_| DEFAULT_FILTER.into());

    let registry = tracing_subscriber::registry().with(filter);

    match common.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
