pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod server;

use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};
use crate::metrics::MetricsService;
use crate::rate_limit::RateLimiter;
use crate::server::AppState;
use std::sync::Arc;
use tracing::info;

/// Build the shared limiter from configuration
pub fn build_limiter(config: &LimiterConfig) -> Result<Arc<RateLimiter>> {
    config.validate()?;
    let limiter = RateLimiter::from_config(config)?;

    for (category, policy) in &config.limits {
        info!(
            category = %category,
            rate_per_second = policy.rate_per_second,
            burst = policy.burst,
            "Policy override applied"
        );
    }

    Ok(Arc::new(limiter))
}

/// Initialize the stats server
pub async fn init_server(config: LimiterConfig) -> Result<()> {
    let limiter = build_limiter(&config)?;

    let metrics = if config.metrics {
        Some(MetricsService::new()?)
    } else {
        None
    };

    let app = server::router(AppState::new(limiter, metrics));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(LimiterError::Io)?;

    info!("Stats server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| LimiterError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

/// Initialize tracing/logging
///
/// Set `RATEKEEPER_LOG_FORMAT=json` for JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ratekeeper=info,tower_http=info".into());

    if std::env::var("RATEKEEPER_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}
