use crate::error::{LimiterError, Result};
use crate::rate_limit::RateLimitCategory;
use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the Prometheus recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            LimiterError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "ratekeeper_admissions_granted_total",
            "Total number of requests admitted"
        );
        describe_counter!(
            "ratekeeper_admissions_denied_total",
            "Total number of requests denied by a bucket or cooldown"
        );
        describe_counter!(
            "ratekeeper_cooldowns_triggered_total",
            "Total number of cooldowns triggered"
        );
        describe_gauge!(
            "ratekeeper_available_tokens",
            "Tokens available in a category's bucket at the last scrape"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    let metrics = service.render();
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        Body::from(metrics),
    )
        .into_response()
}

/// Record an admission decision
pub fn record_admission(category: RateLimitCategory, granted: bool) {
    let labels = [("category", category.as_str())];

    if granted {
        counter!("ratekeeper_admissions_granted_total", &labels).increment(1);
    } else {
        counter!("ratekeeper_admissions_denied_total", &labels).increment(1);
    }
}

/// Record a cooldown being applied
pub fn record_cooldown(category: RateLimitCategory) {
    let labels = [("category", category.as_str())];
    counter!("ratekeeper_cooldowns_triggered_total", &labels).increment(1);
}

/// Record the token balance of a category
pub fn record_available_tokens(category: RateLimitCategory, tokens: f64) {
    let labels = [("category", category.as_str())];
    gauge!("ratekeeper_available_tokens", &labels).set(tokens);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_service_creation() {
        // Only one recorder can be installed per process
        match MetricsService::new() {
            Ok(service) => {
                record_admission(RateLimitCategory::Webhook, true);
                assert!(service.render().contains("ratekeeper_admissions_granted_total"));
            }
            Err(e) => {
                assert!(e.to_string().contains("recorder") || e.to_string().contains("install"));
            }
        }
    }

    #[test]
    fn test_record_functions_dont_panic() {
        record_admission(RateLimitCategory::Webhook, true);
        record_admission(RateLimitCategory::Gateway, false);
        record_cooldown(RateLimitCategory::MessageSend);
        record_available_tokens(RateLimitCategory::FileDownload, 2.5);
    }
}
