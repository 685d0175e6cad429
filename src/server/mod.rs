use crate::error::{LimiterError, Result};
use crate::metrics::{metrics_handler, record_available_tokens, MetricsService};
use crate::rate_limit::{CategoryStats, RateLimitCategory, RateLimiter, MAX_COOLDOWN};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the stats server
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub metrics: Option<MetricsService>,
}

impl AppState {
    pub fn new(limiter: Arc<RateLimiter>, metrics: Option<MetricsService>) -> Self {
        Self { limiter, metrics }
    }
}

/// Body of `POST /cooldown/:category`
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CooldownRequest {
    /// Cooldown length; the category default when omitted
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

/// Reply of `POST /cooldown/:category`
#[derive(Debug, Deserialize, Serialize)]
pub struct CooldownResponse {
    pub category: RateLimitCategory,
    pub cooldown_secs: f64,
}

/// Build the stats/admin router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(all_stats))
        .route("/stats/:category", get(category_stats))
        .route("/cooldown/:category", post(trigger_cooldown))
        .route("/reset", post(reset_all))
        .route("/reset/:category", post(reset_category))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn all_stats(
    State(state): State<AppState>,
) -> Json<BTreeMap<RateLimitCategory, CategoryStats>> {
    Json(state.limiter.all_stats())
}

async fn category_stats(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<CategoryStats>> {
    let category = category.parse::<RateLimitCategory>()?;
    Ok(Json(state.limiter.stats(category)))
}

async fn trigger_cooldown(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Json(request): Json<CooldownRequest>,
) -> Result<Json<CooldownResponse>> {
    let category = category.parse::<RateLimitCategory>()?;

    let duration = match request.duration_secs {
        Some(secs) => match Duration::try_from_secs_f64(secs) {
            Ok(duration) if duration <= MAX_COOLDOWN => Some(duration),
            _ => {
                return Err(LimiterError::InvalidRequest(format!(
                    "duration_secs must be between 0 and {}, got {}",
                    MAX_COOLDOWN.as_secs(),
                    secs
                )))
            }
        },
        None => None,
    };

    let applied = state.limiter.trigger_cooldown(category, duration);

    Ok(Json(CooldownResponse {
        category,
        cooldown_secs: applied.as_secs_f64(),
    }))
}

async fn reset_all(
    State(state): State<AppState>,
) -> Json<BTreeMap<RateLimitCategory, CategoryStats>> {
    state.limiter.reset_limits(None);
    Json(state.limiter.all_stats())
}

async fn reset_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<CategoryStats>> {
    let category = category.parse::<RateLimitCategory>()?;
    state.limiter.reset_limits(Some(category));
    info!(category = %category, "Limits reset via admin endpoint");
    Ok(Json(state.limiter.stats(category)))
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(service) => {
            // Token balances are sampled per scrape rather than on every stats read
            for (category, stats) in state.limiter.all_stats() {
                record_available_tokens(category, stats.available_tokens);
            }
            metrics_handler(State(service)).await.into_response()
        }
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
