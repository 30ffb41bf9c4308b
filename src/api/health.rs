//! `GET /api/v1/health` (§6.1): 200 when the L2 cache and DB are reachable
//! and at least one upstream breaker is not permanently open; 503 listing
//! the failed components otherwise. Never requires authentication.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::api::dto::HealthResponse;
use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let mut failed = Vec::new();

    if !state.cache.l2_reachable().await {
        failed.push("l2_cache");
    }
    if state.repo.health_check().await.is_err() {
        failed.push("database");
    }
    if !state.rate_engine.any_breaker_closed() {
        failed.push("upstream_breakers");
    }

    let status = if failed.is_empty() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = HealthResponse {
        status: if failed.is_empty() { "ok" } else { "degraded" },
        failed_components: failed,
    };
    (status, Json(body))
}
