//! HTTP surface (C10): three versioned endpoints assembled the way the
//! reference backend merges its own public/protected router groups, with
//! auth applied via `route_layer` so `/health` stays unauthenticated.

pub mod calculate;
pub mod dto;
pub mod health;
pub mod rates;

use std::sync::Arc;

use axum::middleware as axum_mw;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::auth::authenticate_and_throttle;
use crate::middleware::logging::request_logging_simple;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let protected_routes = Router::new()
        .route("/api/v1/calculate-locate", post(calculate::calculate_post).get(calculate::calculate_get))
        .route("/api/v1/rates/:ticker", get(rates::get_rate))
        .route_layer(axum_mw::from_fn_with_state(state.clone(), authenticate_and_throttle));

    let public_routes = Router::new().route("/api/v1/health", get(health::health));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(request_logging_simple))
        .with_state(state)
}
