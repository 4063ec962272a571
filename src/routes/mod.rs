//! HTTP routes
//!
//! Health probes and the metrics scrape endpoint. Only `/health` goes
//! through the rate limiter; probes and scrapes are never throttled.

pub mod health;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::{metrics::prometheus_metrics, middleware::rate_limit_middleware, AppState};

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let limited_routes = Router::new()
        .route("/health", get(health::health_check))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    let public_routes = Router::new()
        .route("/health/ready", get(health::readiness_check))
        .route("/health/live", get(health::liveness_check))
        .route("/metrics", get(prometheus_metrics));

    Router::new()
        .merge(public_routes)
        .merge(limited_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
