//! Health check endpoints
//!
//! Provides endpoints for monitoring and container orchestration:
//! - `/health` - Full health check with dependency status
//! - `/health/ready` - Readiness probe
//! - `/health/live` - Liveness probe
//!
//! Losing Redis degrades the service rather than taking it down, since the
//! cache and limiter both keep working from process memory.

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::ratelimit::LimiterKind;
use crate::AppState;

/// Health status enum
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual dependency check result
#[derive(Debug, Serialize)]
pub struct DependencyCheck {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rate limiter state
#[derive(Debug, Serialize)]
pub struct LimiterCheck {
    pub status: HealthStatus,
    /// Limiter the next request goes to
    pub mode: LimiterKind,
    pub durable_configured: bool,
}

/// Dependency checks collection
#[derive(Debug, Serialize)]
pub struct DependencyChecks {
    pub redis: DependencyCheck,
    pub rate_limiter: LimiterCheck,
}

/// Full health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: String,
    pub checks: DependencyChecks,
}

/// Simple health response for liveness/readiness
#[derive(Debug, Serialize)]
pub struct SimpleHealthResponse {
    pub status: HealthStatus,
}

/// Ping Redis through the cache backend
async fn check_redis(state: &AppState) -> DependencyCheck {
    let start = Instant::now();

    if state.redis.is_none() {
        return DependencyCheck {
            status: HealthStatus::Degraded,
            latency_ms: 0,
            error: Some("not connected, using in-memory backend".to_string()),
        };
    }

    match state.cache.store().backend().ping().await {
        Ok(()) => DependencyCheck {
            status: HealthStatus::Healthy,
            latency_ms: start.elapsed().as_millis() as u64,
            error: None,
        },
        Err(e) => DependencyCheck {
            status: HealthStatus::Unhealthy,
            latency_ms: start.elapsed().as_millis() as u64,
            error: Some(e.to_string()),
        },
    }
}

fn check_limiter(state: &AppState) -> LimiterCheck {
    let mode = state.limiter.mode();
    LimiterCheck {
        status: match mode {
            LimiterKind::Durable => HealthStatus::Healthy,
            LimiterKind::Memory => HealthStatus::Degraded,
        },
        mode,
        durable_configured: state.limiter.has_durable(),
    }
}

/// Full health check endpoint
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let redis_check = check_redis(&state).await;
    let limiter_check = check_limiter(&state);

    let overall_status =
        if redis_check.status == HealthStatus::Healthy && limiter_check.status == HealthStatus::Healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

    let response = HealthResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks: DependencyChecks {
            redis: redis_check,
            rate_limiter: limiter_check,
        },
    };

    (StatusCode::OK, Json(response))
}

/// Readiness probe endpoint
///
/// Returns 503 only when a connected Redis stops answering.
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<SimpleHealthResponse>) {
    let redis_check = check_redis(&state).await;

    if redis_check.status == HealthStatus::Unhealthy {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SimpleHealthResponse {
                status: HealthStatus::Unhealthy,
            }),
        );
    }

    (
        StatusCode::OK,
        Json(SimpleHealthResponse {
            status: redis_check.status,
        }),
    )
}

/// Liveness probe endpoint
pub async fn liveness_check() -> (StatusCode, Json<SimpleHealthResponse>) {
    (
        StatusCode::OK,
        Json(SimpleHealthResponse {
            status: HealthStatus::Healthy,
        }),
    )
}
