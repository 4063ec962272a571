//! Rate limiting middleware
//!
//! Admits each request through the governor, answers 429 when the key is
//! over its limit, and settles the outcome once the handler has produced a
//! status.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;

use crate::{
    error::AppError,
    ratelimit::{Decision, RateLimitInfo, RequestMeta},
    AppState,
};

/// Caller identity placed in request extensions by an upstream auth layer.
/// The limiter reads the user id out of it via the configured dotted path.
#[derive(Debug, Clone)]
pub struct Identity(pub Value);

/// Collect what the key generator needs from the request
pub fn request_meta(request: &Request) -> RequestMeta {
    RequestMeta {
        method: request.method().clone(),
        path: request.uri().path().to_string(),
        headers: request.headers().clone(),
        remote_addr: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip()),
        identity: request
            .extensions()
            .get::<Identity>()
            .map(|identity| identity.0.clone()),
    }
}

fn insert_headers(response: &mut Response, headers: Vec<(HeaderName, HeaderValue)>) {
    let target = response.headers_mut();
    for (name, value) in headers {
        target.insert(name, value);
    }
}

/// Build a 429 Too Many Requests response with rate limit headers
pub fn rate_limit_exceeded_response(info: &RateLimitInfo) -> Response {
    let mut response = AppError::RateLimitExceeded {
        message: "Too many requests. Please slow down.".to_string(),
        limit: info.limit as i64,
        remaining: info.remaining as i64,
        reset_at: chrono::DateTime::from_timestamp(info.reset_at as i64, 0)
            .map(|dt| dt.to_rfc3339()),
    }
    .into_response();

    insert_headers(&mut response, info.headers(true));
    response
}

/// Rate limiting middleware
///
/// Adds rate limit headers to every counted response.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let meta = request_meta(&request);

    match state.limiter.admit(&meta).await {
        Decision::Bypassed => next.run(request).await,
        Decision::Rejected(info) => {
            tracing::warn!(
                method = %meta.method,
                path = %meta.path,
                limit = info.limit,
                limiter = info.limiter.as_str(),
                "Rate limit exceeded"
            );
            rate_limit_exceeded_response(&info)
        }
        Decision::Allowed(permit) => {
            let headers = permit.info().headers(false);
            let mut response = next.run(request).await;
            state
                .limiter
                .record_outcome(permit, response.status().as_u16())
                .await;
            insert_headers(&mut response, headers);
            response
        }
    }
}
