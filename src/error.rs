//! Error types for the governance layer
//!
//! Cache and limiter failures each get their own enum. `AppError` is the
//! HTTP-facing error used by the middleware and routes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Returns true when a Redis error means the backend could not be reached,
/// as opposed to the backend rejecting the command.
pub fn is_unavailable(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
}

/// Cache subsystem errors
///
/// A missing key is not an error; lookups return `Option`/`bool` instead.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Encoding failure: {0}")]
    Encoding(String),

    #[error("Regeneration failed: {0}")]
    Regeneration(anyhow::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if is_unavailable(&e) {
            CacheError::BackendUnavailable(e.to_string())
        } else {
            CacheError::Backend(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Encoding(e.to_string())
    }
}

/// Rate limiter errors
///
/// An exceeded limit is a normal decision, never an error.
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("Limiter backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Limiter backend error: {0}")]
    Backend(String),

    #[error("Invalid limiter configuration: {0}")]
    InvalidConfig(String),
}

impl From<redis::RedisError> for LimiterError {
    fn from(e: redis::RedisError) -> Self {
        if is_unavailable(&e) {
            LimiterError::BackendUnavailable(e.to_string())
        } else {
            LimiterError::Backend(e.to_string())
        }
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Application-level errors surfaced over HTTP
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded {
        message: String,
        limit: i64,
        remaining: i64,
        reset_at: Option<String>,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

/// Additional error details for rate limiting
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            AppError::RateLimitExceeded {
                message,
                limit,
                remaining,
                reset_at,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMIT_EXCEEDED",
                message.clone(),
                Some(ErrorDetails {
                    limit: Some(*limit),
                    remaining: Some(*remaining),
                    reset_at: reset_at.clone(),
                }),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            AppError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                msg.clone(),
                None,
            ),
            AppError::Cache(CacheError::InvalidArgument(msg)) => (
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                msg.clone(),
                None,
            ),
            AppError::Cache(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CACHE_ERROR",
                "Cache service error".to_string(),
                None,
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error".to_string(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;
