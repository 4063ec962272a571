//! Middleware module
//!
//! Contains Tower middleware for rate limiting.

pub mod rate_limiter;

pub use rate_limiter::{rate_limit_middleware, Identity};
