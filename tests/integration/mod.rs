//! Integration test modules

pub mod cache_service;
