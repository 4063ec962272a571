//! Cache types and TTL selection
//!
//! A TTL is picked in three tiers: a positive custom override, then the
//! configured TTL for the cache type, then the global default.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Global fallback TTL in seconds
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Semantic cache tags, each mapped to a TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheType {
    ShortTerm,
    MediumTerm,
    LongTerm,
    UserSession,
    LoadDetails,
    RouteOptimization,
    DriverLocation,
    MarketRates,
    Analytics,
    ReferenceData,
}

impl CacheType {
    pub const ALL: [CacheType; 10] = [
        CacheType::ShortTerm,
        CacheType::MediumTerm,
        CacheType::LongTerm,
        CacheType::UserSession,
        CacheType::LoadDetails,
        CacheType::RouteOptimization,
        CacheType::DriverLocation,
        CacheType::MarketRates,
        CacheType::Analytics,
        CacheType::ReferenceData,
    ];

    /// Canonical tag, e.g. `SHORT_TERM`
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::ShortTerm => "SHORT_TERM",
            CacheType::MediumTerm => "MEDIUM_TERM",
            CacheType::LongTerm => "LONG_TERM",
            CacheType::UserSession => "USER_SESSION",
            CacheType::LoadDetails => "LOAD_DETAILS",
            CacheType::RouteOptimization => "ROUTE_OPTIMIZATION",
            CacheType::DriverLocation => "DRIVER_LOCATION",
            CacheType::MarketRates => "MARKET_RATES",
            CacheType::Analytics => "ANALYTICS",
            CacheType::ReferenceData => "REFERENCE_DATA",
        }
    }

    /// Built-in TTL in seconds
    pub fn default_ttl(&self) -> u64 {
        match self {
            CacheType::ShortTerm => 300,
            CacheType::MediumTerm => 3600,
            CacheType::LongTerm => 86_400,
            CacheType::UserSession => 1800,
            CacheType::LoadDetails => 600,
            CacheType::RouteOptimization => 3600,
            CacheType::DriverLocation => 60,
            CacheType::MarketRates => 900,
            CacheType::Analytics => 21_600,
            CacheType::ReferenceData => 86_400,
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheType {
    type Err = CacheError;

    /// Accepts `SHORT_TERM`, `short_term` and `short-term`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        CacheType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| CacheError::InvalidArgument(format!("unknown cache type: {:?}", s)))
    }
}

/// Immutable cache-type → TTL table
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    table: HashMap<CacheType, u64>,
    default_ttl: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::with_overrides(DEFAULT_TTL_SECONDS, HashMap::new())
    }
}

impl TtlPolicy {
    /// Build from an explicit table. Types missing from the table resolve
    /// to `default_ttl`.
    pub fn new(table: HashMap<CacheType, u64>, default_ttl: u64) -> Self {
        Self { table, default_ttl }
    }

    /// Built-in TTLs with per-type overrides applied on top
    pub fn with_overrides(default_ttl: u64, overrides: HashMap<CacheType, u64>) -> Self {
        let mut table: HashMap<CacheType, u64> = CacheType::ALL
            .iter()
            .map(|t| (*t, t.default_ttl()))
            .collect();
        table.extend(overrides);
        Self { table, default_ttl }
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    /// Resolve the TTL in seconds. A custom TTL of zero or less is ignored.
    pub fn resolve(&self, cache_type: Option<CacheType>, custom_ttl: Option<i64>) -> u64 {
        if let Some(ttl) = custom_ttl.filter(|t| *t > 0) {
            return ttl as u64;
        }

        cache_type
            .and_then(|t| self.table.get(&t).copied())
            .unwrap_or(self.default_ttl)
    }
}
