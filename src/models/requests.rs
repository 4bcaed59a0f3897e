//! Request DTOs for the cache admin API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;
use serde_json::Value;

use crate::cache::{Strategy, TtlPolicy, MAX_TTL_SECONDS};

/// Maximum accepted key length in bytes.
pub const MAX_KEY_LENGTH: usize = 512;

/// Request body for POST /v1/cache/invalidate
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    /// Glob pattern, e.g. `kapital:get_ticker_info:*`
    pub pattern: String,
    /// Free-text reason recorded in the log
    #[serde(default)]
    pub reason: Option<String>,
}

impl InvalidateRequest {
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.pattern.trim().is_empty() {
            return Some("Pattern cannot be empty".to_string());
        }
        None
    }
}

/// Request body for PUT /v1/cache/keys
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value
/// - `ttl`: Optional TTL in seconds, overrides `strategy`
/// - `strategy`: Optional strategy tier such as `"LONG"`
#[derive(Debug, Clone, Deserialize)]
pub struct SetKeyRequest {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
}

impl SetKeyRequest {
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        if self.key.len() > MAX_KEY_LENGTH {
            return Some(format!(
                "Key exceeds maximum length of {} characters",
                MAX_KEY_LENGTH
            ));
        }
        if self.ttl.is_some_and(|ttl| ttl > MAX_TTL_SECONDS) {
            return Some(format!(
                "TTL exceeds maximum of {} seconds",
                MAX_TTL_SECONDS
            ));
        }
        None
    }

    pub fn policy(&self) -> TtlPolicy {
        TtlPolicy {
            ttl: self.ttl,
            strategy: self.strategy,
            invalidate_at_midnight: false,
        }
    }
}

/// Query string for GET /v1/cache/keys
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysQuery {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl KeysQuery {
    pub fn pattern(&self) -> &str {
        self.pattern.as_deref().unwrap_or("*")
    }
}
