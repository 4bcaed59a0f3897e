//! Error types for the caching layer
//!
//! Provides unified error handling using thiserror. `StoreError` stays inside the
//! caching core; `CacheError` is what the administrative surface reports.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Store Error Enum ==
/// Failures raised while talking to the backing store.
///
/// None of these ever reach an end caller of a cached producer: the store
/// degrades them to "absent" or `false`, and the cache-aside wrapper treats them
/// as a miss unless fail-open is disabled.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Network or connectivity fault talking to the backend
    #[error("Store unavailable: {0}")]
    Transient(String),

    /// The circuit breaker is open and refused the call
    #[error("Circuit breaker open, retry in {:.1}s", .remaining.as_secs_f64())]
    BreakerOpen {
        /// Cooldown left before a trial call is allowed
        remaining: Duration,
    },

    /// A value could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// A bypass scope is active; the store is treated as unavailable
    #[error("Cache bypassed")]
    Bypassed,

    /// The backend answered but refused the command (e.g. `WRONGTYPE`)
    #[error("Store rejected command: {0}")]
    Rejected(String),
}

impl StoreError {
    /// True for the fail-fast breaker signal.
    pub fn is_breaker_open(&self) -> bool {
        matches!(self, StoreError::BreakerOpen { .. })
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            StoreError::Transient(err.to_string())
        } else {
            StoreError::Rejected(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

// == Cache Error Enum ==
/// Error type for the administrative cache surface.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Backing store is down, bypassed or behind an open breaker
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// Category tag without a strategy mapping
    #[error("Unknown cache category: {0}")]
    UnknownCategory(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(msg) | StoreError::Rejected(msg) => CacheError::Internal(msg),
            other => CacheError::Unavailable(other.to_string()),
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) | CacheError::UnknownCategory(_) => {
                StatusCode::BAD_REQUEST
            }
            CacheError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the administrative surface.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_maps_to_unavailable() {
        let err: CacheError = StoreError::Transient("connection refused".into()).into();
        assert!(matches!(err, CacheError::Unavailable(_)));

        let err: CacheError = StoreError::Bypassed.into();
        assert!(matches!(err, CacheError::Unavailable(_)));
    }

    #[test]
    fn test_serialization_error_maps_to_internal() {
        let err: CacheError = StoreError::Serialization("bad bytes".into()).into();
        assert!(matches!(err, CacheError::Internal(_)));
    }

    #[test]
    fn test_breaker_open_message_carries_cooldown() {
        let err = StoreError::BreakerOpen {
            remaining: Duration::from_millis(12_500),
        };
        assert!(err.is_breaker_open());
        assert_eq!(err.to_string(), "Circuit breaker open, retry in 12.5s");
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (CacheError::NotFound("k".into()), StatusCode::NOT_FOUND),
            (CacheError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (CacheError::UnknownCategory("x".into()), StatusCode::BAD_REQUEST),
            (CacheError::Unavailable("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (CacheError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
