//! Response DTOs for the cache admin API
//!
//! Defines the structure of outgoing HTTP response bodies that are not already
//! reports produced by the cache service.

use serde::Serialize;

use crate::cache::{KeyInfo, StoreHealth};

/// Plain acknowledgement, e.g. for POST /v1/cache/clear
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Response body for POST /v1/cache/invalidate
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub success: bool,
    pub keys_affected: u64,
    pub message: String,
}

impl InvalidateResponse {
    pub fn new(pattern: &str, keys_affected: u64) -> Self {
        Self {
            success: true,
            keys_affected,
            message: format!(
                "Invalidated {} keys matching pattern '{}'",
                keys_affected, pattern
            ),
        }
    }
}

/// Response body for GET /v1/cache/keys
#[derive(Debug, Clone, Serialize)]
pub struct KeyListResponse {
    pub keys: Vec<KeyInfo>,
    pub count: usize,
    pub pattern: String,
}

impl KeyListResponse {
    pub fn new(pattern: impl Into<String>, keys: Vec<KeyInfo>) -> Self {
        Self {
            count: keys.len(),
            keys,
            pattern: pattern.into(),
        }
    }
}

/// Response body for PUT /v1/cache/keys
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for DELETE /v1/cache/keys/:key
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for POST /v1/cache/maintenance
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceResponse {
    pub message: String,
    pub status: String,
}

impl MaintenanceResponse {
    pub fn scheduled() -> Self {
        Self {
            message: "Cache maintenance scheduled".to_string(),
            status: "scheduled".to_string(),
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `healthy` when the cache backend answers, `degraded` otherwise
    pub status: String,
    pub components: HealthComponents,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthComponents {
    pub cache: StoreHealth,
}

impl HealthResponse {
    /// The service stays up without its cache, so a disconnected backend only
    /// degrades health.
    pub fn from_store(cache: StoreHealth, timestamp: chrono::DateTime<chrono::Utc>) -> Self {
        let status = if cache.status == "connected" {
            "healthy"
        } else {
            "degraded"
        };
        Self {
            status: status.to_string(),
            components: HealthComponents { cache },
            timestamp: timestamp.to_rfc3339(),
        }
    }
}
