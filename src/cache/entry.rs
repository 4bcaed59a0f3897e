//! Cache Entry Module
//!
//! Defines a single entry held by the in-memory backend, with TTL support.

use chrono::{DateTime, TimeDelta, Utc};

// == Cache Entry ==
/// A stored value with its metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Serialized value bytes
    pub value: Vec<u8>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiration timestamp, None = no expiration
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry with optional TTL.
    ///
    /// # Arguments
    /// * `value` - The serialized value
    /// * `ttl_seconds` - Optional TTL in seconds
    /// * `now` - Current time from the backend's clock
    ///
    /// A TTL reaching past the representable date range never expires.
    pub fn new(value: Vec<u8>, ttl_seconds: Option<u64>, now: DateTime<Utc>) -> Self {
        let expires_at = ttl_seconds.and_then(|ttl| {
            i64::try_from(ttl)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|delta| now.checked_add_signed(delta))
        });

        Self {
            value,
            created_at: now,
            expires_at,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once `now` reaches the expiration time, so a TTL of
    /// `n` seconds is unreadable exactly `n` seconds after the write.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns remaining TTL in whole seconds, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(0)` if the entry has expired
    /// - `Some(remaining_seconds)` if the entry has TTL and hasn't expired
    /// - `None` if the entry has no TTL (never expires)
    pub fn ttl_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        self.expires_at
            .map(|expires| (expires - now).num_seconds().max(0) as u64)
    }

    /// Size of the stored value in bytes.
    pub fn size(&self) -> u64 {
        self.value.len() as u64
    }
}
