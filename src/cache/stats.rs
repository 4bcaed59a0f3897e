//! Cache Statistics Module
//!
//! Application-level counters for the cache service: hits, misses, writes and
//! errors since the last reset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Cache Stats ==
/// Lock-free counters shared by every request.
#[derive(Debug)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
    slow_calls: AtomicU64,
    /// Start of the current measurement window
    started_at: Mutex<DateTime<Utc>>,
}

/// Point-in-time view of [`CacheStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
    /// Producer calls slower than the configured threshold
    pub slow_calls: u64,
    /// Percentage of lookups that hit, 0 when there were none
    pub hit_rate: f64,
    pub total_requests: u64,
    pub uptime_seconds: i64,
}

impl CacheStats {
    // == Constructor ==
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            slow_calls: AtomicU64::new(0),
            started_at: Mutex::new(now),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slow_call(&self) {
        self.slow_calls.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    pub fn snapshot(&self, now: DateTime<Utc>) -> StatsSnapshot {
        let started_at = *self.started_at.lock().unwrap_or_else(|e| e.into_inner());
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        StatsSnapshot {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            slow_calls: self.slow_calls.load(Ordering::Relaxed),
            hit_rate: hit_rate(hits, misses),
            total_requests: hits + misses,
            uptime_seconds: (now - started_at).num_seconds().max(0),
        }
    }

    // == Reset ==
    /// Zeroes every counter and restarts the uptime window.
    pub fn reset(&self, now: DateTime<Utc>) {
        let mut started_at = self.started_at.lock().unwrap_or_else(|e| e.into_inner());
        for counter in [
            &self.hits,
            &self.misses,
            &self.sets,
            &self.errors,
            &self.slow_calls,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *started_at = now;
    }
}

// == Hit Rate ==
/// `hits / (hits + misses)` as a percentage, or 0.0 if no lookups were made.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}
