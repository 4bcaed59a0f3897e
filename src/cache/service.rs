//! Cache Service Module
//!
//! Orchestrates the store, TTL policy resolution and statistics. This is the one
//! shared instance per process: constructed by the entry point and handed to
//! cache-aside wrappers and the admin surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::cache::payload::Payload;
use crate::cache::stats::{CacheStats, StatsSnapshot};
use crate::cache::store::{KeyInfo, ServerStats, Store, StoreHealth};
use crate::cache::ttl::{Category, Resolved, Strategy, TtlPolicy};
use crate::error::{CacheError, Result, StoreError};

// == Reports ==
/// Statistics snapshot plus backend health.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub application_stats: StatsSnapshot,
    pub store_stats: StoreStats,
}

/// Backend metrics, or a disconnected marker when it cannot be reached.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StoreStats {
    Connected(ServerStats),
    Disconnected { status: String },
}

/// A single raw key as seen by an operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: Value,
    pub ttl: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingReport {
    /// `connected` or `disconnected`
    pub status: String,
    pub latency_ms: Option<f64>,
}

// == Strategy Catalogue ==
#[derive(Debug, Clone, Serialize)]
pub struct StrategyCatalogue {
    pub strategies: BTreeMap<Strategy, StrategyInfo>,
    pub data_types: BTreeMap<Category, Strategy>,
    pub examples: BTreeMap<String, StrategyExample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyInfo {
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyExample {
    pub endpoint: String,
    pub strategy: Strategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalidates: Option<String>,
}

impl StrategyExample {
    fn new(endpoint: &str, strategy: Strategy) -> Self {
        let daily = strategy == Strategy::Daily;
        Self {
            endpoint: endpoint.to_string(),
            strategy,
            ttl_seconds: (!daily).then(|| strategy.ttl_seconds()),
            invalidates: daily.then(|| "midnight UTC".to_string()),
        }
    }
}

/// The fixed strategy catalogue: every tier, every category default, and a few
/// representative endpoints.
pub fn strategy_catalogue() -> StrategyCatalogue {
    let strategies = Strategy::ALL
        .iter()
        .map(|&s| {
            (
                s,
                StrategyInfo {
                    ttl_seconds: s.ttl_seconds(),
                },
            )
        })
        .collect();
    let data_types = Category::ALL.iter().map(|&c| (c, c.strategy())).collect();

    let mut examples = BTreeMap::new();
    examples.insert(
        "market_status".to_string(),
        StrategyExample::new("/v1/market/status", Strategy::Short),
    );
    examples.insert(
        "ticker_info".to_string(),
        StrategyExample::new("/v1/ticker/AAPL/info", Strategy::Long),
    );
    examples.insert(
        "financial_statements".to_string(),
        StrategyExample::new("/v1/ticker/MSFT/balance-sheet", Strategy::Daily),
    );

    StrategyCatalogue {
        strategies,
        data_types,
        examples,
    }
}

// == Cache Service ==
#[derive(Debug)]
pub struct CacheService {
    store: Arc<Store>,
    stats: CacheStats,
    /// Upper bound on keys returned by one listing
    scan_limit: usize,
}

impl CacheService {
    pub fn new(store: Arc<Store>, scan_limit: usize) -> Self {
        let stats = CacheStats::new(store.clock().now());
        Self {
            store,
            stats,
            scan_limit,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // == Get ==
    /// Counted read: `(value, hit)`. Faults count as misses.
    pub async fn get(&self, key: &str) -> (Option<Value>, bool) {
        match self.lookup(key).await {
            Ok(Some(value)) => (Some(value), true),
            Ok(None) => (None, false),
            Err(_) => (None, false),
        }
    }

    /// Counted read that reports why a lookup failed.
    ///
    /// Any non-hit, faults included, counts as a miss; a corrupt payload also
    /// counts as an error.
    pub async fn lookup(&self, key: &str) -> std::result::Result<Option<Value>, StoreError> {
        match self.store.try_get(key).await {
            Ok(Some(value)) => {
                self.stats.record_hit();
                Ok(Some(value))
            }
            Ok(None) => {
                self.stats.record_miss();
                Ok(None)
            }
            Err(e) => {
                self.stats.record_miss();
                if matches!(e, StoreError::Serialization(_)) {
                    self.stats.record_error();
                    error!(key, error = %e, "Cached payload could not be decoded");
                }
                Err(e)
            }
        }
    }

    // == Set ==
    /// Resolves the policy and writes. `NO_CACHE` succeeds without writing.
    pub async fn set(&self, key: &str, value: &Payload, policy: &TtlPolicy) -> bool {
        let expiry = match policy.resolve() {
            Resolved::Skip => {
                debug!(key, "NO_CACHE policy, not storing");
                return true;
            }
            Resolved::Store(expiry) => expiry,
        };

        if self.store.set(key, value, expiry).await {
            self.stats.record_set();
            true
        } else {
            self.stats.record_error();
            false
        }
    }

    // == Invalidate ==
    /// Deletes every key matching a glob pattern.
    ///
    /// Failures are counted and logged; the result is then 0.
    pub async fn invalidate(&self, pattern: &str) -> u64 {
        match self.store.try_delete_pattern(pattern).await {
            Ok(count) => {
                info!(pattern, count, "Invalidated cache keys");
                count
            }
            Err(e) => {
                self.stats.record_error();
                error!(pattern, error = %e, "Error invalidating keys");
                0
            }
        }
    }

    // == Stats ==
    pub async fn stats(&self) -> StatsReport {
        let store_stats = match self.store.stats().await {
            Some(stats) => StoreStats::Connected(stats),
            None => StoreStats::Disconnected {
                status: "disconnected".to_string(),
            },
        };
        StatsReport {
            application_stats: self.stats.snapshot(self.store.clock().now()),
            store_stats,
        }
    }

    /// Counts a producer call that exceeded the slow-call threshold.
    pub fn record_slow_call(&self) {
        self.stats.record_slow_call();
    }

    /// Zeroes the counters and restarts uptime. Stored entries are untouched.
    pub fn reset_stats(&self) {
        self.stats.reset(self.store.clock().now());
        info!("Cache statistics reset");
    }

    pub fn strategies(&self) -> StrategyCatalogue {
        strategy_catalogue()
    }

    pub async fn health(&self) -> StoreHealth {
        self.store.health().await
    }

    // == Admin Operations ==
    // These report backend unavailability instead of degrading.

    /// Fails with [`CacheError::Unavailable`] unless the backend answers a ping.
    pub async fn ensure_available(&self) -> Result<()> {
        self.store.ping().await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.try_clear().await?;
        info!("Cache cleared");
        Ok(())
    }

    /// Checked invalidation for operators: unavailability is an error, not 0.
    pub async fn invalidate_checked(&self, pattern: &str) -> Result<u64> {
        if pattern.trim().is_empty() {
            return Err(CacheError::InvalidRequest("pattern must not be empty".into()));
        }
        self.ensure_available().await?;
        Ok(self.invalidate(pattern).await)
    }

    /// Lists keys with TTL and size, bounded by the configured scan limit.
    pub async fn list_keys(&self, pattern: &str, limit: Option<usize>) -> Result<Vec<KeyInfo>> {
        let limit = limit.unwrap_or(self.scan_limit).min(self.scan_limit);
        Ok(self.store.try_scan(pattern, limit).await?)
    }

    pub async fn get_raw(&self, key: &str) -> Result<KeyValue> {
        let value = self
            .store
            .try_get(key)
            .await?
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
        let ttl = self.store.try_ttl(key).await?;
        Ok(KeyValue {
            key: key.to_string(),
            value,
            ttl,
        })
    }

    pub async fn set_raw(&self, key: &str, value: Value, policy: &TtlPolicy) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidRequest("key must not be empty".into()));
        }
        let expiry = match policy.resolve() {
            Resolved::Skip => return Ok(()),
            Resolved::Store(expiry) => expiry,
        };
        self.store
            .try_set(key, &Payload::from(value), expiry)
            .await?;
        Ok(())
    }

    pub async fn delete_raw(&self, key: &str) -> Result<()> {
        if self.store.try_delete(key).await? {
            Ok(())
        } else {
            Err(CacheError::NotFound(key.to_string()))
        }
    }

    /// Latency check; never fails, reports `disconnected` instead.
    pub async fn ping(&self) -> PingReport {
        match self.store.ping().await {
            Ok(latency) => PingReport {
                status: "connected".to_string(),
                latency_ms: Some((latency.as_secs_f64() * 1000.0 * 100.0).round() / 100.0),
            },
            Err(e) => {
                debug!(error = %e, "Cache ping failed");
                PingReport {
                    status: "disconnected".to_string(),
                    latency_ms: None,
                }
            }
        }
    }
}
