//! Cache Store Module
//!
//! Serializes values and performs every backend operation through the circuit
//! breaker. Connectivity faults never reach the caller of the fail-open methods:
//! reads degrade to "absent", writes to `false`, and a reconnect is scheduled.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::backend::{keyspace_key_count, Backend};
use crate::cache::breaker::{BreakerError, BreakerStatus, CircuitBreaker};
use crate::cache::clock::SharedClock;
use crate::cache::payload::Payload;
use crate::cache::ttl::Expiry;
use crate::config::{BreakerConfig, ReconnectConfig};
use crate::error::StoreError;

// == Key Info ==
/// Metadata for one listed key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyInfo {
    pub key: String,
    /// Seconds to live, `None` when the key never expires
    pub ttl: Option<u64>,
    /// Value size in bytes
    pub size: Option<u64>,
}

// == Server Stats ==
/// Summary of backend server metrics.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub status: String,
    pub version: String,
    pub used_memory: String,
    pub used_memory_peak: String,
    pub clients_connected: u64,
    pub uptime_days: u64,
    pub hits: u64,
    pub misses: u64,
    /// Server-side keyspace hit rate, percent
    pub hit_rate: f64,
    /// Key count per logical database
    pub keys: BTreeMap<String, u64>,
}

impl ServerStats {
    pub fn from_info(info: &BTreeMap<String, String>) -> Self {
        let text = |name: &str| {
            info.get(name)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string())
        };
        let number = |name: &str| {
            info.get(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(0)
        };

        let hits = number("keyspace_hits");
        let misses = number("keyspace_misses");
        let keys = info
            .iter()
            .filter(|(name, _)| is_db_name(name))
            .map(|(name, line)| (name.clone(), keyspace_key_count(line)))
            .collect();

        Self {
            status: "connected".to_string(),
            version: text("redis_version"),
            used_memory: text("used_memory_human"),
            used_memory_peak: text("used_memory_peak_human"),
            clients_connected: number("connected_clients"),
            uptime_days: number("uptime_in_days"),
            hits,
            misses,
            hit_rate: hits as f64 / (hits + misses).max(1) as f64 * 100.0,
            keys,
        }
    }
}

/// `db0`, `db1`, ... but not `dbfilename` and friends.
fn is_db_name(name: &str) -> bool {
    name.strip_prefix("db")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

// == Store Health ==
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    /// `connected` or `disconnected`
    pub status: String,
    pub bypassed: bool,
    pub breaker: BreakerStatus,
}

// == Bypass Guard ==
/// While alive, the store behaves as if the backend were unavailable.
///
/// Guards nest; normal behaviour resumes when the last one is dropped, including
/// on early return or unwinding.
#[must_use = "the bypass ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct BypassGuard<'a> {
    store: &'a Store,
}

impl Drop for BypassGuard<'_> {
    fn drop(&mut self) {
        if self.store.bypass_depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!("Cache bypass scope ended");
        }
    }
}

// == Store ==
#[derive(Debug)]
pub struct Store {
    backend: Arc<dyn Backend>,
    breaker: CircuitBreaker,
    clock: SharedClock,
    reconnect: ReconnectConfig,
    reconnecting: Arc<AtomicBool>,
    bypass_depth: AtomicUsize,
}

impl Store {
    pub fn new(
        backend: Arc<dyn Backend>,
        breaker: BreakerConfig,
        reconnect: ReconnectConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            backend,
            breaker: CircuitBreaker::new("cache-store", breaker, clock.clone()),
            clock,
            reconnect,
            reconnecting: Arc::new(AtomicBool::new(false)),
            bypass_depth: AtomicUsize::new(0),
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        self.breaker.status()
    }

    // == Bypass ==
    /// Starts a scope in which every operation treats the store as unavailable.
    pub fn bypass(&self) -> BypassGuard<'_> {
        if self.bypass_depth.fetch_add(1, Ordering::SeqCst) == 0 {
            debug!("Cache bypass scope started");
        }
        BypassGuard { store: self }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass_depth.load(Ordering::SeqCst) > 0
    }

    /// Runs a backend call behind the bypass check and the circuit breaker.
    async fn guarded<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        if self.is_bypassed() {
            return Err(StoreError::Bypassed);
        }

        // A refused command is still a reply, so it counts as a healthy call.
        let outcome = self
            .breaker
            .call(|| async move {
                match op().await {
                    Err(StoreError::Rejected(msg)) => Ok(Err(StoreError::Rejected(msg))),
                    other => other.map(Ok),
                }
            })
            .await;

        match outcome {
            Ok(reply) => reply,
            Err(BreakerError::Open { remaining, .. }) => Err(StoreError::BreakerOpen { remaining }),
            Err(BreakerError::Inner(err)) => {
                if matches!(err, StoreError::Transient(_)) {
                    self.schedule_reconnect();
                }
                Err(err)
            }
        }
    }

    // == Get ==
    /// Reads and decodes a value.
    ///
    /// An undecodable payload is reported as [`StoreError::Serialization`].
    pub async fn try_get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let bytes = self.guarded(|| self.backend.get(key)).await?;
        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fail-open read: any fault is logged and reported as absent.
    pub async fn get(&self, key: &str) -> Option<Value> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                log_degraded("get", key, &e);
                None
            }
        }
    }

    // == Set ==
    /// Sanitizes, encodes and writes a value.
    ///
    /// A midnight expiry is converted to seconds at this point, on every write.
    pub async fn try_set(
        &self,
        key: &str,
        value: &Payload,
        expiry: Expiry,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&value.to_json())?;
        let ttl = expiry.ttl_at(self.clock.now());
        self.guarded(|| self.backend.set(key, bytes, ttl)).await
    }

    /// Fail-open write: returns whether the value was stored.
    pub async fn set(&self, key: &str, value: &Payload, expiry: Expiry) -> bool {
        match self.try_set(key, value, expiry).await {
            Ok(()) => true,
            Err(e) => {
                log_degraded("set", key, &e);
                false
            }
        }
    }

    // == Delete ==
    /// Removes one key; `Ok(false)` when it did not exist.
    pub async fn try_delete(&self, key: &str) -> Result<bool, StoreError> {
        let keys = [key.to_string()];
        let removed = self.guarded(|| self.backend.delete(&keys)).await?;
        Ok(removed > 0)
    }

    pub async fn delete(&self, key: &str) -> bool {
        match self.try_delete(key).await {
            Ok(removed) => removed,
            Err(e) => {
                log_degraded("delete", key, &e);
                false
            }
        }
    }

    /// Removes every key matching a glob pattern and returns the count.
    pub async fn try_delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        self.guarded(|| async {
            let keys = self.backend.scan(pattern, None).await?;
            self.backend.delete(&keys).await
        })
        .await
    }

    // == Scan ==
    /// Lists keys matching `pattern` with their TTL and size, at most `limit`.
    pub async fn try_scan(&self, pattern: &str, limit: usize) -> Result<Vec<KeyInfo>, StoreError> {
        self.guarded(|| async {
            let keys = self.backend.scan(pattern, Some(limit)).await?;
            let mut listed = Vec::with_capacity(keys.len());
            for key in keys {
                let ttl = self.backend.ttl(&key).await?;
                let size = self.backend.size(&key).await?;
                listed.push(KeyInfo { key, ttl, size });
            }
            Ok::<_, StoreError>(listed)
        })
        .await
    }

    pub async fn scan(&self, pattern: &str, limit: usize) -> Vec<KeyInfo> {
        match self.try_scan(pattern, limit).await {
            Ok(keys) => keys,
            Err(e) => {
                log_degraded("scan", pattern, &e);
                Vec::new()
            }
        }
    }

    /// Remaining TTL of a key, `None` for no expiry or a missing key.
    pub async fn try_ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        self.guarded(|| self.backend.ttl(key)).await
    }

    // == Clear ==
    pub async fn try_clear(&self) -> Result<(), StoreError> {
        self.guarded(|| self.backend.flush()).await
    }

    pub async fn clear(&self) -> bool {
        match self.try_clear().await {
            Ok(()) => true,
            Err(e) => {
                log_degraded("clear", "*", &e);
                false
            }
        }
    }

    // == Stats ==
    pub async fn try_stats(&self) -> Result<ServerStats, StoreError> {
        let info = self.guarded(|| self.backend.info()).await?;
        Ok(ServerStats::from_info(&info))
    }

    /// Server metrics, or `None` when the backend cannot be reached.
    pub async fn stats(&self) -> Option<ServerStats> {
        match self.try_stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                log_degraded("stats", "-", &e);
                None
            }
        }
    }

    // == Health ==
    /// Round-trip latency of a `PING`.
    pub async fn ping(&self) -> Result<Duration, StoreError> {
        let started = Instant::now();
        self.guarded(|| self.backend.ping()).await?;
        Ok(started.elapsed())
    }

    pub async fn health(&self) -> StoreHealth {
        let status = match self.ping().await {
            Ok(_) => "connected",
            Err(_) => "disconnected",
        };
        StoreHealth {
            status: status.to_string(),
            bypassed: self.is_bypassed(),
            breaker: self.breaker.status(),
        }
    }

    // == Maintenance ==
    pub async fn purge_memory(&self) -> Result<(), StoreError> {
        self.guarded(|| self.backend.purge_memory()).await
    }

    pub async fn keyspace(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.guarded(|| self.backend.keyspace()).await
    }

    // == Reconnect ==
    /// Spawns the reconnect loop unless one is already running.
    fn schedule_reconnect(&self) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.reconnecting.store(false, Ordering::SeqCst);
            return;
        };

        let backend = Arc::clone(&self.backend);
        let reconnecting = Arc::clone(&self.reconnecting);
        let config = self.reconnect.clone();

        runtime.spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                tokio::time::sleep(reconnect_delay(attempt, &config)).await;
                match backend.reconnect().await {
                    Ok(()) => {
                        info!(attempts = attempt + 1, "Reconnected to cache backend");
                        break;
                    }
                    Err(e) => {
                        debug!(attempt, error = %e, "Cache backend reconnect failed");
                        attempt = attempt.saturating_add(1);
                    }
                }
            }
            reconnecting.store(false, Ordering::SeqCst);
        });
    }
}

/// Delay before reconnect attempt `attempt` (zero-based).
///
/// Exponential in the attempt number, capped at `max_delay`, plus up to 25%
/// random jitter.
pub fn reconnect_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let factor = 1u32 << attempt.min(16);
    let capped = config
        .base_delay
        .saturating_mul(factor)
        .min(config.max_delay);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4);
    capped + Duration::from_millis(jitter_ms)
}

fn log_degraded(op: &str, key: &str, err: &StoreError) {
    match err {
        StoreError::Bypassed => debug!(op, key, "Cache bypassed"),
        StoreError::BreakerOpen { .. } => debug!(op, key, error = %err, "Cache call short-circuited"),
        _ => warn!(op, key, error = %err, "Cache operation failed, degrading"),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::breaker::BreakerState;
    use crate::cache::clock::ManualClock;
    use crate::cache::memory::MemoryBackend;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    struct Fixture {
        store: Store,
        backend: Arc<MemoryBackend>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 4, 2, 18, 0, 0).unwrap());
        let backend = Arc::new(MemoryBackend::new(Arc::new(clock.clone())));
        let store = Store::new(
            backend.clone(),
            BreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(30),
                half_open_max_calls: 1,
            },
            ReconnectConfig {
                base_delay: Duration::from_secs(3600),
                max_delay: Duration::from_secs(3600),
            },
            Arc::new(clock.clone()),
        );
        Fixture {
            store,
            backend,
            clock,
        }
    }

    #[tokio::test]
    async fn test_rejected_command_does_not_trip_breaker() {
        let f = fixture();

        for _ in 0..5 {
            assert!(matches!(
                f.store.try_set("k", &Payload::Int(1), Expiry::Seconds(0)).await,
                Err(StoreError::Rejected(_))
            ));
        }

        assert_eq!(f.store.breaker_status().state, BreakerState::Closed);
        assert_eq!(f.store.breaker_status().failure_count, 0);
        assert!(!f.store.reconnecting.load(Ordering::SeqCst));
        assert!(f.store.set("k", &Payload::Int(1), Expiry::Seconds(60)).await);
    }

    #[tokio::test]
    async fn test_set_then_get_until_ttl() {
        let f = fixture();
        let value = Payload::map([("name", "Apple")]);

        assert!(f.store.set("ticker:AAPL:info", &value, Expiry::Seconds(3600)).await);
        assert_eq!(
            f.store.get("ticker:AAPL:info").await,
            Some(json!({"name": "Apple"}))
        );

        f.clock.advance(Duration::from_secs(3601));
        assert_eq!(f.store.get("ticker:AAPL:info").await, None);
    }

    #[tokio::test]
    async fn test_midnight_expiry_computed_at_write() {
        let f = fixture();
        f.store
            .set("daily", &Payload::Int(1), Expiry::Midnight)
            .await;
        assert_eq!(f.store.try_ttl("daily").await.unwrap(), Some(6 * 3600));

        // A later write recomputes against the later clock.
        f.clock.advance(Duration::from_secs(5 * 3600));
        f.store
            .set("daily", &Payload::Int(2), Expiry::Midnight)
            .await;
        assert_eq!(f.store.try_ttl("daily").await.unwrap(), Some(3600));
    }

    #[tokio::test]
    async fn test_sanitized_on_write() {
        let f = fixture();
        let value = Payload::map([
            ("nan", Payload::Float(f64::NAN)),
            ("inf", Payload::Float(f64::INFINITY)),
        ]);
        assert!(f.store.set("k", &value, Expiry::Never).await);
        assert_eq!(
            f.store.get("k").await,
            Some(json!({"nan": null, "inf": "Infinity"}))
        );
    }

    #[tokio::test]
    async fn test_outage_degrades_without_error() {
        let f = fixture();
        f.backend.set_online(false);

        assert_eq!(f.store.get("k").await, None);
        assert!(!f.store.set("k", &Payload::Int(1), Expiry::Never).await);
        assert!(!f.store.delete("k").await);
        assert!(!f.store.clear().await);
        assert!(f.store.scan("*", 10).await.is_empty());
        assert!(f.store.stats().await.is_none());
    }

    #[tokio::test]
    async fn test_breaker_stops_hammering_backend() {
        let f = fixture();
        f.backend.set_online(false);

        f.store.get("a").await;
        f.store.get("b").await;
        let calls = f.backend.calls();

        let err = f.store.try_get("c").await.unwrap_err();
        assert!(err.is_breaker_open());
        assert_eq!(f.backend.calls(), calls);
    }

    #[tokio::test]
    async fn test_breaker_recovers_after_timeout() {
        let f = fixture();
        f.backend.set_online(false);
        f.store.get("a").await;
        f.store.get("b").await;

        f.backend.set_online(true);
        f.clock.advance(Duration::from_secs(31));
        assert!(f.store.set("k", &Payload::Int(1), Expiry::Never).await);
        assert_eq!(f.store.get("k").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_serialization_error() {
        let f = fixture();
        f.backend.set("bad", b"{not json".to_vec(), None).await.unwrap();

        assert!(matches!(
            f.store.try_get("bad").await,
            Err(StoreError::Serialization(_))
        ));
        assert_eq!(f.store.get("bad").await, None);
    }

    #[tokio::test]
    async fn test_delete_pattern() {
        let f = fixture();
        for key in ["ticker:AAPL:info", "ticker:AAPL:news", "ticker:AAPL:history", "ticker:MSFT:info"] {
            f.store.set(key, &Payload::Int(1), Expiry::Never).await;
        }

        assert_eq!(f.store.try_delete_pattern("ticker:AAPL:*").await.unwrap(), 3);
        assert_eq!(f.store.get("ticker:MSFT:info").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_scan_reports_ttl_and_size() {
        let f = fixture();
        f.store.set("a", &Payload::from("xyz"), Expiry::Seconds(60)).await;
        f.store.set("b", &Payload::Int(7), Expiry::Never).await;

        let keys = f.store.try_scan("*", 10).await.unwrap();
        assert_eq!(
            keys,
            vec![
                KeyInfo {
                    key: "a".into(),
                    ttl: Some(60),
                    size: Some(5)
                },
                KeyInfo {
                    key: "b".into(),
                    ttl: None,
                    size: Some(1)
                },
            ]
        );
        assert_eq!(f.store.try_scan("*", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bypass_scope() {
        let f = fixture();
        f.store.set("k", &Payload::Int(1), Expiry::Never).await;
        let calls = f.backend.calls();

        {
            let _outer = f.store.bypass();
            {
                let _inner = f.store.bypass();
                assert_eq!(f.store.get("k").await, None);
            }
            assert!(f.store.is_bypassed());
            assert!(!f.store.set("k", &Payload::Int(2), Expiry::Never).await);
        }

        assert_eq!(f.backend.calls(), calls);
        assert!(!f.store.is_bypassed());
        assert_eq!(f.store.get("k").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_bypass_restored_on_error_path() {
        let f = fixture();

        async fn failing(store: &Store) -> Result<(), String> {
            let _guard = store.bypass();
            Err("producer failed".to_string())
        }

        assert!(failing(&f.store).await.is_err());
        assert!(!f.store.is_bypassed());
    }

    #[tokio::test]
    async fn test_stats_from_backend_info() {
        let f = fixture();
        f.store.set("k", &Payload::Int(1), Expiry::Never).await;

        let stats = f.store.try_stats().await.unwrap();
        assert_eq!(stats.status, "connected");
        assert_eq!(stats.keys.get("db0"), Some(&1));
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture();
        assert_eq!(f.store.health().await.status, "connected");

        f.backend.set_online(false);
        assert_eq!(f.store.health().await.status, "disconnected");
    }

    #[test]
    fn test_reconnect_delay_is_capped_with_jitter() {
        let config = ReconnectConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        };

        let first = reconnect_delay(0, &config);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));

        let third = reconnect_delay(2, &config);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));

        let late = reconnect_delay(30, &config);
        assert!(late >= Duration::from_secs(2) && late <= Duration::from_millis(2500));
    }

    #[test]
    fn test_server_stats_from_info() {
        let mut info = BTreeMap::new();
        info.insert("redis_version".to_string(), "7.2.4".to_string());
        info.insert("keyspace_hits".to_string(), "3".to_string());
        info.insert("keyspace_misses".to_string(), "1".to_string());
        info.insert("db0".to_string(), "keys=12,expires=3".to_string());
        info.insert("dbfilename".to_string(), "dump.rdb".to_string());

        let stats = ServerStats::from_info(&info);
        assert_eq!(stats.version, "7.2.4");
        assert_eq!(stats.hit_rate, 75.0);
        assert_eq!(stats.used_memory, "Unknown");
        assert_eq!(stats.keys.len(), 1);
        assert_eq!(stats.keys["db0"], 12);
    }
}
