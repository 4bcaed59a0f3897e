//! Memory Backend Module
//!
//! In-process backend: a map of entries with clock-driven TTL expiration. Used by
//! tests and single-node deployments, and able to simulate an outage.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cache::backend::{glob_match, Backend};
use crate::cache::clock::SharedClock;
use crate::cache::entry::CacheEntry;
use crate::error::StoreError;

// == Memory Backend ==
#[derive(Debug)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: SharedClock,
    /// When false every call fails like a dropped connection
    online: AtomicBool,
    /// Calls that reached the engine, for asserting the breaker short-circuits
    calls: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryBackend {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            online: AtomicBool::new(true),
            calls: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Simulates the engine going down or coming back.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of calls that reached the engine.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Live (unexpired) entry count.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // == Cleanup Expired ==
    /// Removes all expired entries and returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    fn check(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Transient("connection refused".to_string()))
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Live entry for `key`, evicting it first if it has expired.
    fn live<R>(&self, key: &str, f: impl FnOnce(&CacheEntry) -> R) -> Option<R> {
        let now = self.clock.now();
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        entries.get(key).map(f)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        let value = self.live(key, |e| e.value.clone());
        let counter = if value.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<(), StoreError> {
        self.check()?;
        if ttl == Some(0) {
            return Err(StoreError::Rejected(
                "ERR invalid expire time in 'setex' command".to_string(),
            ));
        }
        let entry = CacheEntry::new(value, ttl, self.clock.now());
        self.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.check()?;
        let now = self.clock.now();
        let mut entries = self.lock();
        let removed = keys
            .iter()
            .filter_map(|k| entries.remove(k))
            .filter(|e| !e.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    async fn scan(&self, pattern: &str, limit: Option<usize>) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .lock()
            .iter()
            .filter(|(k, e)| !e.is_expired(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        self.check()?;
        let now = self.clock.now();
        Ok(self.live(key, |e| e.ttl_remaining(now)).flatten())
    }

    async fn size(&self, key: &str) -> Result<Option<u64>, StoreError> {
        self.check()?;
        Ok(self.live(key, CacheEntry::size))
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.check()?;
        self.lock().clear();
        Ok(())
    }

    async fn info(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.check()?;
        let bytes: u64 = self.lock().values().map(CacheEntry::size).sum();
        let mut info = BTreeMap::new();
        info.insert("redis_version".to_string(), "memory".to_string());
        info.insert("used_memory_human".to_string(), format!("{}B", bytes));
        info.insert("used_memory_peak_human".to_string(), format!("{}B", bytes));
        info.insert("connected_clients".to_string(), "1".to_string());
        info.insert("uptime_in_days".to_string(), "0".to_string());
        info.insert(
            "keyspace_hits".to_string(),
            self.hits.load(Ordering::Relaxed).to_string(),
        );
        info.insert(
            "keyspace_misses".to_string(),
            self.misses.load(Ordering::Relaxed).to_string(),
        );
        info.insert("db0".to_string(), format!("keys={}", self.len()));
        Ok(info)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn purge_memory(&self) -> Result<(), StoreError> {
        self.check()?;
        self.cleanup_expired();
        Ok(())
    }

    async fn keyspace(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.check()?;
        let mut keyspace = BTreeMap::new();
        keyspace.insert("db0".to_string(), format!("keys={}", self.len()));
        Ok(keyspace)
    }
}
