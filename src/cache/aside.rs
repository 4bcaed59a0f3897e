//! Cache-Aside Module
//!
//! Wraps any [`Producer`] so that calls check the cache first and populate it
//! after a miss. The wrapped value is itself a `Producer` with the same input and
//! error contract, so wrappers compose with anything that accepts one.
//!
//! Concurrent misses on the same key are not de-duplicated: each caller runs the
//! producer. Producers are expected to be idempotent.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::key::{Args, KeyBuilder};
use crate::cache::payload::Payload;
use crate::cache::service::CacheService;
use crate::cache::ttl::{parse_ttl_phrase, Category, Strategy, TtlPolicy};
use crate::config::Config;
use crate::error::{CacheError, StoreError};

/// Default prefix for derived keys.
pub const DEFAULT_KEY_PREFIX: &str = "kapital";

/// Default producer latency above which a cache fill is logged.
pub const DEFAULT_SLOW_CALL_THRESHOLD: Duration = Duration::from_millis(500);

// == Producer ==
/// A named, parameterized operation returning a JSON-representable value.
#[async_trait]
pub trait Producer: Send + Sync {
    type Error: Send;

    /// Stable identity used in derived keys.
    fn name(&self) -> &str;

    async fn produce(&self, args: &Args) -> Result<Payload, Self::Error>;
}

/// A [`Producer`] built from an async closure.
pub struct FnProducer<F, Fut, E> {
    name: String,
    f: F,
    _marker: PhantomData<fn() -> (Fut, E)>,
}

/// Wraps an async closure as a named producer.
pub fn producer_fn<F, Fut, E>(name: impl Into<String>, f: F) -> FnProducer<F, Fut, E>
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, E>> + Send,
    E: Send,
{
    FnProducer {
        name: name.into(),
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, E> Producer for FnProducer<F, Fut, E>
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, E>> + Send,
    E: Send,
{
    type Error = E;

    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, args: &Args) -> Result<Payload, E> {
        (self.f)(args.clone()).await
    }
}

// == Aside Error ==
/// Failure of a wrapped call.
#[derive(Error, Debug)]
pub enum AsideError<E> {
    /// The producer's own error, unchanged
    #[error("{0}")]
    Producer(E),

    /// Cache fault surfaced because `fail_open` is off
    #[error("cache unavailable: {0}")]
    Cache(StoreError),
}

impl<E> AsideError<E> {
    pub fn into_producer(self) -> Option<E> {
        match self {
            AsideError::Producer(e) => Some(e),
            AsideError::Cache(_) => None,
        }
    }
}

// == Cache Config ==
/// Computes a key from the producer name and its arguments.
pub type KeyFn = Arc<dyn Fn(&str, &Args) -> String + Send + Sync>;

/// How one producer is cached.
#[derive(Clone)]
pub struct CacheConfig {
    pub policy: TtlPolicy,
    pub key_prefix: String,
    /// Replaces the derived key when set
    pub custom_key: Option<KeyFn>,
    /// Argument that, when truthy, skips the cache entirely
    pub bypass_param: Option<String>,
    /// Store `null` results instead of returning them uncached
    pub cache_nulls: bool,
    /// Treat read faults as misses rather than errors
    pub fail_open: bool,
    pub slow_call_threshold: Duration,
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("policy", &self.policy)
            .field("key_prefix", &self.key_prefix)
            .field("custom_key", &self.custom_key.is_some())
            .field("bypass_param", &self.bypass_param)
            .field("cache_nulls", &self.cache_nulls)
            .field("fail_open", &self.fail_open)
            .field("slow_call_threshold", &self.slow_call_threshold)
            .finish()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: TtlPolicy::default(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            custom_key: None,
            bypass_param: None,
            cache_nulls: false,
            fail_open: true,
            slow_call_threshold: DEFAULT_SLOW_CALL_THRESHOLD,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with the key prefix and slow-call threshold of the process.
    pub fn from_config(config: &Config) -> Self {
        Self {
            key_prefix: config.key_prefix.clone(),
            slow_call_threshold: config.slow_call_threshold,
            ..Self::default()
        }
    }

    pub fn ttl(mut self, seconds: u64) -> Self {
        self.policy.ttl = Some(seconds);
        self
    }

    /// TTL from a catalogue phrase such as `"15 minutes"`.
    pub fn ttl_phrase(self, phrase: &str) -> Result<Self, CacheError> {
        Ok(self.ttl(parse_ttl_phrase(phrase)?))
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.policy.strategy = Some(strategy);
        self
    }

    pub fn category(self, category: Category) -> Self {
        self.strategy(category.strategy())
    }

    pub fn invalidate_at_midnight(mut self) -> Self {
        self.policy.invalidate_at_midnight = true;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Args) -> String + Send + Sync + 'static,
    {
        self.custom_key = Some(Arc::new(f));
        self
    }

    pub fn bypass_param(mut self, name: impl Into<String>) -> Self {
        self.bypass_param = Some(name.into());
        self
    }

    pub fn cache_nulls(mut self, cache_nulls: bool) -> Self {
        self.cache_nulls = cache_nulls;
        self
    }

    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    pub fn slow_call_threshold(mut self, threshold: Duration) -> Self {
        self.slow_call_threshold = threshold;
        self
    }
}

// == Cached ==
/// A producer wrapped with cache-aside behaviour.
pub struct Cached<P> {
    producer: P,
    config: CacheConfig,
    keys: KeyBuilder,
    service: Arc<CacheService>,
}

impl<P: fmt::Debug> fmt::Debug for Cached<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cached")
            .field("producer", &self.producer)
            .field("config", &self.config)
            .finish()
    }
}

/// Wraps `producer` with cache-aside behaviour backed by `service`.
pub fn cached<P: Producer>(
    producer: P,
    config: CacheConfig,
    service: Arc<CacheService>,
) -> Cached<P> {
    Cached::new(producer, config, service)
}

impl<P: Producer> Cached<P> {
    pub fn new(producer: P, config: CacheConfig, service: Arc<CacheService>) -> Self {
        let mut keys = KeyBuilder::new(config.key_prefix.clone());
        if let Some(param) = &config.bypass_param {
            keys = keys.skip(param.clone());
        }
        Self {
            producer,
            config,
            keys,
            service,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn inner(&self) -> &P {
        &self.producer
    }

    /// The key a call with `args` reads and writes.
    pub fn key_for(&self, args: &Args) -> String {
        match &self.config.custom_key {
            Some(key_fn) => key_fn(self.producer.name(), args),
            None => self.keys.build(self.producer.name(), args),
        }
    }

    fn bypassed(&self, args: &Args) -> bool {
        self.config
            .bypass_param
            .as_deref()
            .is_some_and(|param| args.flag(param))
    }

    // == Call ==
    /// Runs the cache-aside protocol for one call.
    ///
    /// A producer failure is returned unchanged; a failed cache write never turns
    /// a produced value into an error.
    pub async fn call(&self, args: &Args) -> Result<Payload, AsideError<P::Error>> {
        let name = self.producer.name();

        if self.bypassed(args) {
            debug!(producer = name, "Cache bypass requested");
            return self.producer.produce(args).await.map_err(AsideError::Producer);
        }

        let key = self.key_for(args);

        match self.service.lookup(&key).await {
            Ok(Some(value)) => {
                debug!(producer = name, key = %key, "Cache hit");
                return Ok(Payload::from(value));
            }
            Ok(None) => debug!(producer = name, key = %key, "Cache miss"),
            Err(e @ (StoreError::Transient(_) | StoreError::BreakerOpen { .. }))
                if !self.config.fail_open =>
            {
                return Err(AsideError::Cache(e));
            }
            Err(e) => debug!(producer = name, key = %key, error = %e, "Cache read failed, treating as miss"),
        }

        let started = Instant::now();
        let result = self
            .producer
            .produce(args)
            .await
            .map_err(AsideError::Producer)?;
        let elapsed = started.elapsed();

        if elapsed > self.config.slow_call_threshold {
            self.service.record_slow_call();
            info!(
                producer = name,
                key = %key,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow producer call, benefits from caching"
            );
        }

        if result.is_null() && !self.config.cache_nulls {
            debug!(producer = name, key = %key, "Null result, not caching");
            return Ok(result);
        }

        if !self.service.set(&key, &result, &self.config.policy).await {
            warn!(producer = name, key = %key, "Failed to cache result");
        }

        Ok(result)
    }
}

#[async_trait]
impl<P: Producer> Producer for Cached<P> {
    type Error = AsideError<P::Error>;

    fn name(&self) -> &str {
        self.producer.name()
    }

    async fn produce(&self, args: &Args) -> Result<Payload, Self::Error> {
        self.call(args).await
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::memory::MemoryBackend;
    use crate::cache::store::Store;
    use crate::config::{BreakerConfig, ReconnectConfig};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        service: Arc<CacheService>,
        backend: Arc<MemoryBackend>,
        clock: ManualClock,
        calls: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 4, 2, 20, 0, 0).unwrap());
        let backend = Arc::new(MemoryBackend::new(Arc::new(clock.clone())));
        let store = Store::new(
            backend.clone(),
            BreakerConfig::default(),
            ReconnectConfig {
                base_delay: Duration::from_secs(3600),
                max_delay: Duration::from_secs(3600),
            },
            Arc::new(clock.clone()),
        );
        Harness {
            service: Arc::new(CacheService::new(Arc::new(store), 100)),
            backend,
            clock,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Echoes the `symbol` argument and counts its calls.
    #[derive(Debug)]
    struct Quote {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Producer for Quote {
        type Error = String;

        fn name(&self) -> &str {
            "get_quote"
        }

        async fn produce(&self, args: &Args) -> Result<Payload, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match args.get("symbol").map(|p| p.to_string()).as_deref() {
                Some("FAIL") => Err("upstream timeout".to_string()),
                Some("NONE") => Ok(Payload::Null),
                Some(symbol) => Ok(Payload::map([("symbol", symbol)])),
                None => Err("symbol required".to_string()),
            }
        }
    }

    fn quote(calls: Arc<AtomicUsize>) -> Quote {
        Quote { calls }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let h = harness();
        let wrapped = cached(quote(h.calls.clone()), CacheConfig::new().ttl(60), h.service.clone());
        let args = Args::new().arg("symbol", "AAPL");

        let first = wrapped.call(&args).await.unwrap();
        let second = wrapped.call(&args).await.unwrap();

        assert_eq!(first.to_json(), second.to_json());
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let stats = h.service.stats().await.application_stats;
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_slow_call_recorded_while_store_down() {
        let h = harness();
        h.backend.set_online(false);
        let slow = producer_fn("slow_report", |_args: Args| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, String>(Payload::from("done"))
        });
        let wrapped = cached(
            slow,
            CacheConfig::new()
                .ttl(60)
                .slow_call_threshold(Duration::from_millis(5)),
            h.service.clone(),
        );

        wrapped.call(&Args::new()).await.unwrap();

        let stats = h.service.stats().await.application_stats;
        assert_eq!(stats.slow_calls, 1);
        assert_eq!(stats.sets, 0);
    }

    #[tokio::test]
    async fn test_expired_entry_recomputed() {
        let h = harness();
        let wrapped = cached(quote(h.calls.clone()), CacheConfig::new().ttl(60), h.service.clone());
        let args = Args::new().arg("symbol", "AAPL");

        wrapped.call(&args).await.unwrap();
        h.clock.advance(Duration::from_secs(60));
        wrapped.call(&args).await.unwrap();

        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bypass_skips_cache_entirely() {
        let h = harness();
        let wrapped = cached(
            quote(h.calls.clone()),
            CacheConfig::new().ttl(60).bypass_param("refresh"),
            h.service.clone(),
        );
        let args = Args::new().arg("symbol", "AAPL").arg("refresh", "true");

        wrapped.call(&args).await.unwrap();
        wrapped.call(&args).await.unwrap();

        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.backend.calls(), 0);
        assert!(h.backend.is_empty());
    }

    #[tokio::test]
    async fn test_bypass_param_not_part_of_key() {
        let h = harness();
        let wrapped = cached(
            quote(h.calls.clone()),
            CacheConfig::new().bypass_param("refresh"),
            h.service.clone(),
        );

        let plain = wrapped.key_for(&Args::new().arg("symbol", "AAPL"));
        let flagged = wrapped.key_for(&Args::new().arg("symbol", "AAPL").arg("refresh", false));
        assert_eq!(plain, flagged);
        assert_eq!(plain, "kapital:get_quote:symbol:AAPL");
    }

    #[tokio::test]
    async fn test_custom_key_fn() {
        let h = harness();
        let wrapped = cached(
            quote(h.calls.clone()),
            CacheConfig::new().key_fn(|name, args| {
                format!("{}:{}", name, args.get("symbol").map(|p| p.to_string()).unwrap_or_default())
            }),
            h.service.clone(),
        );

        wrapped.call(&Args::new().arg("symbol", "MSFT")).await.unwrap();
        assert_eq!(
            h.service.get("get_quote:MSFT").await.0,
            Some(serde_json::json!({"symbol": "MSFT"}))
        );
    }

    #[tokio::test]
    async fn test_producer_error_propagates_unchanged() {
        let h = harness();
        let wrapped = cached(quote(h.calls.clone()), CacheConfig::new(), h.service.clone());

        let err = wrapped
            .call(&Args::new().arg("symbol", "FAIL"))
            .await
            .unwrap_err();
        assert_eq!(err.into_producer().as_deref(), Some("upstream timeout"));
        assert!(h.backend.is_empty());
    }

    #[tokio::test]
    async fn test_null_not_cached_by_default() {
        let h = harness();
        let wrapped = cached(quote(h.calls.clone()), CacheConfig::new(), h.service.clone());
        let args = Args::new().arg("symbol", "NONE");

        assert!(wrapped.call(&args).await.unwrap().is_null());
        wrapped.call(&args).await.unwrap();

        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        assert!(h.backend.is_empty());
    }

    #[tokio::test]
    async fn test_null_cached_when_enabled() {
        let h = harness();
        let wrapped = cached(
            quote(h.calls.clone()),
            CacheConfig::new().cache_nulls(true),
            h.service.clone(),
        );
        let args = Args::new().arg("symbol", "NONE");

        wrapped.call(&args).await.unwrap();
        assert!(wrapped.call(&args).await.unwrap().is_null());

        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.service.stats().await.application_stats.hits, 1);
    }

    #[tokio::test]
    async fn test_fail_open_serves_producer_when_store_down() {
        let h = harness();
        h.backend.set_online(false);
        let wrapped = cached(quote(h.calls.clone()), CacheConfig::new(), h.service.clone());

        let result = wrapped.call(&Args::new().arg("symbol", "AAPL")).await;
        assert!(result.is_ok());
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fail_closed_surfaces_store_fault() {
        let h = harness();
        h.backend.set_online(false);
        let wrapped = cached(
            quote(h.calls.clone()),
            CacheConfig::new().fail_open(false),
            h.service.clone(),
        );

        let err = wrapped
            .call(&Args::new().arg("symbol", "AAPL"))
            .await
            .unwrap_err();
        assert!(matches!(err, AsideError::Cache(StoreError::Transient(_))));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_bypass_scope_treated_as_miss() {
        let h = harness();
        let wrapped = cached(
            quote(h.calls.clone()),
            CacheConfig::new().fail_open(false),
            h.service.clone(),
        );
        let args = Args::new().arg("symbol", "AAPL");

        {
            let _guard = h.service.store().bypass();
            wrapped.call(&args).await.unwrap();
            wrapped.call(&args).await.unwrap();
        }

        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_midnight_policy() {
        let h = harness();
        let wrapped = cached(
            quote(h.calls.clone()),
            CacheConfig::new().category(Category::FinancialStatements),
            h.service.clone(),
        );
        let args = Args::new().arg("symbol", "MSFT");
        wrapped.call(&args).await.unwrap();

        let key = wrapped.key_for(&args);
        assert_eq!(h.service.store().try_ttl(&key).await.unwrap(), Some(4 * 3600));
    }

    #[tokio::test]
    async fn test_wrapper_is_a_producer() {
        let h = harness();
        let wrapped = cached(quote(h.calls.clone()), CacheConfig::new(), h.service.clone());

        async fn run<P: Producer>(p: &P, args: &Args) -> bool {
            p.produce(args).await.is_ok()
        }

        assert!(run(&wrapped, &Args::new().arg("symbol", "AAPL")).await);
        assert_eq!(Producer::name(&wrapped), "get_quote");
    }

    #[tokio::test]
    async fn test_closure_producer() {
        let h = harness();
        let echo = producer_fn("echo", |args: Args| async move {
            Ok::<_, String>(args.get("n").cloned().unwrap_or_default())
        });
        let wrapped = cached(echo, CacheConfig::new().ttl(60), h.service.clone());

        let args = Args::new().arg("n", 42);
        assert_eq!(wrapped.call(&args).await.unwrap().to_json(), serde_json::json!(42));
        assert_eq!(h.service.get("kapital:echo:n:42").await.0, Some(serde_json::json!(42)));
    }

    #[test]
    fn test_config_from_process_config() {
        let process = Config {
            key_prefix: "staging".to_string(),
            slow_call_threshold: Duration::from_millis(250),
            ..Config::default()
        };
        let config = CacheConfig::from_config(&process);
        assert_eq!(config.key_prefix, "staging");
        assert_eq!(config.slow_call_threshold, Duration::from_millis(250));
        assert!(config.fail_open);
    }

    #[test]
    fn test_config_from_phrase() {
        let config = CacheConfig::new().ttl_phrase("15 minutes").unwrap();
        assert_eq!(config.policy.ttl, Some(900));
        assert!(CacheConfig::new().ttl_phrase("fortnightly-ish").is_err());
    }
}
