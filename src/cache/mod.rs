//! Cache Module
//!
//! Cache-aside core: key derivation, TTL policy, a circuit-breaker-guarded store
//! over a Redis-compatible backend, the statistics-keeping service, and the
//! wrapper that puts it all around a producer.

mod aside;
mod backend;
mod breaker;
mod clock;
mod entry;
mod key;
mod memory;
mod payload;
mod redis_backend;
mod service;
mod stats;
mod store;
mod ttl;


// Re-export public types
pub use aside::{
    cached, producer_fn, AsideError, CacheConfig, Cached, FnProducer, KeyFn, Producer,
    DEFAULT_KEY_PREFIX, DEFAULT_SLOW_CALL_THRESHOLD,
};
pub use backend::{glob_match, Backend};
pub use breaker::{BreakerError, BreakerState, BreakerStatus, CircuitBreaker};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use entry::CacheEntry;
pub use key::{Args, KeyBuilder};
pub use memory::MemoryBackend;
pub use payload::{Payload, Table, MAX_SANITIZE_DEPTH};
pub use redis_backend::RedisBackend;
pub use service::{
    strategy_catalogue, CacheService, KeyValue, PingReport, StatsReport, StoreStats,
    StrategyCatalogue,
};
pub use stats::{CacheStats, StatsSnapshot};
pub use store::{reconnect_delay, BypassGuard, KeyInfo, ServerStats, Store, StoreHealth};
pub use ttl::{
    parse_ttl_phrase, seconds_until_midnight, Category, Expiry, Resolved, Strategy, TtlPolicy,
    MAX_TTL_SECONDS,
};
