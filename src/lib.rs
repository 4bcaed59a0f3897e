//! Kapital Cache - cache-aside layer for data-producing operations
//!
//! Wraps named producers with deterministic key derivation, tiered TTL policy
//! (including expiry at the next UTC midnight), a circuit breaker around a
//! Redis-compatible store, and hit/miss statistics. An axum router exposes the
//! administrative operations.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::{create_router, AppState};
pub use cache::{cached, CacheConfig, CacheService, Cached, Producer, Store};
pub use config::Config;
pub use tasks::spawn_maintenance;
