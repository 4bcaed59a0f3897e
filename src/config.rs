//! Configuration Module
//!
//! Handles loading and managing server and cache configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which storage engine backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Networked Redis-compatible server
    Redis,
    /// In-process map, no network
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(BackendKind::Redis),
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!("unknown cache backend '{}'", other)),
        }
    }
}

/// Connection parameters for the Redis backend.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    /// Fixed connect timeout, independent of any request
    pub connect_timeout: Duration,
    /// Fixed response timeout, independent of any request
    pub read_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Cooldown before a trial call is allowed
    pub recovery_timeout: Duration,
    /// Trial calls admitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

/// Backoff used when re-establishing a lost backend connection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port for the admin surface
    pub server_port: u16,
    /// Storage engine
    pub backend: BackendKind,
    pub redis: RedisConfig,
    pub breaker: BreakerConfig,
    pub reconnect: ReconnectConfig,
    /// Prefix prepended to every derived key
    pub key_prefix: String,
    /// Upper bound on keys returned by a listing
    pub scan_limit: usize,
    /// Producer latency above which a cache fill is logged as a win
    pub slow_call_threshold: Duration,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CACHE_BACKEND` - `redis` or `memory` (default: redis)
    /// - `REDIS_HOST` / `REDIS_PORT` / `REDIS_DB` / `REDIS_PASSWORD`
    /// - `REDIS_CONNECT_TIMEOUT_SECS` / `REDIS_READ_TIMEOUT_SECS` (default: 5)
    /// - `CACHE_KEY_PREFIX` - Key prefix (default: kapital)
    /// - `BREAKER_FAILURE_THRESHOLD` (default: 5)
    /// - `BREAKER_RECOVERY_TIMEOUT_SECS` (default: 30)
    /// - `BREAKER_HALF_OPEN_MAX_CALLS` (default: 1)
    /// - `RECONNECT_BASE_DELAY_MS` / `RECONNECT_MAX_DELAY_MS` (default: 500 / 30000)
    /// - `CACHE_SCAN_LIMIT` - Max keys per listing (default: 100)
    /// - `SLOW_CALL_THRESHOLD_MS` (default: 500)
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Self {
            server_port: parse_env("SERVER_PORT").unwrap_or(defaults.server_port),
            backend: parse_env("CACHE_BACKEND").unwrap_or(defaults.backend),
            redis: RedisConfig {
                host: env::var("REDIS_HOST").unwrap_or(defaults.redis.host),
                port: parse_env("REDIS_PORT").unwrap_or(defaults.redis.port),
                db: parse_env("REDIS_DB").unwrap_or(defaults.redis.db),
                password: env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty()),
                connect_timeout: parse_env("REDIS_CONNECT_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.redis.connect_timeout),
                read_timeout: parse_env("REDIS_READ_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.redis.read_timeout),
            },
            breaker: BreakerConfig {
                failure_threshold: parse_env("BREAKER_FAILURE_THRESHOLD")
                    .unwrap_or(defaults.breaker.failure_threshold),
                recovery_timeout: parse_env("BREAKER_RECOVERY_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.breaker.recovery_timeout),
                half_open_max_calls: parse_env("BREAKER_HALF_OPEN_MAX_CALLS")
                    .unwrap_or(defaults.breaker.half_open_max_calls),
            },
            reconnect: ReconnectConfig {
                base_delay: parse_env("RECONNECT_BASE_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.reconnect.base_delay),
                max_delay: parse_env("RECONNECT_MAX_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.reconnect.max_delay),
            },
            key_prefix: env::var("CACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            scan_limit: parse_env("CACHE_SCAN_LIMIT").unwrap_or(defaults.scan_limit),
            slow_call_threshold: parse_env("SLOW_CALL_THRESHOLD_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.slow_call_threshold),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            backend: BackendKind::Redis,
            redis: RedisConfig::default(),
            breaker: BreakerConfig::default(),
            reconnect: ReconnectConfig::default(),
            key_prefix: "kapital".to_string(),
            scan_limit: 100,
            slow_call_threshold: Duration::from_millis(500),
        }
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.backend, BackendKind::Redis);
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.recovery_timeout, Duration::from_secs(30));
        assert_eq!(config.breaker.half_open_max_calls, 1);
        assert_eq!(config.key_prefix, "kapital");
        assert_eq!(config.scan_limit, 100);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("SERVER_PORT");
        env::remove_var("CACHE_BACKEND");
        env::remove_var("REDIS_PORT");
        env::remove_var("BREAKER_FAILURE_THRESHOLD");
        env::remove_var("CACHE_SCAN_LIMIT");

        let config = Config::from_env();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.backend, BackendKind::Redis);
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.scan_limit, 100);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("memory".parse::<BackendKind>(), Ok(BackendKind::Memory));
        assert_eq!("REDIS".parse::<BackendKind>(), Ok(BackendKind::Redis));
        assert!("memcached".parse::<BackendKind>().is_err());
    }
}
