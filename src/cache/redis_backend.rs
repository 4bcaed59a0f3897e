//! Redis Backend Module
//!
//! Backend over a networked Redis-compatible server using a multiplexed async
//! connection with fixed connect and response timeouts.

use std::collections::BTreeMap;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cache::backend::{parse_info, Backend};
use crate::config::RedisConfig;
use crate::error::StoreError;

/// Keys requested per `SCAN` round trip.
const SCAN_BATCH: usize = 250;

// == Redis Backend ==
pub struct RedisBackend {
    client: Client,
    config: RedisConfig,
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("db", &self.config.db)
            .finish()
    }
}

impl RedisBackend {
    /// Builds the client without connecting.
    pub fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
            redis: RedisConnectionInfo {
                db: config.db,
                password: config.password.clone(),
                ..Default::default()
            },
        };
        let client = Client::open(info)?;

        Ok(Self {
            client,
            config: config.clone(),
            connection: RwLock::new(None),
        })
    }

    /// Builds the client and makes one connection attempt.
    ///
    /// A failed attempt is logged, not returned: the backend starts disconnected
    /// and the store's reconnect loop takes over.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let backend = Self::new(config)?;
        match backend.reconnect().await {
            Ok(()) => info!(
                host = %config.host,
                port = config.port,
                db = config.db,
                "Connected to Redis"
            ),
            Err(e) => warn!(
                host = %config.host,
                port = config.port,
                error = %e,
                "Could not connect to Redis, caching disabled until reconnect"
            ),
        }
        Ok(backend)
    }

    async fn conn(&self) -> Result<MultiplexedConnection, StoreError> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| StoreError::Transient("not connected".to_string()))
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(secs) => {
                let _: () = conn.set_ex(key, value, secs).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let deleted: u64 = conn.del(keys.to_vec()).await?;
        Ok(deleted)
    }

    async fn scan(&self, pattern: &str, limit: Option<usize>) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);

            if let Some(limit) = limit {
                if keys.len() >= limit {
                    keys.truncate(limit);
                    break;
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn().await?;
        // -1: no expiry, -2: missing
        let ttl: i64 = conn.ttl(key).await?;
        Ok(u64::try_from(ttl).ok())
    }

    async fn size(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn().await?;
        let exists: bool = conn.exists(key).await?;
        if !exists {
            return Ok(None);
        }
        let len: u64 = conn.strlen(key).await?;
        Ok(Some(len))
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }

    async fn info(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let mut conn = self.conn().await?;
        let text: String = redis::cmd("INFO").query_async(&mut conn).await?;
        Ok(parse_info(&text))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Transient(format!("unexpected PING reply '{}'", reply)))
        }
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection_with_timeouts(
                self.config.read_timeout,
                self.config.connect_timeout,
            )
            .await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        *self.connection.write().await = Some(conn);
        Ok(())
    }

    async fn purge_memory(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("MEMORY").arg("PURGE").query_async(&mut conn).await?;
        Ok(())
    }

    async fn keyspace(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let mut conn = self.conn().await?;
        let text: String = redis::cmd("INFO").arg("keyspace").query_async(&mut conn).await?;
        Ok(parse_info(&text))
    }
}
