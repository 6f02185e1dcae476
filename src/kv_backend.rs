//! KVBackend: the only persistence the subsystem relies on.
//!
//! `GET`/`SETEX`/`DEL` against a remote key-value service with TTL support.
//! Two implementations ship: an in-memory default for tests and standalone
//! mode, and a Redis-backed one for production use.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{CachingError, CachingResult};

#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> CachingResult<Option<Vec<u8>>>;
    async fn setex(&self, key: &str, ttl_seconds: u64, value: Vec<u8>) -> CachingResult<()>;
    async fn del(&self, key: &str) -> CachingResult<u64>;
}

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: f64,
}

/// In-memory `KvBackend`, used as the standalone-mode default and by tests.
#[derive(Clone, Default)]
pub struct MemoryKvBackend {
    store: Arc<DashMap<String, MemoryEntry>>,
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

#[async_trait]
impl KvBackend for MemoryKvBackend {
    async fn get(&self, key: &str) -> CachingResult<Option<Vec<u8>>> {
        let expired = match self.store.get(key) {
            Some(entry) => {
                if entry.expires_at > Self::now() {
                    return Ok(Some(entry.value.clone()));
                }
                true
            }
            None => false,
        };
        if expired {
            self.store.remove(key);
        }
        Ok(None)
    }

    async fn setex(&self, key: &str, ttl_seconds: u64, value: Vec<u8>) -> CachingResult<()> {
        self.store.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: Self::now() + ttl_seconds as f64,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> CachingResult<u64> {
        Ok(self.store.remove(key).map(|_| 1).unwrap_or(0))
    }
}

/// Redis-backed `KvBackend`, the direct analogue of the original system's
/// `redis-py` client.
#[derive(Clone)]
pub struct RedisKvBackend {
    manager: redis::aio::ConnectionManager,
}

impl RedisKvBackend {
    pub async fn connect(url: &str) -> CachingResult<Self> {
        let client = redis::Client::open(url).map_err(|e| CachingError::BackendUnavailable {
            backend: "redis".to_string(),
            message: e.to_string(),
        })?;
        let manager =
            client
                .get_connection_manager()
                .await
                .map_err(|e| CachingError::BackendUnavailable {
                    backend: "redis".to_string(),
                    message: e.to_string(),
                })?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvBackend for RedisKvBackend {
    async fn get(&self, key: &str) -> CachingResult<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CachingError::BackendProtocol {
                operation: "GET".to_string(),
                message: e.to_string(),
            })
    }

    async fn setex(&self, key: &str, ttl_seconds: u64, value: Vec<u8>) -> CachingResult<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_seconds)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| CachingError::BackendProtocol {
                operation: "SETEX".to_string(),
                message: e.to_string(),
            })
    }

    async fn del(&self, key: &str) -> CachingResult<u64> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CachingError::BackendProtocol {
                operation: "DEL".to_string(),
                message: e.to_string(),
            })
    }
}
