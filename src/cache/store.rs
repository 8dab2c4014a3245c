//! Pluggable cache backing stores.
//!
//! A store holds opaque bytes plus the fetch timestamp; freshness (TTL) is
//! always computed by the cache layer, never by the store, so the in-memory
//! and Redis implementations carry identical semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::utils::CacheError;

/// One stored entry: serialized value + when it was fetched upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntry {
    pub data: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<RawEntry>, CacheError>;
    async fn set(&self, key: &str, entry: RawEntry) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// In-process store; the default backing and the degraded-mode fallback.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, RawEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<RawEntry>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, entry: RawEntry) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Redis-backed store. Entries are bincode-encoded envelopes so the fetch
/// timestamp travels with the bytes; no Redis-side expiry is set.
pub struct RedisStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisStore {
    pub fn open(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::BackingUnavailable(format!("redis open: {}", e)))?;
        Ok(Self { client, key_prefix: "marketsentry".to_string() })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<redis::aio::Connection, CacheError> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| CacheError::BackingUnavailable(format!("redis connect: {}", e)))
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<RawEntry>, CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        let bytes: Option<Vec<u8>> = conn
            .get(self.full_key(key))
            .await
            .map_err(|e| CacheError::BackingUnavailable(format!("redis get: {}", e)))?;
        match bytes {
            Some(b) => {
                let entry: RawEntry = bincode::deserialize(&b)
                    .map_err(|e| CacheError::Codec(format!("redis entry decode: {}", e)))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: RawEntry) -> Result<(), CacheError> {
        use redis::AsyncCommands;
        let bytes = bincode::serialize(&entry)
            .map_err(|e| CacheError::Codec(format!("redis entry encode: {}", e)))?;
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(self.full_key(key), bytes)
            .await
            .map_err(|e| CacheError::BackingUnavailable(format!("redis set: {}", e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.full_key(key))
            .await
            .map_err(|e| CacheError::BackingUnavailable(format!("redis del: {}", e)))?;
        Ok(())
    }
}
