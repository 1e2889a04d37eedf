/// Response Cache
///
/// Finalized RPC results are stored in Redis as raw bytes under structured
/// string keys. The store is strictly best-effort: callers log cache errors
/// and continue as if the lookup missed.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use crate::config::RedisSettings;
use crate::error::ProxyError;

/// Capability contract for the blob store behind the cache. Any store with
/// get/set plus TTL semantics qualifies; tests substitute an in-memory map.
#[async_trait]
pub trait Cacher: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ProxyError>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), ProxyError>;
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), ProxyError>;
    async fn has(&self, key: &str) -> Result<bool, ProxyError>;
}

pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Connect and ping so a bad Redis config fails at startup, not on the
    /// first request.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, ProxyError> {
        let client = redis::Client::open(settings.connection_url())?;
        let manager = ConnectionManager::new(client).await?;

        let mut conn = manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(url = %settings.url, db = settings.db, "connected to redis");

        Ok(Self { manager })
    }
}

#[async_trait]
impl Cacher for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ProxyError> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), ProxyError> {
        let mut conn = self.manager.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), ProxyError> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, ProxyError> {
        let mut conn = self.manager.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }
}
