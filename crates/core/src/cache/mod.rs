pub mod warmer;

pub use warmer::{warm_recommendations, WarmOutcome};

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Narrow contract onto the external cache: JSON payloads under string keys,
/// per-key TTL, single-key atomicity only.
#[async_trait::async_trait]
pub trait RecommendationCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn set(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid redis url")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("redis connection failed")?;
        Ok(Self { manager })
    }
}

#[async_trait::async_trait]
impl RecommendationCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let mut conn = self.manager.clone();
        let data: Option<Vec<u8>> = conn.get(key).await.context("redis GET failed")?;
        match data {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("cached payload is not valid JSON")?,
            )),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let data = serde_json::to_vec(value).context("serialize cache payload failed")?;
        let _: () = conn
            .set_ex(key, data, ttl.as_secs())
            .await
            .context("redis SETEX failed")?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: u32 = conn.del(key).await.context("redis DEL failed")?;
        Ok(())
    }
}

/// Process-local stand-in for tests and dry runs. TTLs are accepted and
/// ignored.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl RecommendationCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &serde_json::Value, _ttl: Duration) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}
