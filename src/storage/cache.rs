use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, Client};
use tokio::sync::Mutex;
use tracing::debug;

use crate::cli::config::CacheSettings;
use crate::scraper::ContactRecord;
use crate::storage::StorageError;

/// Cache namespace for full contact records.
pub const CONTACT_NS: &str = "contact";

/// Cache namespace for the LinkedIn-only pipeline variant.
pub const LINKEDIN_NS: &str = "linkedin";

/// Key/value store of previously computed contact records, keyed by
/// normalized URL within a namespace. Absence after the TTL is equivalent
/// to "never scraped".
#[async_trait]
pub trait ContactCache: Send + Sync {
    async fn get(&self, namespace: &str, key: &str)
        -> Result<Option<ContactRecord>, StorageError>;

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        record: &ContactRecord,
        ttl_seconds: u64,
    ) -> Result<(), StorageError>;

    /// Remove an entry. Returns whether anything was deleted.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError>;
}

fn cache_key(namespace: &str, key: &str) -> String {
    format!("{}:{}", namespace, key)
}

/// Redis-backed contact cache.
pub struct RedisCache {
    /// Connection guarded for exclusive use
    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisCache {
    pub async fn new(settings: &CacheSettings) -> Result<Self, StorageError> {
        let client = Client::open(settings.redis_url.clone())?;
        let conn = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl ContactCache for RedisCache {
    async fn get(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<ContactRecord>, StorageError> {
        let mut conn = self.conn.lock().await;

        let raw: Option<String> = redis::cmd("GET")
            .arg(cache_key(namespace, key))
            .query_async(&mut *conn)
            .await?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        record: &ContactRecord,
        ttl_seconds: u64,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_string(record)?;
        let mut conn = self.conn.lock().await;

        redis::cmd("SET")
            .arg(cache_key(namespace, key))
            .arg(raw)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<_, ()>(&mut *conn)
            .await?;

        debug!("Cached {}:{} for {}s", namespace, key, ttl_seconds);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn.lock().await;

        let removed: i64 = redis::cmd("DEL")
            .arg(cache_key(namespace, key))
            .query_async(&mut *conn)
            .await?;

        Ok(removed > 0)
    }
}

/// In-memory cache with per-entry expiry. Used by tests and as a fallback
/// when no Redis instance is reachable.
#[derive(Default)]
pub struct MemoryCache {
    entries: std::sync::Mutex<HashMap<String, (ContactRecord, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContactCache for MemoryCache {
    async fn get(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<ContactRecord>, StorageError> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let full_key = cache_key(namespace, key);

        match entries.get(&full_key) {
            Some((record, expires_at)) if *expires_at > Instant::now() => {
                Ok(Some(record.clone()))
            }
            Some(_) => {
                entries.remove(&full_key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        record: &ContactRecord,
        ttl_seconds: u64,
    ) -> Result<(), StorageError> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_seconds);
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .insert(cache_key(namespace, key), (record.clone(), expires_at));
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self
            .entries
            .lock()
            .expect("cache mutex poisoned")
            .remove(&cache_key(namespace, key))
            .is_some())
    }
}
