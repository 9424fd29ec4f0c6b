use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::Result;
use crate::storage::driver::KeyValueStore;

/// One cached record as persisted in the backing store.
///
/// The payload stays serialized so the entry shape is independent of what
/// callers put in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    data: String,
    timestamp: i64,
    ttl: i64,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries under the cache namespace.
    pub total_keys: usize,
    /// Combined serialized size of those entries in bytes.
    pub total_size_bytes: usize,
    /// Entries already past their TTL but not yet evicted.
    pub expired_count: usize,
}

/// A namespaced key/value cache with per-entry TTLs.
///
/// Expiry is lazy: an expired entry is deleted on the read that finds it,
/// and `cleanup` offers an eager sweep. Every operation degrades on a
/// backing-store fault instead of propagating it; a cache that cannot be
/// reached behaves like a cache that never hits.
#[derive(Clone)]
pub struct TtlCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
    version: String,
    default_ttl_ms: i64,
}

impl TtlCache {
    /// Creates a cache over `store`, namespaced per `config`.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self {
            store,
            clock,
            prefix: config.cache_prefix.clone(),
            version: config.cache_version.clone(),
            default_ttl_ms: config.default_cache_ttl_ms,
        }
    }

    /// The namespaced storage key for `key`.
    fn storage_key(&self, key: &str) -> String {
        format!("{}{}_{}", self.prefix, self.version, key)
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Caches `data` under `key` for `ttl_ms` milliseconds (the configured
    /// default when `None`). Best-effort; faults are logged and swallowed.
    pub async fn set<T: Serialize>(&self, key: &str, data: &T, ttl_ms: Option<i64>) {
        if let Err(e) = self.try_set(key, data, ttl_ms).await {
            tracing::warn!("Failed to set cache entry {}: {}", key, e);
        }
    }

    async fn try_set<T: Serialize>(&self, key: &str, data: &T, ttl_ms: Option<i64>) -> Result<()> {
        let entry = CacheEntry {
            data: sonic_rs::to_string(data)?,
            timestamp: self.now_ms(),
            ttl: ttl_ms.unwrap_or(self.default_ttl_ms),
        };
        self.store
            .set(&self.storage_key(key), sonic_rs::to_string(&entry)?)
            .await
    }

    /// Reads the entry under `key`, or `None` when absent, expired, or
    /// unreadable. An expired entry is deleted before `None` comes back.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to get cache entry {}: {}", key, e);
                None
            }
        }
    }

    async fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.get(&self.storage_key(key)).await? else {
            return Ok(None);
        };
        let entry: CacheEntry = sonic_rs::from_str(&raw)?;
        if self.now_ms() - entry.timestamp > entry.ttl {
            self.store.delete(&self.storage_key(key)).await?;
            return Ok(None);
        }
        Ok(Some(sonic_rs::from_str(&entry.data)?))
    }

    /// Removes the entry under `key`. Best-effort.
    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.store.delete(&self.storage_key(key)).await {
            tracing::warn!("Failed to delete cache entry {}: {}", key, e);
        }
    }

    /// Removes every entry under the cache prefix, current version or not.
    pub async fn clear_all(&self) {
        if let Err(e) = self.try_clear_all().await {
            tracing::warn!("Failed to clear cache: {}", e);
        }
    }

    async fn try_clear_all(&self) -> Result<()> {
        for key in self.namespaced_keys().await? {
            self.store.delete(&key).await?;
        }
        Ok(())
    }

    /// Evicts every expired entry. Unparseable entries are evicted too.
    pub async fn cleanup(&self) {
        if let Err(e) = self.try_cleanup().await {
            tracing::warn!("Failed to cleanup cache: {}", e);
        }
    }

    async fn try_cleanup(&self) -> Result<()> {
        let now = self.now_ms();
        let mut evicted = 0usize;
        for key in self.namespaced_keys().await? {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match sonic_rs::from_str::<CacheEntry>(&raw) {
                Ok(entry) if now - entry.timestamp > entry.ttl => {
                    self.store.delete(&key).await?;
                    evicted += 1;
                }
                Ok(_) => {}
                Err(_) => {
                    self.store.delete(&key).await?;
                    evicted += 1;
                }
            }
        }
        if evicted > 0 {
            tracing::debug!("Cache cleanup evicted {} entries", evicted);
        }
        Ok(())
    }

    /// Counts and sizes the entries under the cache namespace. A fault
    /// yields zeroed stats.
    pub async fn stats(&self) -> CacheStats {
        match self.try_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("Failed to get cache stats: {}", e);
                CacheStats::default()
            }
        }
    }

    async fn try_stats(&self) -> Result<CacheStats> {
        let now = self.now_ms();
        let mut stats = CacheStats::default();
        for key in self.namespaced_keys().await? {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            stats.total_keys += 1;
            stats.total_size_bytes += raw.len();
            if let Ok(entry) = sonic_rs::from_str::<CacheEntry>(&raw) {
                if now - entry.timestamp > entry.ttl {
                    stats.expired_count += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn namespaced_keys(&self) -> Result<Vec<String>> {
        let keys = self.store.keys().await?;
        Ok(keys
            .into_iter()
            .filter(|k| k.starts_with(&self.prefix))
            .collect())
    }
}
