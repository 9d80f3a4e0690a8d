//! Two-layer geocoding cache: an in-process moka map in front of the
//! durable cache table.
//!
//! Expiry is checked against the entry's own `expires_at`, so an entry
//! loaded from the table is judged the same way as one written in this
//! process. Expired entries are a miss and are deleted on the way out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use rota_core::Coordinates;
use tracing::instrument;

use crate::db::RepositoryError;
use crate::store::{CacheEntry, Store};

#[derive(Clone)]
pub struct GeocodingCache {
    memory: Cache<String, CacheEntry>,
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl GeocodingCache {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        let memory = Cache::builder().time_to_live(ttl).build();
        Self { memory, store, ttl }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached entry for a normalized address, or `None` on a miss.
    ///
    /// Store errors are logged and reported as a miss; the caller falls back
    /// to the providers.
    #[instrument(skip(self))]
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let now = Utc::now();

        if let Some(entry) = self.memory.get(key).await {
            if !entry.is_expired_at(now) {
                return Some(entry);
            }
            self.memory.invalidate(key).await;
        }

        let entry = match self.store.get_cached(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        if entry.is_expired_at(now) {
            tracing::debug!("Removing expired cache entry");
            if let Err(e) = self.store.delete_cached(key).await {
                tracing::warn!(error = %e, "Failed to delete expired cache entry");
            }
            return None;
        }

        self.memory.insert(key.to_string(), entry.clone()).await;
        Some(entry)
    }

    /// Record a resolution under `key` for the configured TTL.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the durable write fails. The in-process
    /// layer is updated regardless.
    pub async fn store(
        &self,
        key: &str,
        coordinates: Coordinates,
        provider: &str,
    ) -> Result<(), RepositoryError> {
        self.store_with_ttl(key, coordinates, provider, self.ttl)
            .await
    }

    /// Same as [`store`](Self::store) with an explicit TTL.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the durable write fails.
    #[instrument(skip(self, coordinates))]
    pub async fn store_with_ttl(
        &self,
        key: &str,
        coordinates: Coordinates,
        provider: &str,
        ttl: Duration,
    ) -> Result<(), RepositoryError> {
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let entry = CacheEntry {
            address: key.to_string(),
            coordinates,
            provider: provider.to_string(),
            created_at,
            expires_at: created_at
                .checked_add_signed(ttl)
                .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC),
        };

        self.memory.insert(key.to_string(), entry.clone()).await;
        self.store.put_cached(&entry).await
    }

    /// Delete every expired row from the durable layer.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the delete fails.
    pub async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let removed = self.store.purge_expired(Utc::now()).await?;
        self.memory.run_pending_tasks().await;
        Ok(removed)
    }
}

impl std::fmt::Debug for GeocodingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocodingCache")
            .field("ttl", &self.ttl)
            .field("memory_entries", &self.memory.entry_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::GeocodeCacheStore;

    const KEY: &str = "av. santos dumont, 1500, aldeota, fortaleza, ce, brasil";

    #[tokio::test]
    async fn test_store_then_lookup() {
        let store = Arc::new(MemoryStore::new());
        let cache = GeocodingCache::new(store.clone(), Duration::from_secs(3600));
        let coords = Coordinates::new(-3.7365, -38.4944);

        cache.store(KEY, coords, "google").await.unwrap();

        let entry = cache.lookup(KEY).await.unwrap();
        assert_eq!(entry.coordinates, coords);
        assert_eq!(entry.provider, "google");
        assert_eq!(store.cache_len().await, 1);
    }

    #[tokio::test]
    async fn test_durable_layer_survives_new_process() {
        let store = Arc::new(MemoryStore::new());
        let coords = Coordinates::new(-3.7365, -38.4944);
        GeocodingCache::new(store.clone(), Duration::from_secs(3600))
            .store(KEY, coords, "nominatim")
            .await
            .unwrap();

        let fresh = GeocodingCache::new(store, Duration::from_secs(3600));
        assert_eq!(fresh.lookup(KEY).await.unwrap().coordinates, coords);
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss_and_deleted() {
        let store = Arc::new(MemoryStore::new());
        let cache = GeocodingCache::new(store.clone(), Duration::from_millis(50));

        cache
            .store(KEY, Coordinates::new(-3.7, -38.5), "google")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(cache.lookup(KEY).await.is_none());
        assert!(store.get_cached(KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = Arc::new(MemoryStore::new());
        let cache = GeocodingCache::new(store.clone(), Duration::from_secs(3600));
        cache
            .store_with_ttl("old", Coordinates::new(-3.7, -38.5), "google", Duration::ZERO)
            .await
            .unwrap();
        cache
            .store("new", Coordinates::new(-3.7, -38.5), "google")
            .await
            .unwrap();

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(store.cache_len().await, 1);
    }
}
