//! `reset-failed` and `purge-cache`.

use rota_sync::config::SyncConfig;
use rota_sync::geocoding::GeocodingCache;

use super::{CommandError, connect};

/// Put every failed customer back in the geocoding queue.
pub async fn reset_failed(config: &SyncConfig) -> Result<(), CommandError> {
    let store = connect(config).await?;
    let reset = store.reset_failed().await?;
    tracing::info!(reset, "Failed customers moved back to pending");
    Ok(())
}

/// Delete cache entries whose expiry has passed.
pub async fn purge_cache(config: &SyncConfig) -> Result<(), CommandError> {
    let store = connect(config).await?;
    let cache = GeocodingCache::new(store, config.geocoding.cache_ttl);
    let purged = cache.purge_expired().await?;
    tracing::info!(purged, "Expired geocoding cache entries removed");
    Ok(())
}
