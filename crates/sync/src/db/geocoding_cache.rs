//! Geocoding cache repository.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use rota_core::Coordinates;

use super::RepositoryError;
use crate::store::CacheEntry;

#[derive(Debug, sqlx::FromRow)]
struct CacheRow {
    address: String,
    latitude: f64,
    longitude: f64,
    provider: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<CacheRow> for CacheEntry {
    fn from(row: CacheRow) -> Self {
        Self {
            address: row.address,
            coordinates: Coordinates::new(row.latitude, row.longitude),
            provider: row.provider,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

/// Repository for the `geocoding_cache` table.
pub struct GeocodingCacheRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> GeocodingCacheRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Entry for a normalized address, including expired ones.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(&self, address: &str) -> Result<Option<CacheEntry>, RepositoryError> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT address, latitude, longitude, provider, created_at, expires_at \
             FROM geocoding_cache WHERE address = $1",
        )
        .bind(address)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// Insert or replace the entry for its address.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the statement fails.
    #[instrument(skip(self, entry), fields(provider = %entry.provider))]
    pub async fn upsert(&self, entry: &CacheEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO geocoding_cache (address, latitude, longitude, provider, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (address) DO UPDATE SET \
               latitude = EXCLUDED.latitude, \
               longitude = EXCLUDED.longitude, \
               provider = EXCLUDED.provider, \
               created_at = EXCLUDED.created_at, \
               expires_at = EXCLUDED.expires_at",
        )
        .bind(&entry.address)
        .bind(entry.coordinates.latitude)
        .bind(entry.coordinates.longitude)
        .bind(&entry.provider)
        .bind(entry.created_at)
        .bind(entry.expires_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the statement fails.
    pub async fn delete(&self, address: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM geocoding_cache WHERE address = $1")
            .bind(address)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Delete every entry expired at `now`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the statement fails.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM geocoding_cache WHERE expires_at <= $1")
            .bind(now)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
