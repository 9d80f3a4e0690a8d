//! Storage seam between the pipeline and its backing store.
//!
//! The pipeline only talks to these traits. [`PgStore`](crate::db::PgStore)
//! implements them on `PostgreSQL`; [`MemoryStore`](crate::memory::MemoryStore)
//! implements them in process for tests and dry runs.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rota_core::{
    Coordinates, Customer, CustomerId, GeocodingStatus, GeocodingUpdate, Sale, SyncLog,
};

use crate::db::RepositoryError;

/// A resolved address in the geocoding cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Normalized address (cache key)
    pub address: String,
    pub coordinates: Coordinates,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Filter for customer listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerFilter {
    /// Case-insensitive match on name, CNPJ or city
    pub search: Option<String>,
    pub status: Option<GeocodingStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl CustomerFilter {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    /// Limit clamped to `1..=MAX_LIMIT`.
    #[must_use]
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    #[must_use]
    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// Trimmed, non-empty search term.
    #[must_use]
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Geocoding coverage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct GeocodingStats {
    pub total: i64,
    pub geocoded: i64,
    pub pending: i64,
    pub failed: i64,
    pub without_coordinates: i64,
    pub with_cep_without_coordinates: i64,
    pub without_cep_without_coordinates: i64,
}

impl GeocodingStats {
    /// Share of customers with coordinates, in percent.
    #[must_use]
    pub fn geocoded_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)] // counts stay far below 2^52
        let pct = self.geocoded as f64 / self.total as f64 * 100.0;
        pct
    }
}

/// Customer records.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    /// Insert or update customers keyed by id, returning rows written.
    ///
    /// Geocoding columns of existing rows are kept unless the postal code or
    /// full address changed, in which case the row returns to `pending`.
    async fn upsert_customers(&self, customers: &[Customer]) -> Result<u64, RepositoryError>;

    /// Pending customers with a usable address and fewer than `max_attempts`
    /// attempts, ordered by id, strictly after `after`.
    async fn pending_for_geocoding(
        &self,
        after: Option<CustomerId>,
        limit: usize,
        max_attempts: i32,
    ) -> Result<Vec<Customer>, RepositoryError>;

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError>;

    /// Write the geocoding columns of one customer.
    ///
    /// Returns `RepositoryError::NotFound` if the customer does not exist.
    async fn write_geocoding(&self, update: &GeocodingUpdate) -> Result<(), RepositoryError>;

    async fn customer_ids(&self) -> Result<HashSet<CustomerId>, RepositoryError>;

    async fn list_customers(&self, filter: &CustomerFilter)
    -> Result<Vec<Customer>, RepositoryError>;

    async fn geocoding_stats(&self) -> Result<GeocodingStats, RepositoryError>;

    /// Move every `failed` customer back to `pending` with zero attempts.
    async fn reset_failed(&self) -> Result<u64, RepositoryError>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Durable layer of the geocoding cache.
#[async_trait]
pub trait GeocodeCacheStore: Send + Sync {
    /// Entry for `address`, expired or not.
    async fn get_cached(&self, address: &str) -> Result<Option<CacheEntry>, RepositoryError>;

    async fn put_cached(&self, entry: &CacheEntry) -> Result<(), RepositoryError>;

    async fn delete_cached(&self, address: &str) -> Result<(), RepositoryError>;

    /// Delete every entry expired at `now`, returning how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

/// Append-only run log.
#[async_trait]
pub trait SyncLogStore: Send + Sync {
    async fn record_sync(&self, log: &SyncLog) -> Result<(), RepositoryError>;

    /// Most recent runs first.
    async fn recent_syncs(&self, limit: i64) -> Result<Vec<SyncLog>, RepositoryError>;
}

/// CRM deals.
#[async_trait]
pub trait SalesStore: Send + Sync {
    /// Insert or update sales keyed by deal id, returning rows written.
    async fn upsert_sales(&self, sales: &[Sale]) -> Result<u64, RepositoryError>;

    /// Newest deals first.
    async fn sales_for_customer(&self, id: CustomerId) -> Result<Vec<Sale>, RepositoryError>;
}

/// Everything the pipeline and the API need from one backing store.
pub trait Store: CustomerStore + GeocodeCacheStore + SyncLogStore + SalesStore {}

impl<T> Store for T where T: CustomerStore + GeocodeCacheStore + SyncLogStore + SalesStore {}
