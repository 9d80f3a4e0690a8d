//! Database operations for the pipeline's `PostgreSQL` store.
//!
//! ## Tables
//!
//! - `customers` - Canonical customer records with geocoding columns
//! - `geocoding_cache` - Resolved addresses keyed by normalized address, with expiry
//! - `sync_logs` - One row per batch run (append-only)
//! - `sales` - CRM deals keyed by deal id
//!
//! The reference DDL lives in `crates/sync/sql/schema.sql`. Queries are
//! built at runtime with `sqlx::query_as` so the crate compiles without a
//! database.

pub mod customers;
pub mod geocoding_cache;
pub mod sales;
pub mod sync_logs;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use rota_core::{Customer, CustomerId, GeocodingUpdate, Sale, SyncLog};

pub use customers::CustomerRepository;
pub use geocoding_cache::GeocodingCacheRepository;
pub use sales::SalesRepository;
pub use sync_logs::SyncLogRepository;

use crate::store::{
    CacheEntry, CustomerFilter, CustomerStore, GeocodeCacheStore, GeocodingStats, SalesStore,
    SyncLogStore,
};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation.
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Map a unique/check violation to `Conflict`, everything else to `Database`.
pub(crate) fn map_write_error(e: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &e
        && (db_err.is_unique_violation()
            || db_err.is_check_violation()
            || db_err.is_foreign_key_violation())
    {
        return RepositoryError::Conflict(db_err.message().to_string());
    }
    RepositoryError::Database(e)
}

// =============================================================================
// Store implementation
// =============================================================================

/// `PostgreSQL`-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CustomerStore for PgStore {
    async fn upsert_customers(&self, customers: &[Customer]) -> Result<u64, RepositoryError> {
        CustomerRepository::new(&self.pool).upsert_many(customers).await
    }

    async fn pending_for_geocoding(
        &self,
        after: Option<CustomerId>,
        limit: usize,
        max_attempts: i32,
    ) -> Result<Vec<Customer>, RepositoryError> {
        CustomerRepository::new(&self.pool)
            .pending_for_geocoding(after, limit, max_attempts)
            .await
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError> {
        CustomerRepository::new(&self.pool).get_by_id(id).await
    }

    async fn write_geocoding(&self, update: &GeocodingUpdate) -> Result<(), RepositoryError> {
        CustomerRepository::new(&self.pool)
            .write_geocoding(update)
            .await
    }

    async fn customer_ids(&self) -> Result<HashSet<CustomerId>, RepositoryError> {
        CustomerRepository::new(&self.pool).all_ids().await
    }

    async fn list_customers(
        &self,
        filter: &CustomerFilter,
    ) -> Result<Vec<Customer>, RepositoryError> {
        CustomerRepository::new(&self.pool).list(filter).await
    }

    async fn geocoding_stats(&self) -> Result<GeocodingStats, RepositoryError> {
        CustomerRepository::new(&self.pool).geocoding_stats().await
    }

    async fn reset_failed(&self) -> Result<u64, RepositoryError> {
        CustomerRepository::new(&self.pool).reset_failed().await
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl GeocodeCacheStore for PgStore {
    async fn get_cached(&self, address: &str) -> Result<Option<CacheEntry>, RepositoryError> {
        GeocodingCacheRepository::new(&self.pool).get(address).await
    }

    async fn put_cached(&self, entry: &CacheEntry) -> Result<(), RepositoryError> {
        GeocodingCacheRepository::new(&self.pool).upsert(entry).await
    }

    async fn delete_cached(&self, address: &str) -> Result<(), RepositoryError> {
        GeocodingCacheRepository::new(&self.pool)
            .delete(address)
            .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        GeocodingCacheRepository::new(&self.pool)
            .purge_expired(now)
            .await
    }
}

#[async_trait]
impl SyncLogStore for PgStore {
    async fn record_sync(&self, log: &SyncLog) -> Result<(), RepositoryError> {
        SyncLogRepository::new(&self.pool).insert(log).await
    }

    async fn recent_syncs(&self, limit: i64) -> Result<Vec<SyncLog>, RepositoryError> {
        SyncLogRepository::new(&self.pool).recent(limit).await
    }
}

#[async_trait]
impl SalesStore for PgStore {
    async fn upsert_sales(&self, sales: &[Sale]) -> Result<u64, RepositoryError> {
        SalesRepository::new(&self.pool).upsert_many(sales).await
    }

    async fn sales_for_customer(&self, id: CustomerId) -> Result<Vec<Sale>, RepositoryError> {
        SalesRepository::new(&self.pool).for_customer(id).await
    }
}
