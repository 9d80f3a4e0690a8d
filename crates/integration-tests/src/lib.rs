//! Integration tests for Rota.
//!
//! # Running Tests
//!
//! ```bash
//! # In-process tests (no services needed)
//! cargo test -p rota-integration-tests
//!
//! # Postgres store tests
//! ROTA_TEST_DATABASE_URL=postgres://... cargo test -p rota-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `geocoding_pipeline` - Batch driver, provider chain, cache and writer
//!   wired together over an in-memory store
//! - `api` - Dashboard routes
//! - `postgres_store` - `PgStore` against a real database
//!
//! This crate holds the shared fixtures: customers, scripted providers and a
//! store wrapper that injects write faults.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use rota_core::{
    Coordinates, Customer, CustomerId, GeocodingUpdate, Sale, SyncLog, normalize_postal_code,
};
use rota_sync::batch::{CHECKPOINT_FILE, Checkpoint};
use rota_sync::config::{BatchConfig, WriterConfig};
use rota_sync::db::RepositoryError;
use rota_sync::geocoding::{
    GeocodeRequest, Geocoder, GeocodingCache, GeocodingProvider, ProviderChain, ProviderError,
};
use rota_sync::memory::MemoryStore;
use rota_sync::store::{
    CacheEntry, CustomerFilter, CustomerStore, GeocodeCacheStore, GeocodingStats, SalesStore,
    Store, SyncLogStore,
};

pub const FORTALEZA: Coordinates = Coordinates::new(-3.7327, -38.5270);
pub const SAO_PAULO: Coordinates = Coordinates::new(-23.5614, -46.6559);

// =============================================================================
// Customers
// =============================================================================

/// A pending customer on a numbered street.
#[must_use]
pub fn customer_at(id: i64, street: &str, city: &str, state: &str, cep: Option<&str>) -> Customer {
    let mut customer = Customer::new(CustomerId::new(id), format!("Cliente {id}"));
    customer.street_address = Some(street.to_string());
    customer.street_number = Some(id.to_string());
    customer.city = Some(city.to_string());
    customer.state = Some(state.to_string());
    customer.postal_code = cep.and_then(normalize_postal_code);
    customer.full_address = customer.address_parts().to_full_address();
    customer
}

/// `count` customers in Fortaleza with ids `1..=count` and distinct addresses.
#[must_use]
pub fn fortaleza_customers(count: i64) -> Vec<Customer> {
    (1..=count)
        .map(|id| customer_at(id, "Rua Barao de Aracati", "Fortaleza", "CE", Some("60115-080")))
        .collect()
}

// =============================================================================
// Configuration
// =============================================================================

/// Batch settings with no pauses, writing into `log_dir`.
#[must_use]
pub fn batch_config(log_dir: &Path) -> BatchConfig {
    BatchConfig {
        page_size: 20,
        checkpoint_interval: 50,
        delay_between_requests: Duration::ZERO,
        max_attempts: 3,
        log_dir: log_dir.to_path_buf(),
    }
}

/// Writer settings with no pause between attempts.
#[must_use]
pub fn writer_config() -> WriterConfig {
    WriterConfig {
        retry_delay: Duration::ZERO,
        ..WriterConfig::default()
    }
}

/// Geocoder over `store` with the given providers, in order.
#[must_use]
pub fn geocoder(
    store: Arc<dyn Store>,
    providers: impl IntoIterator<Item = Arc<dyn GeocodingProvider>>,
    timeout: Duration,
    cache_ttl: Duration,
) -> Geocoder {
    let chain = providers
        .into_iter()
        .fold(ProviderChain::new(timeout, Duration::ZERO, 1), ProviderChain::with);
    Geocoder::new(GeocodingCache::new(store, cache_ttl), chain)
}

// =============================================================================
// Scripted provider
// =============================================================================

/// What a [`ScriptedProvider`] does on one call.
#[derive(Debug, Clone, Copy)]
pub enum Answer {
    Found(Coordinates),
    /// Resolve after a delay
    Slow(Coordinates, Duration),
    NoResult,
    RateLimited,
}

/// Provider that replays a fixed sequence of answers, then repeats the last.
pub struct ScriptedProvider {
    name: &'static str,
    answers: Vec<Answer>,
    calls: AtomicU32,
    queries: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new(name: &'static str, answers: &[Answer]) -> Arc<Self> {
        Arc::new(Self {
            name,
            answers: answers.to_vec(),
            calls: AtomicU32::new(0),
            queries: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn always(name: &'static str, answer: Answer) -> Arc<Self> {
        Self::new(name, &[answer])
    }

    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queries received so far.
    pub async fn queries(&self) -> Vec<String> {
        self.queries.lock().await.clone()
    }
}

#[async_trait]
impl GeocodingProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn geocode(&self, request: &GeocodeRequest) -> Result<Coordinates, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        self.queries.lock().await.push(request.query.clone());

        let answer = self
            .answers
            .get(n)
            .or_else(|| self.answers.last())
            .copied()
            .unwrap_or(Answer::NoResult);
        match answer {
            Answer::Found(coordinates) => Ok(coordinates),
            Answer::Slow(coordinates, delay) => {
                tokio::time::sleep(delay).await;
                Ok(coordinates)
            }
            Answer::NoResult => Err(ProviderError::NoResult),
            Answer::RateLimited => Err(ProviderError::RateLimited),
        }
    }
}

// =============================================================================
// Fault-injecting store
// =============================================================================

/// How one `write_geocoding` call misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// Report success without writing, so the read-back disagrees
    Drop,
    /// Fail with a conflict
    Reject,
    /// Land the write with coordinates shifted beyond the read-back tolerance
    Skew,
}

/// Shift applied by [`WriteFault::Skew`], in degrees on each axis.
pub const SKEW_DEGREES: f64 = 0.01;

/// [`MemoryStore`] wrapper that injects write faults and records the
/// checkpoint on disk each time a page is fetched.
pub struct FaultyStore {
    inner: MemoryStore,
    faults: Mutex<VecDeque<WriteFault>>,
    reject_all: AtomicBool,
    fail_fetches: AtomicBool,
    writes: AtomicU32,
    checkpoint_dir: Option<PathBuf>,
    checkpoints_at_fetch: Mutex<Vec<Option<Checkpoint>>>,
}

impl FaultyStore {
    #[must_use]
    pub fn new(customers: impl IntoIterator<Item = Customer>) -> Self {
        Self {
            inner: MemoryStore::with_customers(customers),
            faults: Mutex::new(VecDeque::new()),
            reject_all: AtomicBool::new(false),
            fail_fetches: AtomicBool::new(false),
            writes: AtomicU32::new(0),
            checkpoint_dir: None,
            checkpoints_at_fetch: Mutex::new(Vec::new()),
        }
    }

    /// Read `dir`'s checkpoint file on every page fetch.
    #[must_use]
    pub fn recording_checkpoints(mut self, dir: &Path) -> Self {
        self.checkpoint_dir = Some(dir.to_path_buf());
        self
    }

    /// Queue faults for the next writes, in order.
    pub async fn inject(&self, faults: &[WriteFault]) {
        self.faults.lock().await.extend(faults.iter().copied());
    }

    /// Fail every write from now on.
    pub fn reject_all_writes(&self) {
        self.reject_all.store(true, Ordering::SeqCst);
    }

    /// Fail every pending-customer fetch from now on.
    pub fn fail_fetches(&self) {
        self.fail_fetches.store(true, Ordering::SeqCst);
    }

    /// `write_geocoding` calls so far, faulty ones included.
    #[must_use]
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Checkpoint contents seen at each page fetch, `None` if absent.
    pub async fn checkpoints_at_fetch(&self) -> Vec<Option<Checkpoint>> {
        self.checkpoints_at_fetch.lock().await.clone()
    }

    #[must_use]
    pub const fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl CustomerStore for FaultyStore {
    async fn upsert_customers(&self, customers: &[Customer]) -> Result<u64, RepositoryError> {
        self.inner.upsert_customers(customers).await
    }

    async fn pending_for_geocoding(
        &self,
        after: Option<CustomerId>,
        limit: usize,
        max_attempts: i32,
    ) -> Result<Vec<Customer>, RepositoryError> {
        if let Some(dir) = &self.checkpoint_dir {
            let checkpoint = tokio::fs::read(dir.join(CHECKPOINT_FILE))
                .await
                .ok()
                .and_then(|bytes| serde_json::from_slice(&bytes).ok());
            self.checkpoints_at_fetch.lock().await.push(checkpoint);
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(RepositoryError::DataCorruption(
                "unreadable customer row".to_string(),
            ));
        }
        self.inner
            .pending_for_geocoding(after, limit, max_attempts)
            .await
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError> {
        self.inner.get_customer(id).await
    }

    async fn write_geocoding(&self, update: &GeocodingUpdate) -> Result<(), RepositoryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(RepositoryError::Conflict("write rejected".to_string()));
        }
        match self.faults.lock().await.pop_front() {
            Some(WriteFault::Drop) => Ok(()),
            Some(WriteFault::Reject) => Err(RepositoryError::Conflict("write rejected".to_string())),
            Some(WriteFault::Skew) => match update.coordinates() {
                Some(coordinates) => {
                    let skewed = GeocodingUpdate::completed(
                        update.customer_id(),
                        coordinates.offset(SKEW_DEGREES, SKEW_DEGREES),
                        update.attempts(),
                        update.attempted_at().unwrap_or_else(Utc::now),
                    );
                    self.inner.write_geocoding(&skewed).await
                }
                None => self.inner.write_geocoding(update).await,
            },
            None => self.inner.write_geocoding(update).await,
        }
    }

    async fn customer_ids(&self) -> Result<HashSet<CustomerId>, RepositoryError> {
        self.inner.customer_ids().await
    }

    async fn list_customers(
        &self,
        filter: &CustomerFilter,
    ) -> Result<Vec<Customer>, RepositoryError> {
        self.inner.list_customers(filter).await
    }

    async fn geocoding_stats(&self) -> Result<GeocodingStats, RepositoryError> {
        self.inner.geocoding_stats().await
    }

    async fn reset_failed(&self) -> Result<u64, RepositoryError> {
        self.inner.reset_failed().await
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.inner.ping().await
    }
}

#[async_trait]
impl GeocodeCacheStore for FaultyStore {
    async fn get_cached(&self, address: &str) -> Result<Option<CacheEntry>, RepositoryError> {
        self.inner.get_cached(address).await
    }

    async fn put_cached(&self, entry: &CacheEntry) -> Result<(), RepositoryError> {
        self.inner.put_cached(entry).await
    }

    async fn delete_cached(&self, address: &str) -> Result<(), RepositoryError> {
        self.inner.delete_cached(address).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.inner.purge_expired(now).await
    }
}

#[async_trait]
impl SyncLogStore for FaultyStore {
    async fn record_sync(&self, log: &SyncLog) -> Result<(), RepositoryError> {
        self.inner.record_sync(log).await
    }

    async fn recent_syncs(&self, limit: i64) -> Result<Vec<SyncLog>, RepositoryError> {
        self.inner.recent_syncs(limit).await
    }
}

#[async_trait]
impl SalesStore for FaultyStore {
    async fn upsert_sales(&self, sales: &[Sale]) -> Result<u64, RepositoryError> {
        self.inner.upsert_sales(sales).await
    }

    async fn sales_for_customer(&self, id: CustomerId) -> Result<Vec<Sale>, RepositoryError> {
        self.inner.sales_for_customer(id).await
    }
}
