//! In-process store.
//!
//! Mirrors the `PostgreSQL` semantics closely enough for the pipeline tests:
//! keyset ordering by id, address-change resets on upsert, and `NotFound` on
//! writes to unknown customers.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use rota_core::{Customer, CustomerId, DealId, GeocodingStatus, GeocodingUpdate, Sale, SyncLog};

use crate::db::RepositoryError;
use crate::store::{
    CacheEntry, CustomerFilter, CustomerStore, GeocodeCacheStore, GeocodingStats, SalesStore,
    SyncLogStore,
};

#[derive(Default)]
struct State {
    customers: BTreeMap<CustomerId, Customer>,
    cache: HashMap<String, CacheEntry>,
    sync_logs: Vec<SyncLog>,
    sales: BTreeMap<DealId, Sale>,
}

/// Store backed by in-memory maps.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `customers`, inserted as-is.
    #[must_use]
    pub fn with_customers(customers: impl IntoIterator<Item = Customer>) -> Self {
        let state = State {
            customers: customers.into_iter().map(|c| (c.id, c)).collect(),
            ..State::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    /// Every sync log recorded so far, oldest first.
    pub async fn sync_logs(&self) -> Vec<SyncLog> {
        self.state.read().await.sync_logs.clone()
    }

    /// Number of durable cache entries, expired ones included.
    pub async fn cache_len(&self) -> usize {
        self.state.read().await.cache.len()
    }
}

fn matches_search(customer: &Customer, term: &str) -> bool {
    let term = term.to_lowercase();
    [
        Some(customer.name.as_str()),
        customer.cnpj.as_deref(),
        customer.city.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(&term))
}

#[async_trait]
impl CustomerStore for MemoryStore {
    async fn upsert_customers(&self, customers: &[Customer]) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        for incoming in customers {
            let mut next = incoming.clone();
            if let Some(existing) = state.customers.get(&incoming.id) {
                next.created_at = existing.created_at;
                if existing.address_differs(incoming) {
                    next.coordinates = None;
                    next.geocoding_status = GeocodingStatus::Pending;
                    next.geocoding_attempts = 0;
                } else {
                    next.coordinates = existing.coordinates;
                    next.geocoding_status = existing.geocoding_status;
                    next.geocoding_attempts = existing.geocoding_attempts;
                }
                next.last_geocoding_attempt = existing.last_geocoding_attempt;
            }
            next.updated_at = Utc::now();
            state.customers.insert(next.id, next);
        }
        Ok(customers.len() as u64)
    }

    async fn pending_for_geocoding(
        &self,
        after: Option<CustomerId>,
        limit: usize,
        max_attempts: i32,
    ) -> Result<Vec<Customer>, RepositoryError> {
        let state = self.state.read().await;
        let page = state
            .customers
            .values()
            .filter(|c| after.is_none_or(|a| c.id > a))
            .filter(|c| c.geocoding_status == GeocodingStatus::Pending)
            .filter(|c| c.geocoding_attempts < max_attempts)
            .filter(|c| c.has_address_data())
            .take(limit)
            .cloned()
            .collect();
        Ok(page)
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError> {
        Ok(self.state.read().await.customers.get(&id).cloned())
    }

    async fn write_geocoding(&self, update: &GeocodingUpdate) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let customer = state
            .customers
            .get_mut(&update.customer_id())
            .ok_or(RepositoryError::NotFound)?;
        update.apply_to(customer);
        Ok(())
    }

    async fn customer_ids(&self) -> Result<HashSet<CustomerId>, RepositoryError> {
        Ok(self.state.read().await.customers.keys().copied().collect())
    }

    async fn list_customers(
        &self,
        filter: &CustomerFilter,
    ) -> Result<Vec<Customer>, RepositoryError> {
        let state = self.state.read().await;
        let mut matching: Vec<&Customer> = state
            .customers
            .values()
            .filter(|c| filter.status.is_none_or(|s| c.geocoding_status == s))
            .filter(|c| filter.search_term().is_none_or(|t| matches_search(c, t)))
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        let offset = usize::try_from(filter.effective_offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(filter.effective_limit()).unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn geocoding_stats(&self) -> Result<GeocodingStats, RepositoryError> {
        let state = self.state.read().await;
        let mut stats = GeocodingStats::default();
        for c in state.customers.values() {
            stats.total += 1;
            match c.geocoding_status {
                GeocodingStatus::Pending => stats.pending += 1,
                GeocodingStatus::Failed => stats.failed += 1,
                GeocodingStatus::Completed => {}
            }
            if c.coordinates.is_some() {
                stats.geocoded += 1;
            } else {
                stats.without_coordinates += 1;
                if c.postal_code.is_some() {
                    stats.with_cep_without_coordinates += 1;
                } else {
                    stats.without_cep_without_coordinates += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn reset_failed(&self) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut reset = 0;
        for c in state.customers.values_mut() {
            if c.geocoding_status == GeocodingStatus::Failed {
                c.geocoding_status = GeocodingStatus::Pending;
                c.geocoding_attempts = 0;
                c.coordinates = None;
                c.updated_at = Utc::now();
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[async_trait]
impl GeocodeCacheStore for MemoryStore {
    async fn get_cached(&self, address: &str) -> Result<Option<CacheEntry>, RepositoryError> {
        Ok(self.state.read().await.cache.get(address).cloned())
    }

    async fn put_cached(&self, entry: &CacheEntry) -> Result<(), RepositoryError> {
        self.state
            .write()
            .await
            .cache
            .insert(entry.address.clone(), entry.clone());
        Ok(())
    }

    async fn delete_cached(&self, address: &str) -> Result<(), RepositoryError> {
        self.state.write().await.cache.remove(address);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let before = state.cache.len();
        state.cache.retain(|_, entry| !entry.is_expired_at(now));
        Ok((before - state.cache.len()) as u64)
    }
}

#[async_trait]
impl SyncLogStore for MemoryStore {
    async fn record_sync(&self, log: &SyncLog) -> Result<(), RepositoryError> {
        self.state.write().await.sync_logs.push(log.clone());
        Ok(())
    }

    async fn recent_syncs(&self, limit: i64) -> Result<Vec<SyncLog>, RepositoryError> {
        let state = self.state.read().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let mut logs = state.sync_logs.clone();
        logs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        logs.truncate(limit);
        Ok(logs)
    }
}

#[async_trait]
impl SalesStore for MemoryStore {
    async fn upsert_sales(&self, sales: &[Sale]) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(orphan) = sales
            .iter()
            .find(|s| !state.customers.contains_key(&s.customer_id))
        {
            return Err(RepositoryError::Conflict(format!(
                "deal {} references unknown customer {}",
                orphan.deal_id, orphan.customer_id
            )));
        }
        for sale in sales {
            state.sales.insert(sale.deal_id, sale.clone());
        }
        Ok(sales.len() as u64)
    }

    async fn sales_for_customer(&self, id: CustomerId) -> Result<Vec<Sale>, RepositoryError> {
        let state = self.state.read().await;
        let mut sales: Vec<Sale> = state
            .sales
            .values()
            .filter(|s| s.customer_id == id)
            .cloned()
            .collect();
        sales.sort_by(|a, b| {
            b.deal_created_at
                .cmp(&a.deal_created_at)
                .then(b.deal_id.cmp(&a.deal_id))
        });
        Ok(sales)
    }
}
