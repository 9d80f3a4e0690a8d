//! CRM import: contacts into customers, deals into sales.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use rota_core::{Customer, Sale, SyncLog, SyncType};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::config::ImportConfig;
use crate::db::RepositoryError;
use crate::ploomes::{CrmSource, PloomesError, customer_from_contact, sale_from_deal};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("CRM error: {0}")]
    Crm(#[from] PloomesError),

    #[error("store error: {0}")]
    Store(#[from] RepositoryError),
}

/// Counters of one import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncSummary {
    pub fetched: usize,
    pub upserted: usize,
    pub errors: usize,
    /// Records dropped before the upsert (duplicates, deals without a known customer)
    pub skipped: usize,
}

pub struct CustomerSync {
    crm: Arc<dyn CrmSource>,
    store: Arc<dyn Store>,
    config: ImportConfig,
}

impl CustomerSync {
    #[must_use]
    pub fn new(crm: Arc<dyn CrmSource>, store: Arc<dyn Store>, config: ImportConfig) -> Self {
        Self { crm, store, config }
    }

    /// Import every customer contact.
    ///
    /// Chunks are upserted `concurrent_chunks` at a time; a failed chunk is
    /// counted and the rest carry on.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Crm` if the contacts cannot be fetched. A failed
    /// sync log is recorded first.
    #[instrument(skip(self))]
    pub async fn sync_customers(&self) -> Result<SyncSummary, SyncError> {
        let started_at = Utc::now();

        let contacts = match self.crm.list_customer_contacts().await {
            Ok(contacts) => contacts,
            Err(e) => {
                self.record(SyncLog::finish(
                    SyncType::Customers,
                    started_at,
                    0,
                    0,
                    0,
                    Some(e.to_string()),
                ))
                .await;
                return Err(e.into());
            }
        };

        let customers = dedupe_by(contacts.iter().map(customer_from_contact), |c| c.id);
        let mut summary = SyncSummary {
            fetched: contacts.len(),
            skipped: contacts.len() - customers.len(),
            ..SyncSummary::default()
        };
        if summary.skipped > 0 {
            tracing::warn!(duplicates = summary.skipped, "CRM returned duplicate contacts");
        }

        let chunks: Vec<&[Customer]> = customers
            .chunks(self.config.upsert_chunk_size.max(1))
            .collect();
        for wave in chunks.chunks(self.config.concurrent_chunks.max(1)) {
            let results = join_all(wave.iter().map(|chunk| self.upsert_chunk(chunk))).await;
            for (written, failed) in results {
                summary.upserted += written;
                summary.errors += failed;
            }
            tracing::info!(
                upserted = summary.upserted,
                errors = summary.errors,
                total = customers.len(),
                "Customer upsert progress"
            );
        }

        self.record(SyncLog::finish(
            SyncType::Customers,
            started_at,
            to_i64(summary.fetched),
            to_i64(summary.upserted),
            to_i64(summary.errors),
            None,
        ))
        .await;

        tracing::info!(
            fetched = summary.fetched,
            upserted = summary.upserted,
            errors = summary.errors,
            "Customer sync finished"
        );
        Ok(summary)
    }

    /// Import every deal whose contact is a known customer. Deals repeated
    /// across pages are upserted once.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Crm` if the deals cannot be fetched and
    /// `SyncError::Store` if the known customer ids cannot be read. A failed
    /// sync log is recorded first.
    #[instrument(skip(self))]
    pub async fn sync_sales(&self) -> Result<SyncSummary, SyncError> {
        let started_at = Utc::now();

        let fetched = async {
            let deals = self.crm.list_deals().await?;
            let known = self.store.customer_ids().await?;
            Ok::<_, SyncError>((deals, known))
        }
        .await;

        let (deals, known) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                self.record(SyncLog::finish(
                    SyncType::Sales,
                    started_at,
                    0,
                    0,
                    0,
                    Some(e.to_string()),
                ))
                .await;
                return Err(e);
            }
        };

        let sales: Vec<Sale> = dedupe_by(
            deals
                .iter()
                .filter_map(sale_from_deal)
                .filter(|sale| known.contains(&sale.customer_id)),
            |sale| sale.deal_id,
        );
        let mut summary = SyncSummary {
            fetched: deals.len(),
            skipped: deals.len() - sales.len(),
            ..SyncSummary::default()
        };
        if summary.skipped > 0 {
            tracing::info!(
                skipped = summary.skipped,
                "Skipped deals without a known customer"
            );
        }

        for chunk in sales.chunks(self.config.sales_chunk_size.max(1)) {
            match self.store.upsert_sales(chunk).await {
                Ok(_) => summary.upserted += chunk.len(),
                Err(e) => {
                    tracing::error!(error = %e, size = chunk.len(), "Sales chunk upsert failed");
                    summary.errors += chunk.len();
                }
            }
        }

        self.record(SyncLog::finish(
            SyncType::Sales,
            started_at,
            to_i64(summary.fetched),
            to_i64(summary.upserted),
            to_i64(summary.errors),
            None,
        ))
        .await;

        tracing::info!(
            fetched = summary.fetched,
            upserted = summary.upserted,
            skipped = summary.skipped,
            errors = summary.errors,
            "Sales sync finished"
        );
        Ok(summary)
    }

    /// Returns `(written, failed)` for one chunk.
    async fn upsert_chunk(&self, chunk: &[Customer]) -> (usize, usize) {
        match self.store.upsert_customers(chunk).await {
            Ok(_) => (chunk.len(), 0),
            Err(e) => {
                let first = chunk.first().map(|c| c.id);
                tracing::error!(error = %e, size = chunk.len(), first_id = ?first, "Customer chunk upsert failed");
                (0, chunk.len())
            }
        }
    }

    async fn record(&self, log: SyncLog) {
        if let Err(e) = self.store.record_sync(&log).await {
            tracing::warn!(error = %e, "Failed to record sync log");
        }
    }
}

impl std::fmt::Debug for CustomerSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomerSync")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Keep the last record per key, ordered by key. A single upsert statement
/// cannot touch the same row twice.
fn dedupe_by<T, K: Ord>(items: impl Iterator<Item = T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items
        .map(|item| (key(&item), item))
        .collect::<BTreeMap<K, T>>()
        .into_values()
        .collect()
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
