//! Persistence writer: write geocoding results back to the customer record
//! and verify them.
//!
//! Writes are absolute (the attempt counter is computed from the record as
//! it was before the first try), so repeating a write never inflates the
//! counter. A customer whose save cannot be verified is restored to its
//! prior state and reported as a [`FailedSave`]; the batch carries on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rota_core::{Coordinates, Customer, CustomerId, GeocodingStatus, GeocodingUpdate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::config::WriterConfig;
use crate::db::RepositoryError;
use crate::geocoding::GeocodeOutcome;
use crate::store::Store;

/// A save that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedSave {
    pub customer_id: CustomerId,
    pub customer_name: String,
    /// Coordinates that could not be saved; `None` for a failed-status write
    pub coordinates: Option<Coordinates>,
    pub provider: Option<String>,
    pub error: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

/// Why one write attempt did not stick.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Store(#[from] RepositoryError),

    #[error("customer disappeared before read-back")]
    Missing,

    #[error(
        "read-back mismatch: expected {expected:?} ({expected_status}), found {found:?} ({found_status})"
    )]
    Mismatch {
        expected: Option<Coordinates>,
        expected_status: GeocodingStatus,
        found: Option<Coordinates>,
        found_status: GeocodingStatus,
    },
}

#[derive(Clone)]
pub struct PersistenceWriter {
    store: Arc<dyn Store>,
    config: WriterConfig,
}

impl PersistenceWriter {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: WriterConfig) -> Self {
        Self { store, config }
    }

    /// Save resolved coordinates as `completed`, verifying each write.
    ///
    /// # Errors
    ///
    /// Returns a [`FailedSave`] once every attempt failed; the record has
    /// been put back the way it was.
    #[instrument(skip_all, fields(customer_id = %customer.id, provider = %outcome.provider))]
    pub async fn save(
        &self,
        customer: &Customer,
        outcome: &GeocodeOutcome,
    ) -> Result<GeocodingUpdate, Box<FailedSave>> {
        let prior = self.prior_state(customer).await;
        let update = GeocodingUpdate::completed(
            customer.id,
            outcome.coordinates,
            prior.geocoding_attempts.saturating_add(1),
            Utc::now(),
        );

        match self.write_with_retries(&update, true).await {
            Ok(()) => Ok(update),
            Err((error, attempts)) => {
                self.restore(&prior).await;
                Err(Box::new(FailedSave {
                    customer_id: customer.id,
                    customer_name: customer.name.clone(),
                    coordinates: Some(outcome.coordinates),
                    provider: Some(outcome.provider.clone()),
                    error: error.to_string(),
                    attempts,
                    timestamp: Utc::now(),
                }))
            }
        }
    }

    /// Record a geocoding failure: status `failed`, no coordinates, one more
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns a [`FailedSave`] once every write attempt failed.
    #[instrument(skip_all, fields(customer_id = %customer.id))]
    pub async fn mark_failed(
        &self,
        customer: &Customer,
        reason: &str,
    ) -> Result<GeocodingUpdate, Box<FailedSave>> {
        let prior = self.prior_state(customer).await;
        let update = GeocodingUpdate::failed(
            customer.id,
            prior.geocoding_attempts.saturating_add(1),
            Utc::now(),
        );
        tracing::debug!(reason, "Marking customer as failed");

        self.write_with_retries(&update, false)
            .await
            .map(|()| update)
            .map_err(|(error, attempts)| {
                Box::new(FailedSave {
                    customer_id: customer.id,
                    customer_name: customer.name.clone(),
                    coordinates: None,
                    provider: None,
                    error: format!("{reason}; {error}"),
                    attempts,
                    timestamp: Utc::now(),
                })
            })
    }

    /// Current stored record, or the caller's copy when it cannot be read.
    async fn prior_state(&self, customer: &Customer) -> Customer {
        match self.store.get_customer(customer.id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => customer.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read prior state, using fetched record");
                customer.clone()
            }
        }
    }

    /// Bounded write loop. Returns the last error and the number of
    /// attempts made on exhaustion.
    async fn write_with_retries(
        &self,
        update: &GeocodingUpdate,
        verify: bool,
    ) -> Result<(), (WriteError, u32)> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = if verify {
                self.write_and_verify(update).await
            } else {
                self.store
                    .write_geocoding(update)
                    .await
                    .map_err(WriteError::from)
            };

            match result {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Write succeeded after retry");
                    }
                    return Ok(());
                }
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(attempt, max_attempts, error = %e, "Write failed, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "Write failed, giving up");
                    return Err((e, attempt));
                }
            }
        }
    }

    async fn write_and_verify(&self, update: &GeocodingUpdate) -> Result<(), WriteError> {
        self.store.write_geocoding(update).await?;

        let stored = self
            .store
            .get_customer(update.customer_id())
            .await?
            .ok_or(WriteError::Missing)?;

        let coordinates_match = match (update.coordinates(), stored.coordinates) {
            (Some(expected), Some(found)) => expected.approx_eq(&found, self.config.tolerance),
            (None, None) => true,
            _ => false,
        };

        if coordinates_match && stored.geocoding_status == update.status() {
            return Ok(());
        }

        Err(WriteError::Mismatch {
            expected: update.coordinates(),
            expected_status: update.status(),
            found: stored.coordinates,
            found_status: stored.geocoding_status,
        })
    }

    /// Put the geocoding columns back to `prior`. Best effort.
    async fn restore(&self, prior: &Customer) {
        match self
            .store
            .write_geocoding(&GeocodingUpdate::snapshot(prior))
            .await
        {
            Ok(()) => tracing::info!("Restored prior geocoding state"),
            Err(e) => tracing::error!(error = %e, "Failed to restore prior geocoding state"),
        }
    }
}

impl std::fmt::Debug for PersistenceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceWriter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::CustomerStore;

    fn config() -> WriterConfig {
        WriterConfig {
            retry_delay: Duration::from_millis(1),
            ..WriterConfig::default()
        }
    }

    fn outcome() -> GeocodeOutcome {
        GeocodeOutcome {
            coordinates: Coordinates::new(-3.7436, -38.5356),
            provider: "nominatim".to_string(),
            from_cache: false,
            provider_calls: 1,
        }
    }

    #[tokio::test]
    async fn test_save_completes_and_increments_once() {
        let customer = Customer::new(CustomerId::new(42), "Açaí do Bairro");
        let store = Arc::new(MemoryStore::with_customers([customer.clone()]));
        let writer = PersistenceWriter::new(store.clone(), config());

        let update = writer.save(&customer, &outcome()).await.unwrap();
        assert_eq!(update.attempts(), 1);

        let stored = store.get_customer(customer.id).await.unwrap().unwrap();
        assert_eq!(stored.geocoding_status, GeocodingStatus::Completed);
        assert_eq!(stored.geocoding_attempts, 1);
        assert!(stored.geocoding_state_is_consistent());
    }

    #[tokio::test]
    async fn test_save_unknown_customer_fails_after_retries() {
        let store = Arc::new(MemoryStore::new());
        let writer = PersistenceWriter::new(store, config());
        let customer = Customer::new(CustomerId::new(404), "Fantasma");

        let failed = writer.save(&customer, &outcome()).await.unwrap_err();
        assert_eq!(failed.attempts, 3);
        assert_eq!(failed.customer_id, customer.id);
        assert_eq!(failed.provider.as_deref(), Some("nominatim"));
    }

    #[tokio::test]
    async fn test_mark_failed() {
        let mut customer = Customer::new(CustomerId::new(7), "Sem CEP");
        customer.geocoding_attempts = 1;
        let store = Arc::new(MemoryStore::with_customers([customer.clone()]));
        let writer = PersistenceWriter::new(store.clone(), config());

        writer.mark_failed(&customer, "no usable address").await.unwrap();

        let stored = store.get_customer(customer.id).await.unwrap().unwrap();
        assert_eq!(stored.geocoding_status, GeocodingStatus::Failed);
        assert_eq!(stored.geocoding_attempts, 2);
        assert!(stored.coordinates.is_none());
    }
}
