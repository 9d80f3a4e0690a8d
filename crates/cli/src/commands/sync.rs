//! `run-sync`: CRM import.

use std::sync::Arc;

use rota_sync::config::SyncConfig;
use rota_sync::ploomes::PloomesClient;
use rota_sync::sync::CustomerSync;

use super::{CommandError, connect};

async fn importer(config: &SyncConfig) -> Result<CustomerSync, CommandError> {
    let client = PloomesClient::new(config.ploomes()?)?;
    let store = connect(config).await?;
    Ok(CustomerSync::new(
        Arc::new(client),
        store,
        config.import.clone(),
    ))
}

/// Import every tagged contact as a customer.
pub async fn customers(config: &SyncConfig) -> Result<(), CommandError> {
    let summary = importer(config).await?.sync_customers().await?;
    tracing::info!(
        fetched = summary.fetched,
        upserted = summary.upserted,
        skipped = summary.skipped,
        errors = summary.errors,
        "Customers imported"
    );
    Ok(())
}

/// Import deals of known customers.
pub async fn sales(config: &SyncConfig) -> Result<(), CommandError> {
    let summary = importer(config).await?.sync_sales().await?;
    tracing::info!(
        fetched = summary.fetched,
        upserted = summary.upserted,
        skipped = summary.skipped,
        errors = summary.errors,
        "Sales imported"
    );
    Ok(())
}
