//! Subcommand implementations.

pub mod geocode;
pub mod maintenance;
pub mod serve;
pub mod status;
pub mod sync;

use std::sync::Arc;

use rota_sync::batch::{BatchError, BatchState};
use rota_sync::config::{ConfigError, SyncConfig};
use rota_sync::db::{PgStore, RepositoryError, create_pool};
use rota_sync::geocoding::{Geocoder, ProviderError};
use rota_sync::job::{GeocodingPipeline, JobError};
use rota_sync::ploomes::PloomesError;
use rota_sync::store::Store;
use rota_sync::sync::SyncError;
use thiserror::Error;

/// Errors surfaced by a subcommand. Any of them exits with status 1.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("CRM client error: {0}")]
    Ploomes(#[from] PloomesError),

    #[error("geocoding setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("geocoding run ended {0}")]
    Incomplete(BatchState),
}

/// Connect to the configured database.
pub async fn connect(config: &SyncConfig) -> Result<Arc<dyn Store>, CommandError> {
    tracing::debug!("Connecting to database");
    let pool = create_pool(&config.database_url).await?;
    Ok(Arc::new(PgStore::new(pool)))
}

/// Geocoder and batch settings wired to `store`.
pub fn pipeline(
    config: &SyncConfig,
    store: Arc<dyn Store>,
) -> Result<GeocodingPipeline, CommandError> {
    let geocoder = Geocoder::from_config(&config.geocoding, Arc::clone(&store))?;
    Ok(GeocodingPipeline::new(
        store,
        geocoder,
        config.writer.clone(),
        config.batch.clone(),
    ))
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
