//! `serve`: the dashboard API.

use rota_sync::api::{AppState, app};
use rota_sync::config::SyncConfig;

use super::{CommandError, connect, pipeline, shutdown_signal};

pub async fn run(config: &SyncConfig) -> Result<(), CommandError> {
    let store = connect(config).await?;

    // The API stays up read-only if the geocoder cannot be built
    let pipeline = match pipeline(config, store.clone()) {
        Ok(pipeline) => Some(pipeline),
        Err(e) => {
            tracing::error!("Geocoding jobs disabled: {e}");
            None
        }
    };

    let state = AppState::new(store, pipeline);
    let router = app(state.clone());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Dashboard API listening on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown signal received, stopping geocoding job");
    state.cancel_current_job().await;
    Ok(())
}
