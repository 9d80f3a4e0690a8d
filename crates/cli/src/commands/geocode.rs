//! `run-geocode`: one geocoding batch in the foreground.

use rota_sync::batch::{BatchOptions, BatchState};
use rota_sync::config::SyncConfig;

use super::{CommandError, connect, pipeline, shutdown_signal};

/// Run a batch until it completes, aborts or the process is signalled.
///
/// A signal cancels the batch; the driver still writes its checkpoint and
/// report before this returns `CommandError::Incomplete`.
pub async fn run(
    config: &SyncConfig,
    limit: Option<usize>,
    resume: bool,
) -> Result<(), CommandError> {
    let store = connect(config).await?;
    let job = pipeline(config, store)?.spawn(BatchOptions { limit, resume });

    let cancel = job.cancellation_token();
    let signal = tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("Signal received, cancelling geocoding batch");
        cancel.cancel();
    });

    let report = job.wait().await;
    signal.abort();
    let report = report?;

    tracing::info!(
        state = %report.state,
        processed = report.summary.processed,
        succeeded = report.summary.succeeded,
        errors = report.summary.errors,
        cached = report.summary.cached,
        failed_saves = report.summary.failed_saves,
        report = ?report.report_path,
        "Geocoding batch finished"
    );
    for failed in &report.failed_saves {
        tracing::warn!(
            customer_id = %failed.customer_id,
            attempts = failed.attempts,
            error = %failed.error,
            "Customer could not be saved"
        );
    }

    match report.state {
        BatchState::Completed => Ok(()),
        state => Err(CommandError::Incomplete(state)),
    }
}
