//! Background geocoding jobs with status polling and cancellation.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::batch::{BatchDriver, BatchError, BatchOptions, BatchReport, JobStatus};
use crate::config::{BatchConfig, WriterConfig};
use crate::geocoding::Geocoder;
use crate::store::Store;
use crate::writer::PersistenceWriter;

/// Why waiting on a job produced no report.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("job task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Everything needed to build a batch driver, constructed once per process.
#[derive(Clone)]
pub struct GeocodingPipeline {
    store: Arc<dyn Store>,
    geocoder: Geocoder,
    writer: WriterConfig,
    batch: BatchConfig,
}

impl GeocodingPipeline {
    #[must_use]
    pub const fn new(
        store: Arc<dyn Store>,
        geocoder: Geocoder,
        writer: WriterConfig,
        batch: BatchConfig,
    ) -> Self {
        Self {
            store,
            geocoder,
            writer,
            batch,
        }
    }

    #[must_use]
    pub const fn geocoder(&self) -> &Geocoder {
        &self.geocoder
    }

    #[must_use]
    pub fn driver(&self, options: BatchOptions) -> BatchDriver {
        BatchDriver::new(
            Arc::clone(&self.store),
            self.geocoder.clone(),
            PersistenceWriter::new(Arc::clone(&self.store), self.writer.clone()),
            self.batch.clone(),
        )
        .with_options(options)
    }

    /// Build a driver and spawn it.
    #[must_use]
    pub fn spawn(&self, options: BatchOptions) -> JobHandle {
        GeocodingJob::spawn(self.driver(options))
    }
}

impl std::fmt::Debug for GeocodingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocodingPipeline")
            .field("geocoder", &self.geocoder)
            .field("writer", &self.writer)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}

pub struct GeocodingJob;

impl GeocodingJob {
    /// Run `driver` on its own task.
    #[must_use]
    pub fn spawn(driver: BatchDriver) -> JobHandle {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let status = driver.subscribe();

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            tracing::info!(job_id = %id, "Geocoding job started");
            let result = driver.run(token).await;
            tracing::info!(job_id = %id, ok = result.is_ok(), "Geocoding job finished");
            result
        });

        JobHandle {
            id,
            status,
            cancel,
            task,
        }
    }
}

/// Handle to a running or finished job.
pub struct JobHandle {
    id: Uuid,
    status: watch::Receiver<JobStatus>,
    cancel: CancellationToken,
    task: JoinHandle<Result<BatchReport, BatchError>>,
}

impl JobHandle {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// A receiver that can await status changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<JobStatus> {
        self.status.clone()
    }

    /// Ask the driver to stop after the current customer.
    pub fn cancel(&self) {
        tracing::info!(job_id = %self.id, "Cancelling geocoding job");
        self.cancel.cancel();
    }

    /// A token that cancels this job when triggered.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the job to reach a terminal state.
    ///
    /// # Errors
    ///
    /// Returns `JobError::Batch` if the run aborted and `JobError::Join` if
    /// the task panicked.
    pub async fn wait(self) -> Result<BatchReport, JobError> {
        Ok(self.task.await??)
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("state", &self.status.borrow().state)
            .finish_non_exhaustive()
    }
}
