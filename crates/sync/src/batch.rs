//! Batch driver: walk the pending customers page by page, geocode each one,
//! persist the result and checkpoint progress to disk.
//!
//! ```text
//! Idle -> Fetching -> Processing -> Checkpointing -> Fetching ...
//!                                                 -> Completed | Aborted | Cancelled
//! ```
//!
//! Processing is strictly sequential. Per-customer failures are counted and
//! reported; only a failure to fetch work aborts the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rota_core::{Coordinates, Customer, CustomerId, GeocodingStatus, SyncLog, SyncType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::BatchConfig;
use crate::db::RepositoryError;
use crate::geocoding::{GeocodeRequest, Geocoder};
use crate::store::Store;
use crate::writer::{FailedSave, PersistenceWriter};

pub const CHECKPOINT_FILE: &str = "geocoding-checkpoint.json";
pub const BACKUP_FILE: &str = "geocoding-backup.json";

/// Recorded when a customer has nothing a provider could resolve.
const NO_ADDRESS: &str = "no usable address";

#[derive(Debug, Error)]
pub enum BatchError {
    /// Work could not be fetched; the run stopped.
    #[error("batch aborted after {processed} records: {source}")]
    Aborted {
        processed: usize,
        #[source]
        source: RepositoryError,
    },

    #[error("checkpoint I/O error: {0}")]
    Checkpoint(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    #[default]
    Idle,
    Fetching,
    Processing,
    Checkpointing,
    Completed,
    Aborted,
    Cancelled,
}

impl BatchState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Cancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Processing => "processing",
            Self::Checkpointing => "checkpointing",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters shared by the checkpoint, the backup and the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub errors: usize,
    /// Resolutions served from the cache
    pub cached: usize,
    pub failed_saves: usize,
}

/// Live view of a run, published on a watch channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStatus {
    pub state: BatchState,
    pub page: u32,
    #[serde(flatten)]
    pub summary: BatchSummary,
    pub last_customer_id: Option<CustomerId>,
    pub started_at: Option<DateTime<Utc>>,
}

/// On-disk progress marker for resuming an interrupted run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub processed_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub last_customer_id: Option<CustomerId>,
    pub timestamp: DateTime<Utc>,
    pub estimated_time_remaining_secs: Option<u64>,
}

impl Checkpoint {
    /// Read the checkpoint in `log_dir`, if there is one.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::Checkpoint` if the file exists but cannot be read
    /// or parsed.
    pub async fn load(log_dir: &Path) -> Result<Option<Self>, BatchError> {
        let path = log_dir.join(CHECKPOINT_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| BatchError::Checkpoint(std::io::Error::other(e)))
    }
}

/// Outcome of one customer, kept for the backup file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerResult {
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub status: GeocodingStatus,
    pub coordinates: Option<Coordinates>,
    pub provider: Option<String>,
    pub from_cache: bool,
    pub error: Option<String>,
}

#[derive(Serialize)]
struct Backup<'a> {
    timestamp: DateTime<Utc>,
    total_results: usize,
    summary: BatchSummary,
    results: &'a [CustomerResult],
}

/// Final account of a run, also written as the JSON report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub state: BatchState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: BatchSummary,
    pub failed_saves: Vec<FailedSave>,
    #[serde(skip)]
    pub report_path: Option<PathBuf>,
}

/// Per-run knobs that do not come from the environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Stop after this many customers
    pub limit: Option<usize>,
    /// Continue after the checkpoint's last customer
    pub resume: bool,
}

pub struct BatchDriver {
    store: Arc<dyn Store>,
    geocoder: Geocoder,
    writer: PersistenceWriter,
    config: BatchConfig,
    options: BatchOptions,
    status: watch::Sender<JobStatus>,
}

/// Mutable state of one run.
#[derive(Default)]
struct Run {
    summary: BatchSummary,
    results: Vec<CustomerResult>,
    failed_saves: Vec<FailedSave>,
    last_customer_id: Option<CustomerId>,
    last_checkpoint_at: usize,
    /// Records processed by this process (excludes resumed counts)
    processed_here: usize,
    pending_at_start: Option<usize>,
}

impl BatchDriver {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        geocoder: Geocoder,
        writer: PersistenceWriter,
        config: BatchConfig,
    ) -> Self {
        let (status, _) = watch::channel(JobStatus::default());
        Self {
            store,
            geocoder,
            writer,
            config,
            options: BatchOptions::default(),
            status,
        }
    }

    #[must_use]
    pub const fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Receiver for live status updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    /// Run to a terminal state.
    ///
    /// The report, the final checkpoint and a `geocoding` sync log are
    /// written whatever the terminal state.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::Aborted` if pending customers could not be
    /// fetched, and `BatchError::Checkpoint` if the log directory cannot be
    /// created or the resume checkpoint cannot be read.
    #[instrument(skip_all, fields(page_size = self.config.page_size))]
    pub async fn run(self, cancel: CancellationToken) -> Result<BatchReport, BatchError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        tokio::fs::create_dir_all(&self.config.log_dir).await?;

        let mut run = Run::default();
        if self.options.resume {
            self.seed_from_checkpoint(&mut run).await?;
        }
        run.pending_at_start = match self.store.geocoding_stats().await {
            Ok(stats) => usize::try_from(stats.pending).ok(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not count pending customers");
                None
            }
        };

        self.status.send_modify(|s| {
            s.started_at = Some(started_at);
            s.summary = run.summary;
            s.last_customer_id = run.last_customer_id;
        });
        tracing::info!(
            pending = ?run.pending_at_start,
            resume_after = ?run.last_customer_id,
            limit = ?self.options.limit,
            "Starting geocoding batch"
        );

        let mut page_no: u32 = 0;
        let mut abort: Option<RepositoryError> = None;

        let state = loop {
            if cancel.is_cancelled() {
                break BatchState::Cancelled;
            }

            let want = self
                .options
                .limit
                .map_or(self.config.page_size, |limit| {
                    self.config
                        .page_size
                        .min(limit.saturating_sub(run.processed_here))
                });
            if want == 0 {
                break BatchState::Completed;
            }

            self.set_state(BatchState::Fetching);
            let page = match self
                .store
                .pending_for_geocoding(run.last_customer_id, want, self.config.max_attempts)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to fetch pending customers");
                    abort = Some(e);
                    break BatchState::Aborted;
                }
            };
            if page.is_empty() {
                break BatchState::Completed;
            }

            page_no += 1;
            let last_page = page.len() < want;
            self.status.send_modify(|s| s.page = page_no);
            self.set_state(BatchState::Processing);
            tracing::debug!(page = page_no, size = page.len(), "Processing page");

            let mut cancelled = false;
            for customer in &page {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                self.process(customer, &mut run, &cancel).await;
                self.publish(&run);

                if run.summary.processed - run.last_checkpoint_at
                    >= self.config.checkpoint_interval.max(1)
                {
                    self.checkpoint(&mut run, clock.elapsed()).await;
                    self.set_state(BatchState::Processing);
                }
            }
            if cancelled {
                break BatchState::Cancelled;
            }

            self.checkpoint(&mut run, clock.elapsed()).await;
            tracing::info!(
                page = page_no,
                processed = run.summary.processed,
                succeeded = run.summary.succeeded,
                errors = run.summary.errors,
                cached = run.summary.cached,
                "Page done"
            );

            if last_page {
                break BatchState::Completed;
            }
        };

        let report = self.finish(state, started_at, run, clock.elapsed(), abort.as_ref()).await;

        match abort {
            Some(source) => Err(BatchError::Aborted {
                processed: report.summary.processed,
                source,
            }),
            None => Ok(report),
        }
    }

    async fn seed_from_checkpoint(&self, run: &mut Run) -> Result<(), BatchError> {
        match Checkpoint::load(&self.config.log_dir).await? {
            Some(checkpoint) => {
                tracing::info!(
                    last_customer_id = ?checkpoint.last_customer_id,
                    processed = checkpoint.processed_count,
                    "Resuming from checkpoint"
                );
                run.last_customer_id = checkpoint.last_customer_id;
                run.summary.processed = checkpoint.processed_count;
                run.summary.succeeded = checkpoint.success_count;
                run.summary.errors = checkpoint.error_count;
                run.last_checkpoint_at = checkpoint.processed_count;
            }
            None => tracing::warn!("No checkpoint found, starting from the beginning"),
        }
        Ok(())
    }

    async fn process(&self, customer: &Customer, run: &mut Run, cancel: &CancellationToken) {
        let mut result = CustomerResult {
            customer_id: customer.id,
            customer_name: customer.name.clone(),
            status: GeocodingStatus::Failed,
            coordinates: None,
            provider: None,
            from_cache: false,
            error: None,
        };

        let provider_calls = match GeocodeRequest::from_customer(customer) {
            None => {
                tracing::debug!(customer_id = %customer.id, "Skipping customer without address");
                self.record_failure(customer, NO_ADDRESS, run, &mut result)
                    .await;
                0
            }
            Some(request) => match self.geocoder.geocode(&request).await {
                Ok(outcome) => {
                    result.coordinates = Some(outcome.coordinates);
                    result.provider = Some(outcome.provider.clone());
                    result.from_cache = outcome.from_cache;
                    if outcome.from_cache {
                        run.summary.cached += 1;
                    }

                    match self.writer.save(customer, &outcome).await {
                        Ok(_) => {
                            run.summary.succeeded += 1;
                            result.status = GeocodingStatus::Completed;
                            tracing::debug!(
                                customer_id = %customer.id,
                                provider = %outcome.provider,
                                "Geocoded"
                            );
                        }
                        Err(failed) => {
                            run.summary.errors += 1;
                            run.summary.failed_saves += 1;
                            result.status = customer.geocoding_status;
                            result.error = Some(failed.error.clone());
                            run.failed_saves.push(*failed);
                        }
                    }
                    outcome.provider_calls
                }
                Err(e) => {
                    let reason = e.to_string();
                    tracing::info!(customer_id = %customer.id, %reason, "Geocoding failed");
                    self.record_failure(customer, &reason, run, &mut result)
                        .await;
                    e.provider_calls()
                }
            },
        };

        run.summary.processed += 1;
        run.processed_here += 1;
        run.last_customer_id = Some(customer.id);
        run.results.push(result);

        if provider_calls > 0 {
            self.pause(cancel).await;
        }
    }

    async fn record_failure(
        &self,
        customer: &Customer,
        reason: &str,
        run: &mut Run,
        result: &mut CustomerResult,
    ) {
        run.summary.errors += 1;
        result.error = Some(reason.to_string());
        if let Err(failed) = self.writer.mark_failed(customer, reason).await {
            run.summary.failed_saves += 1;
            result.status = customer.geocoding_status;
            run.failed_saves.push(*failed);
        }
    }

    /// Inter-request delay, cut short by cancellation.
    async fn pause(&self, cancel: &CancellationToken) {
        let delay = self.config.delay_between_requests;
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => {}
        }
    }

    fn set_state(&self, state: BatchState) {
        self.status.send_modify(|s| s.state = state);
    }

    fn publish(&self, run: &Run) {
        self.status.send_modify(|s| {
            s.summary = run.summary;
            s.last_customer_id = run.last_customer_id;
        });
    }

    /// Write the checkpoint and the backup. Failures are logged; the run
    /// goes on without them.
    async fn checkpoint(&self, run: &mut Run, elapsed: Duration) {
        if run.summary.processed == run.last_checkpoint_at && run.last_checkpoint_at != 0 {
            return;
        }
        self.set_state(BatchState::Checkpointing);

        let now = Utc::now();
        let checkpoint = Checkpoint {
            processed_count: run.summary.processed,
            success_count: run.summary.succeeded,
            error_count: run.summary.errors,
            last_customer_id: run.last_customer_id,
            timestamp: now,
            estimated_time_remaining_secs: estimate_remaining(run, elapsed),
        };
        let backup = Backup {
            timestamp: now,
            total_results: run.results.len(),
            summary: run.summary,
            results: &run.results,
        };

        let dir = &self.config.log_dir;
        if let Err(e) = write_json_atomic(&dir.join(CHECKPOINT_FILE), &checkpoint).await {
            tracing::warn!(error = %e, "Failed to write checkpoint");
        }
        if let Err(e) = write_json_atomic(&dir.join(BACKUP_FILE), &backup).await {
            tracing::warn!(error = %e, "Failed to write backup");
        }

        run.last_checkpoint_at = run.summary.processed;
        tracing::info!(
            processed = checkpoint.processed_count,
            last_customer_id = ?checkpoint.last_customer_id,
            eta_secs = ?checkpoint.estimated_time_remaining_secs,
            "Checkpoint saved"
        );
    }

    async fn finish(
        &self,
        state: BatchState,
        started_at: DateTime<Utc>,
        mut run: Run,
        elapsed: Duration,
        abort: Option<&RepositoryError>,
    ) -> BatchReport {
        self.checkpoint(&mut run, elapsed).await;

        let finished_at = Utc::now();
        let mut report = BatchReport {
            state,
            started_at,
            finished_at,
            summary: run.summary,
            failed_saves: run.failed_saves,
            report_path: None,
        };

        let path = self.config.log_dir.join(format!(
            "geocoding-report-{}.json",
            finished_at.format("%Y%m%dT%H%M%S%.3fZ")
        ));
        match write_json_atomic(&path, &report).await {
            Ok(()) => report.report_path = Some(path),
            Err(e) => tracing::warn!(error = %e, "Failed to write report"),
        }

        let error_message = match state {
            BatchState::Aborted => abort.map(ToString::to_string),
            BatchState::Cancelled => Some("cancelled".to_string()),
            _ => None,
        };
        let log = SyncLog::finish(
            SyncType::Geocoding,
            started_at,
            to_i64(report.summary.processed),
            to_i64(report.summary.succeeded),
            to_i64(report.summary.errors),
            error_message,
        );
        if let Err(e) = self.store.record_sync(&log).await {
            tracing::warn!(error = %e, "Failed to record sync log");
        }

        self.status.send_modify(|s| {
            s.state = state;
            s.summary = report.summary;
        });

        if state != BatchState::Completed {
            tracing::error!(
                state = %state,
                processed = report.summary.processed,
                errors = report.summary.errors,
                failed_saves = report.summary.failed_saves,
                "Geocoding batch did not complete"
            );
        } else {
            tracing::info!(
                processed = report.summary.processed,
                succeeded = report.summary.succeeded,
                errors = report.summary.errors,
                cached = report.summary.cached,
                failed_saves = report.summary.failed_saves,
                "Geocoding batch completed"
            );
        }

        report
    }
}

impl std::fmt::Debug for BatchDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDriver")
            .field("config", &self.config)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_precision_loss)] // record counts stay far below 2^52
fn estimate_remaining(run: &Run, elapsed: Duration) -> Option<u64> {
    let pending = run.pending_at_start?;
    if run.processed_here == 0 {
        return None;
    }
    let remaining = pending.saturating_sub(run.processed_here);
    let per_record = elapsed.as_secs_f64() / run.processed_here as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let secs = (per_record * remaining as f64).round() as u64;
    Some(secs)
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Serialize `value` next to `path` and rename it into place.
async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
