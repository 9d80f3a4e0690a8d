//! Append-only record of one batch execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::{SyncStatus, SyncType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: Uuid,
    pub sync_type: SyncType,
    pub records_fetched: i64,
    pub records_updated: i64,
    pub errors: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: SyncStatus,
    pub error_message: Option<String>,
}

impl SyncLog {
    /// Close a run that began at `started_at`.
    ///
    /// The status is `failed` when an error message is given, `partial` when
    /// some records errored, and `completed` otherwise.
    #[must_use]
    pub fn finish(
        sync_type: SyncType,
        started_at: DateTime<Utc>,
        records_fetched: i64,
        records_updated: i64,
        errors: i64,
        error_message: Option<String>,
    ) -> Self {
        let status = if error_message.is_some() {
            SyncStatus::Failed
        } else if errors > 0 {
            SyncStatus::Partial
        } else {
            SyncStatus::Completed
        };

        Self {
            id: Uuid::new_v4(),
            sync_type,
            records_fetched,
            records_updated,
            errors,
            started_at,
            completed_at: Utc::now(),
            status,
            error_message,
        }
    }

    /// Wall-clock duration of the run.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }
}
