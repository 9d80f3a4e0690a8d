//! Sync log repository (append-only).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use rota_core::{SyncLog, SyncStatus, SyncType};

use super::RepositoryError;

#[derive(Debug, sqlx::FromRow)]
struct SyncLogRow {
    id: Uuid,
    sync_type: SyncType,
    records_fetched: i64,
    records_updated: i64,
    errors: i64,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    status: SyncStatus,
    error_message: Option<String>,
}

impl From<SyncLogRow> for SyncLog {
    fn from(row: SyncLogRow) -> Self {
        Self {
            id: row.id,
            sync_type: row.sync_type,
            records_fetched: row.records_fetched,
            records_updated: row.records_updated,
            errors: row.errors,
            started_at: row.started_at,
            completed_at: row.completed_at,
            status: row.status,
            error_message: row.error_message,
        }
    }
}

/// Repository for the `sync_logs` table.
pub struct SyncLogRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> SyncLogRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn insert(&self, log: &SyncLog) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO sync_logs (id, sync_type, records_fetched, records_updated, errors, \
             started_at, completed_at, status, error_message) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(log.id)
        .bind(log.sync_type)
        .bind(log.records_fetched)
        .bind(log.records_updated)
        .bind(log.errors)
        .bind(log.started_at)
        .bind(log.completed_at)
        .bind(log.status)
        .bind(&log.error_message)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn recent(&self, limit: i64) -> Result<Vec<SyncLog>, RepositoryError> {
        let rows = sqlx::query_as::<_, SyncLogRow>(
            "SELECT id, sync_type, records_fetched, records_updated, errors, started_at, \
             completed_at, status, error_message \
             FROM sync_logs ORDER BY started_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
