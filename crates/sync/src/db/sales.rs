//! Sales repository.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::instrument;

use rota_core::{CustomerId, DealId, DealStatus, OwnerId, Sale, StageId};

use super::{RepositoryError, map_write_error};

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    ploomes_deal_id: DealId,
    customer_id: CustomerId,
    owner_id: Option<OwnerId>,
    stage_id: Option<StageId>,
    title: Option<String>,
    deal_value: Decimal,
    status: DealStatus,
    deal_created_at: Option<DateTime<Utc>>,
    deal_updated_at: Option<DateTime<Utc>>,
}

impl From<SaleRow> for Sale {
    fn from(row: SaleRow) -> Self {
        Self {
            deal_id: row.ploomes_deal_id,
            customer_id: row.customer_id,
            owner_id: row.owner_id,
            stage_id: row.stage_id,
            title: row.title,
            deal_value: row.deal_value,
            status: row.status,
            deal_created_at: row.deal_created_at,
            deal_updated_at: row.deal_updated_at,
        }
    }
}

/// Repository for the `sales` table.
pub struct SalesRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> SalesRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert or update a batch of sales keyed by deal id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if a sale references an unknown
    /// customer, `RepositoryError::Database` for other failures.
    #[instrument(skip(self, sales), fields(count = sales.len()))]
    pub async fn upsert_many(&self, sales: &[Sale]) -> Result<u64, RepositoryError> {
        if sales.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO sales (ploomes_deal_id, customer_id, owner_id, stage_id, title, \
             deal_value, status, deal_created_at, deal_updated_at) ",
        );

        builder.push_values(sales, |mut b, s| {
            b.push_bind(s.deal_id)
                .push_bind(s.customer_id)
                .push_bind(s.owner_id)
                .push_bind(s.stage_id)
                .push_bind(&s.title)
                .push_bind(s.deal_value)
                .push_bind(s.status)
                .push_bind(s.deal_created_at)
                .push_bind(s.deal_updated_at);
        });

        builder.push(
            " ON CONFLICT (ploomes_deal_id) DO UPDATE SET \
             customer_id = EXCLUDED.customer_id, \
             owner_id = EXCLUDED.owner_id, \
             stage_id = EXCLUDED.stage_id, \
             title = EXCLUDED.title, \
             deal_value = EXCLUDED.deal_value, \
             status = EXCLUDED.status, \
             deal_created_at = EXCLUDED.deal_created_at, \
             deal_updated_at = EXCLUDED.deal_updated_at, \
             updated_at = now()",
        );

        let result = builder
            .build()
            .execute(self.pool)
            .await
            .map_err(map_write_error)?;

        Ok(result.rows_affected())
    }

    /// Sales of one customer, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn for_customer(&self, id: CustomerId) -> Result<Vec<Sale>, RepositoryError> {
        let rows = sqlx::query_as::<_, SaleRow>(
            "SELECT ploomes_deal_id, customer_id, owner_id, stage_id, title, deal_value, status, \
             deal_created_at, deal_updated_at \
             FROM sales WHERE customer_id = $1 \
             ORDER BY deal_created_at DESC NULLS LAST, ploomes_deal_id DESC",
        )
        .bind(id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
