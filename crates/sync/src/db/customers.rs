//! Customer repository for database operations.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::instrument;

use rota_core::{
    Coordinates, Customer, CustomerId, GeocodingStatus, GeocodingUpdate, OwnerId, PostalCode,
};

use super::{RepositoryError, map_write_error};
use crate::store::{CustomerFilter, GeocodingStats};

const CUSTOMER_COLUMNS: &str = "id, name, cnpj, cpf, email, phone, cep, street_address, \
     street_number, street_complement, neighborhood, city, state, full_address, tags, owner_id, \
     latitude, longitude, geocoding_status, geocoding_attempts, last_geocoding_attempt, \
     created_at, updated_at";

/// The address changed if either the postal code or the full address did.
const ADDRESS_CHANGED: &str = "(customers.cep IS DISTINCT FROM EXCLUDED.cep \
     OR customers.full_address IS DISTINCT FROM EXCLUDED.full_address)";

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    id: CustomerId,
    name: String,
    cnpj: Option<String>,
    cpf: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    cep: Option<String>,
    street_address: Option<String>,
    street_number: Option<String>,
    street_complement: Option<String>,
    neighborhood: Option<String>,
    city: Option<String>,
    state: Option<String>,
    full_address: Option<String>,
    tags: Vec<i64>,
    owner_id: Option<OwnerId>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    geocoding_status: GeocodingStatus,
    geocoding_attempts: i32,
    last_geocoding_attempt: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CustomerRow> for Customer {
    type Error = RepositoryError;

    fn try_from(row: CustomerRow) -> Result<Self, Self::Error> {
        let postal_code = row
            .cep
            .as_deref()
            .map(PostalCode::parse)
            .transpose()
            .map_err(|e| {
                RepositoryError::DataCorruption(format!(
                    "invalid cep for customer {}: {e}",
                    row.id
                ))
            })?;

        let coordinates = match (row.latitude, row.longitude) {
            (Some(lat), Some(lng)) => Some(Coordinates::new(lat, lng)),
            (None, None) => None,
            _ => {
                return Err(RepositoryError::DataCorruption(format!(
                    "customer {} has only one coordinate axis",
                    row.id
                )));
            }
        };

        Ok(Self {
            id: row.id,
            name: row.name,
            cnpj: row.cnpj,
            cpf: row.cpf,
            email: row.email,
            phone: row.phone,
            postal_code,
            street_address: row.street_address,
            street_number: row.street_number,
            street_complement: row.street_complement,
            neighborhood: row.neighborhood,
            city: row.city,
            state: row.state,
            full_address: row.full_address,
            tags: row.tags,
            owner_id: row.owner_id,
            coordinates,
            geocoding_status: row.geocoding_status,
            geocoding_attempts: row.geocoding_attempts,
            last_geocoding_attempt: row.last_geocoding_attempt,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for customer database operations.
pub struct CustomerRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CustomerRepository<'a> {
    /// Create a new customer repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert or update a batch of customers in one statement.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the statement fails, or
    /// `RepositoryError::Conflict` on a constraint violation.
    #[instrument(skip(self, customers), fields(count = customers.len()))]
    pub async fn upsert_many(&self, customers: &[Customer]) -> Result<u64, RepositoryError> {
        if customers.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO customers (id, name, cnpj, cpf, email, phone, cep, street_address, \
             street_number, street_complement, neighborhood, city, state, full_address, tags, \
             owner_id, latitude, longitude, geocoding_status, geocoding_attempts, \
             last_geocoding_attempt, created_at, updated_at) ",
        );

        builder.push_values(customers, |mut b, c| {
            b.push_bind(c.id)
                .push_bind(&c.name)
                .push_bind(&c.cnpj)
                .push_bind(&c.cpf)
                .push_bind(&c.email)
                .push_bind(&c.phone)
                .push_bind(c.postal_code.as_ref().map(PostalCode::as_str))
                .push_bind(&c.street_address)
                .push_bind(&c.street_number)
                .push_bind(&c.street_complement)
                .push_bind(&c.neighborhood)
                .push_bind(&c.city)
                .push_bind(&c.state)
                .push_bind(&c.full_address)
                .push_bind(&c.tags)
                .push_bind(c.owner_id)
                .push_bind(c.coordinates.map(|p| p.latitude))
                .push_bind(c.coordinates.map(|p| p.longitude))
                .push_bind(c.geocoding_status)
                .push_bind(c.geocoding_attempts)
                .push_bind(c.last_geocoding_attempt)
                .push_bind(c.created_at)
                .push_bind(c.updated_at);
        });

        builder.push(format!(
            " ON CONFLICT (id) DO UPDATE SET \
             name = EXCLUDED.name, \
             cnpj = EXCLUDED.cnpj, \
             cpf = EXCLUDED.cpf, \
             email = EXCLUDED.email, \
             phone = EXCLUDED.phone, \
             cep = EXCLUDED.cep, \
             street_address = EXCLUDED.street_address, \
             street_number = EXCLUDED.street_number, \
             street_complement = EXCLUDED.street_complement, \
             neighborhood = EXCLUDED.neighborhood, \
             city = EXCLUDED.city, \
             state = EXCLUDED.state, \
             full_address = EXCLUDED.full_address, \
             tags = EXCLUDED.tags, \
             owner_id = EXCLUDED.owner_id, \
             latitude = CASE WHEN {ADDRESS_CHANGED} THEN NULL ELSE customers.latitude END, \
             longitude = CASE WHEN {ADDRESS_CHANGED} THEN NULL ELSE customers.longitude END, \
             geocoding_status = CASE WHEN {ADDRESS_CHANGED} THEN 'pending' \
                 ELSE customers.geocoding_status END, \
             geocoding_attempts = CASE WHEN {ADDRESS_CHANGED} THEN 0 \
                 ELSE customers.geocoding_attempts END, \
             updated_at = now()"
        ));

        let result = builder
            .build()
            .execute(self.pool)
            .await
            .map_err(map_write_error)?;

        Ok(result.rows_affected())
    }

    /// Next page of customers awaiting geocoding.
    ///
    /// Keyset pagination on `id`: rows that stay `pending` after a failed
    /// save are not returned again within the same run. The address filter
    /// is `Customer::has_address_data`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if a row is invalid.
    #[instrument(skip(self))]
    pub async fn pending_for_geocoding(
        &self,
        after: Option<CustomerId>,
        limit: usize,
        max_attempts: i32,
    ) -> Result<Vec<Customer>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers \
             WHERE geocoding_status = 'pending' \
               AND geocoding_attempts < $1 \
               AND (cep IS NOT NULL OR full_address IS NOT NULL \
                    OR street_address IS NOT NULL OR city IS NOT NULL) \
               AND ($2::BIGINT IS NULL OR id > $2) \
             ORDER BY id \
             LIMIT $3"
        );

        let rows = sqlx::query_as::<_, CustomerRow>(&sql)
            .bind(max_attempts)
            .bind(after)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Get a customer by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if the row is invalid.
    pub async fn get_by_id(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = $1");
        let row = sqlx::query_as::<_, CustomerRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    /// Write the geocoding columns of one customer.
    ///
    /// The write is absolute (not `attempts + 1`), so repeating it is
    /// harmless.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no row matched.
    #[instrument(skip(self, update), fields(customer_id = %update.customer_id()))]
    pub async fn write_geocoding(&self, update: &GeocodingUpdate) -> Result<(), RepositoryError> {
        let coordinates = update.coordinates();
        let result = sqlx::query(
            "UPDATE customers \
             SET latitude = $2, longitude = $3, geocoding_status = $4, \
                 geocoding_attempts = $5, last_geocoding_attempt = $6, updated_at = now() \
             WHERE id = $1",
        )
        .bind(update.customer_id())
        .bind(coordinates.map(|c| c.latitude))
        .bind(coordinates.map(|c| c.longitude))
        .bind(update.status())
        .bind(update.attempts())
        .bind(update.attempted_at())
        .execute(self.pool)
        .await
        .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Every customer id in the table.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn all_ids(&self) -> Result<HashSet<CustomerId>, RepositoryError> {
        let ids = sqlx::query_scalar::<_, CustomerId>("SELECT id FROM customers")
            .fetch_all(self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    /// List customers for the dashboard.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if a row is invalid.
    pub async fn list(&self, filter: &CustomerFilter) -> Result<Vec<Customer>, RepositoryError> {
        let sql = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers \
             WHERE ($1::TEXT IS NULL \
                    OR name ILIKE '%' || $1 || '%' \
                    OR cnpj ILIKE '%' || $1 || '%' \
                    OR city ILIKE '%' || $1 || '%') \
               AND ($2::TEXT IS NULL OR geocoding_status = $2) \
             ORDER BY name, id \
             LIMIT $3 OFFSET $4"
        );

        let rows = sqlx::query_as::<_, CustomerRow>(&sql)
            .bind(filter.search_term())
            .bind(filter.status)
            .bind(filter.effective_limit())
            .bind(filter.effective_offset())
            .fetch_all(self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Coverage counters for `status` and the dashboard.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn geocoding_stats(&self) -> Result<GeocodingStats, RepositoryError> {
        let stats = sqlx::query_as::<_, GeocodingStats>(
            "SELECT \
               COUNT(*) AS total, \
               COUNT(*) FILTER (WHERE latitude IS NOT NULL AND longitude IS NOT NULL) AS geocoded, \
               COUNT(*) FILTER (WHERE geocoding_status = 'pending') AS pending, \
               COUNT(*) FILTER (WHERE geocoding_status = 'failed') AS failed, \
               COUNT(*) FILTER (WHERE latitude IS NULL OR longitude IS NULL) \
                   AS without_coordinates, \
               COUNT(*) FILTER (WHERE (latitude IS NULL OR longitude IS NULL) \
                   AND cep IS NOT NULL) AS with_cep_without_coordinates, \
               COUNT(*) FILTER (WHERE (latitude IS NULL OR longitude IS NULL) \
                   AND cep IS NULL) AS without_cep_without_coordinates \
             FROM customers",
        )
        .fetch_one(self.pool)
        .await?;

        Ok(stats)
    }

    /// Return every failed customer to the queue.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the statement fails.
    #[instrument(skip(self))]
    pub async fn reset_failed(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE customers \
             SET geocoding_status = 'pending', geocoding_attempts = 0, \
                 latitude = NULL, longitude = NULL, updated_at = now() \
             WHERE geocoding_status = 'failed'",
        )
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
