//! HTTP API backing the dashboard.
//!
//! # Routes
//!
//! ```text
//! GET  /health                            - Liveness
//! GET  /health/ready                      - Store reachable
//! GET  /api/customers                     - List (search, status, limit, offset)
//! GET  /api/customers/{id}                - One customer
//! GET  /api/customers/{id}/sales          - Sales history and totals
//! GET  /api/geocoding/stats               - Coverage counters
//! POST /api/geocoding/jobs                - Start a batch (limit, resume)
//! GET  /api/geocoding/jobs/current        - Status of the current batch
//! POST /api/geocoding/jobs/current/cancel - Cancel it
//! POST /api/geocoding/address             - Resolve one address (address, cep)
//! POST /api/geocoding/cep                 - Resolve one postal code
//! POST /api/routes/optimize               - Order stops from an origin
//! POST /api/distance                      - Great-circle distance of two points
//! GET  /api/sync/logs                     - Recent runs
//! ```

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rota_core::routing::{self, Route, RouteOptions};
use rota_core::{Coordinates, Customer, CustomerId, PostalCode, Sale, SalesSummary, SyncLog};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;
use uuid::Uuid;

use crate::batch::{BatchOptions, JobStatus};
use crate::db::RepositoryError;
use crate::geocoding::{ChainError, GeocodeOutcome, GeocodeRequest, Geocoder};
use crate::job::{GeocodingPipeline, JobHandle};
use crate::store::{CustomerFilter, GeocodingStats, Store};

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Store(#[from] RepositoryError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Store(ref e) if !matches!(e, RepositoryError::NotFound)) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "API request error"
            );
        }

        let status = match &self {
            Self::Store(RepositoryError::NotFound) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        // Don't expose database details to clients
        let message = match &self {
            Self::Store(RepositoryError::NotFound) => "Not found".to_string(),
            Self::Store(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Most stops a single route request may carry.
pub const MAX_ROUTE_STOPS: usize = 200;

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn Store>,
    /// Absent when the API runs without geocoding (no job routes)
    pipeline: Option<GeocodingPipeline>,
    current_job: Mutex<Option<JobHandle>>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, pipeline: Option<GeocodingPipeline>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                store,
                pipeline,
                current_job: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }

    fn pipeline(&self) -> Result<&GeocodingPipeline, ApiError> {
        self.inner
            .pipeline
            .as_ref()
            .ok_or_else(|| ApiError::Unavailable("geocoding is not configured".to_string()))
    }

    /// Cancel the running job, if any. Used on shutdown.
    pub async fn cancel_current_job(&self) {
        if let Some(job) = self.inner.current_job.lock().await.as_ref() {
            if !job.is_finished() {
                job.cancel();
            }
        }
    }
}

/// API routes with request tracing and Sentry layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/api/customers", get(list_customers))
        .route("/api/customers/{id}", get(get_customer))
        .route("/api/customers/{id}/sales", get(customer_sales))
        .route("/api/geocoding/stats", get(geocoding_stats))
        .route("/api/geocoding/jobs", post(start_job))
        .route("/api/geocoding/jobs/current", get(current_job))
        .route("/api/geocoding/jobs/current/cancel", post(cancel_job))
        .route("/api/geocoding/address", post(geocode_address))
        .route("/api/geocoding/cep", post(geocode_cep))
        .route("/api/routes/optimize", post(optimize_route))
        .route("/api/distance", post(distance))
        .route("/api/sync/logs", get(sync_logs))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}

// =============================================================================
// Health
// =============================================================================

async fn health() -> &'static str {
    "ok"
}

/// 503 when the store cannot be reached.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

// =============================================================================
// Customers
// =============================================================================

async fn list_customers(
    State(state): State<AppState>,
    Query(filter): Query<CustomerFilter>,
) -> Result<Json<Vec<Customer>>, ApiError> {
    Ok(Json(state.store().list_customers(&filter).await?))
}

async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Customer>, ApiError> {
    let id = CustomerId::new(id);
    state
        .store()
        .get_customer(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("customer {id}")))
}

#[derive(Debug, Serialize)]
struct CustomerSales {
    customer_id: CustomerId,
    summary: SalesSummary,
    sales: Vec<Sale>,
}

async fn customer_sales(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CustomerSales>, ApiError> {
    let id = CustomerId::new(id);
    if state.store().get_customer(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("customer {id}")));
    }

    let sales = state.store().sales_for_customer(id).await?;
    Ok(Json(CustomerSales {
        customer_id: id,
        summary: SalesSummary::from_sales(&sales),
        sales,
    }))
}

// =============================================================================
// Geocoding
// =============================================================================

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    stats: GeocodingStats,
    geocoded_percent: f64,
}

async fn geocoding_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.store().geocoding_stats().await?;
    Ok(Json(StatsResponse {
        geocoded_percent: stats.geocoded_percent(),
        stats,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct StartJobParams {
    limit: Option<usize>,
    #[serde(default)]
    resume: bool,
}

#[derive(Debug, Serialize)]
struct JobResponse {
    id: Uuid,
    finished: bool,
    #[serde(flatten)]
    status: JobStatus,
}

impl From<&JobHandle> for JobResponse {
    fn from(job: &JobHandle) -> Self {
        Self {
            id: job.id(),
            finished: job.is_finished(),
            status: job.status(),
        }
    }
}

async fn start_job(
    State(state): State<AppState>,
    Query(params): Query<StartJobParams>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let pipeline = state.pipeline()?;

    if params.limit == Some(0) {
        return Err(ApiError::BadRequest("limit must be positive".to_string()));
    }

    let mut current = state.inner.current_job.lock().await;
    if let Some(job) = current.as_ref() {
        if !job.is_finished() {
            return Err(ApiError::Conflict(format!("job {} is still running", job.id())));
        }
    }

    let job = pipeline.spawn(BatchOptions {
        limit: params.limit,
        resume: params.resume,
    });
    tracing::info!(job_id = %job.id(), limit = ?params.limit, resume = params.resume, "Started geocoding job");
    let response = JobResponse::from(&job);
    *current = Some(job);

    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn current_job(State(state): State<AppState>) -> Result<Json<JobResponse>, ApiError> {
    let current = state.inner.current_job.lock().await;
    current
        .as_ref()
        .map(|job| Json(JobResponse::from(job)))
        .ok_or_else(|| ApiError::NotFound("no geocoding job".to_string()))
}

async fn cancel_job(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let current = state.inner.current_job.lock().await;
    let job = current
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("no geocoding job".to_string()))?;

    if job.is_finished() {
        return Err(ApiError::Conflict(format!("job {} already finished", job.id())));
    }
    job.cancel();

    Ok((StatusCode::ACCEPTED, Json(JobResponse::from(job))))
}

#[derive(Debug, Deserialize)]
struct AddressBody {
    address: Option<String>,
    cep: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CepBody {
    cep: String,
}

async fn geocode_address(
    State(state): State<AppState>,
    Json(body): Json<AddressBody>,
) -> Result<Json<GeocodeOutcome>, ApiError> {
    let postal_code = body
        .cep
        .as_deref()
        .map(str::trim)
        .filter(|cep| !cep.is_empty())
        .map(parse_cep)
        .transpose()?;
    let request = GeocodeRequest::from_address(body.address.as_deref(), postal_code)
        .ok_or_else(|| ApiError::BadRequest("address or cep is required".to_string()))?;
    resolve(state.pipeline()?.geocoder(), &request).await
}

async fn geocode_cep(
    State(state): State<AppState>,
    Json(body): Json<CepBody>,
) -> Result<Json<GeocodeOutcome>, ApiError> {
    let postal_code = parse_cep(&body.cep)?;
    let request = GeocodeRequest::from_address(None, Some(postal_code))
        .ok_or_else(|| ApiError::BadRequest("cep is required".to_string()))?;
    resolve(state.pipeline()?.geocoder(), &request).await
}

fn parse_cep(raw: &str) -> Result<PostalCode, ApiError> {
    PostalCode::parse(raw).map_err(|e| ApiError::BadRequest(format!("invalid cep: {e}")))
}

async fn resolve(
    geocoder: &Geocoder,
    request: &GeocodeRequest,
) -> Result<Json<GeocodeOutcome>, ApiError> {
    match geocoder.geocode(request).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e @ ChainError::Exhausted { .. }) => {
            tracing::info!(query = %request.query, error = %e, "Address not found");
            Err(ApiError::NotFound(format!("no provider resolved {}", request.query)))
        }
    }
}

// =============================================================================
// Routes
// =============================================================================

/// A point on a route as the dashboard sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RouteStop {
    latitude: f64,
    longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    customer_id: Option<CustomerId>,
}

impl RouteStop {
    const fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Deserialize)]
struct OptimizeBody {
    origin: RouteStop,
    waypoints: Vec<RouteStop>,
    #[serde(flatten)]
    options: RouteOptions,
}

#[derive(Debug, Serialize)]
struct OptimizeResponse {
    origin: RouteStop,
    /// Waypoints in visiting order
    waypoints: Vec<RouteStop>,
    #[serde(flatten)]
    route: Route,
}

async fn optimize_route(
    Json(body): Json<OptimizeBody>,
) -> Result<Json<OptimizeResponse>, ApiError> {
    if body.waypoints.is_empty() {
        return Err(ApiError::BadRequest("at least one waypoint is required".to_string()));
    }
    if body.waypoints.len() > MAX_ROUTE_STOPS {
        return Err(ApiError::BadRequest(format!(
            "at most {MAX_ROUTE_STOPS} waypoints per route, got {}",
            body.waypoints.len()
        )));
    }
    if !body.origin.coordinates().is_valid() {
        return Err(ApiError::BadRequest("origin has invalid coordinates".to_string()));
    }
    if let Some(index) = body
        .waypoints
        .iter()
        .position(|stop| !stop.coordinates().is_valid())
    {
        return Err(ApiError::BadRequest(format!(
            "waypoint {index} has invalid coordinates"
        )));
    }

    let stops: Vec<Coordinates> = body.waypoints.iter().map(RouteStop::coordinates).collect();
    let route = routing::optimize(body.origin.coordinates(), &stops, body.options);
    tracing::debug!(
        stops = stops.len(),
        distance_km = route.total_distance_km,
        improvement_percent = route.improvement_percent,
        "Optimized route"
    );

    let waypoints = route
        .order
        .iter()
        .filter_map(|&index| body.waypoints.get(index).cloned())
        .collect();
    Ok(Json(OptimizeResponse {
        origin: body.origin,
        waypoints,
        route,
    }))
}

#[derive(Debug, Deserialize)]
struct DistanceBody {
    from: Coordinates,
    to: Coordinates,
}

#[derive(Debug, Serialize)]
struct DistanceResponse {
    distance_km: f64,
}

async fn distance(Json(body): Json<DistanceBody>) -> Result<Json<DistanceResponse>, ApiError> {
    if !body.from.is_valid() || !body.to.is_valid() {
        return Err(ApiError::BadRequest("invalid coordinates".to_string()));
    }
    Ok(Json(DistanceResponse {
        distance_km: body.from.distance_km(&body.to),
    }))
}

// =============================================================================
// Sync logs
// =============================================================================

#[derive(Debug, Deserialize)]
struct LogsParams {
    limit: Option<i64>,
}

async fn sync_logs(
    State(state): State<AppState>,
    Query(params): Query<LogsParams>,
) -> Result<Json<Vec<SyncLog>>, ApiError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 200);
    Ok(Json(state.store().recent_syncs(limit).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(status_of(ApiError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ApiError::Store(RepositoryError::NotFound)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(ApiError::Store(RepositoryError::DataCorruption("bad".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_of(ApiError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(status_of(ApiError::BadRequest("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(ApiError::Unavailable("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
