//! Provider seam and failure reasons.

use std::time::Duration;

use async_trait::async_trait;
use rota_core::Coordinates;
use thiserror::Error;

use super::GeocodeRequest;

/// Why a single provider call produced no coordinates.
///
/// Every variant means "try the next provider"; none of them is fatal.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status or API-level status.
    #[error("unexpected status: {0}")]
    Status(String),

    #[error("rate limited")]
    RateLimited,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("no result")]
    NoResult,

    #[error("result outside Brazil: {0}")]
    OutOfBounds(Coordinates),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("provider not configured: {0}")]
    NotConfigured(&'static str),
}

/// One address resolver.
#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    /// Stable name recorded with every result (`google`, `nominatim`, ...).
    fn name(&self) -> &'static str;

    async fn geocode(&self, request: &GeocodeRequest) -> Result<Coordinates, ProviderError>;
}
