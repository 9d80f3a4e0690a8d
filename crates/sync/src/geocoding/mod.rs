//! Address resolution: cache first, then the provider chain.

mod cache;
mod chain;
mod estimator;
mod google;
mod nominatim;
mod provider;

pub use cache::GeocodingCache;
pub use chain::{ChainError, ProviderChain, ProviderFailure, ProviderHit};
pub use estimator::{CityEstimator, ESTIMATED, JITTER_DEGREES};
pub use google::{GOOGLE, GoogleProvider};
pub use nominatim::{NOMINATIM, NominatimProvider};
pub use provider::{GeocodingProvider, ProviderError};

use std::sync::Arc;

use rota_core::{AddressParts, COUNTRY, Coordinates, Customer, PostalCode, normalize_address};
use serde::Serialize;
use tracing::instrument;

use crate::config::GeocodingConfig;
use crate::store::Store;

/// What the providers are asked to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocodeRequest {
    /// Free-text query sent to providers
    pub query: String,
    /// Normalized form of `query`, the cache key
    pub cache_key: String,
    pub postal_code: Option<PostalCode>,
    pub city: Option<String>,
    /// Record state, or the one implied by the postal code
    pub state: Option<String>,
}

impl GeocodeRequest {
    /// `None` when the customer has no usable address.
    #[must_use]
    pub fn from_customer(customer: &Customer) -> Option<Self> {
        let query = customer.geocoding_query()?;
        Some(Self {
            cache_key: normalize_address(&query),
            query,
            postal_code: customer.postal_code.clone(),
            city: customer
                .city
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from),
            state: customer.effective_state().map(String::from),
        })
    }

    /// A one-off lookup for a free-text address, a postal code or both.
    ///
    /// The address wins when present and gets the country appended unless it
    /// already names it. `None` when both are blank.
    #[must_use]
    pub fn from_address(address: Option<&str>, postal_code: Option<PostalCode>) -> Option<Self> {
        let address = address.map(str::trim).filter(|a| !a.is_empty());
        let query = match address {
            Some(address) if names_country(address) => address.to_string(),
            Some(address) => format!("{address}, {COUNTRY}"),
            None => AddressParts {
                postal_code: postal_code.as_ref(),
                ..AddressParts::default()
            }
            .to_query()?,
        };

        Some(Self {
            cache_key: normalize_address(&query),
            query,
            state: postal_code
                .as_ref()
                .and_then(PostalCode::state_hint)
                .map(String::from),
            postal_code,
            city: None,
        })
    }
}

fn names_country(address: &str) -> bool {
    let last = address.rsplit(',').next().unwrap_or(address).trim();
    last.eq_ignore_ascii_case(COUNTRY) || last.eq_ignore_ascii_case("brazil")
}

/// A resolved address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodeOutcome {
    pub coordinates: Coordinates,
    pub provider: String,
    pub from_cache: bool,
    /// Provider calls made for this resolution (0 on a cache hit)
    pub provider_calls: u32,
}

/// Cache and provider chain, constructed once per process.
#[derive(Clone, Debug)]
pub struct Geocoder {
    cache: GeocodingCache,
    chain: ProviderChain,
}

impl Geocoder {
    #[must_use]
    pub const fn new(cache: GeocodingCache, chain: ProviderChain) -> Self {
        Self { cache, chain }
    }

    /// Build the production chain: Google when a key is configured, then
    /// Nominatim, then the city estimator when enabled.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if an HTTP client fails to build.
    pub fn from_config(
        config: &GeocodingConfig,
        store: Arc<dyn Store>,
    ) -> Result<Self, ProviderError> {
        let mut chain = ProviderChain::new(
            config.provider_timeout,
            config.rate_limit_backoff,
            config.rate_limit_retries,
        );

        if let Some(google) = GoogleProvider::from_config(config)? {
            chain = chain.with(Arc::new(google));
        } else {
            tracing::info!("GOOGLE_MAPS_API_KEY not set, starting the chain at Nominatim");
        }
        chain = chain.with(Arc::new(NominatimProvider::from_config(config)?));
        if config.enable_estimator {
            chain = chain.with(Arc::new(CityEstimator::new()));
        }

        tracing::info!(providers = ?chain.provider_names(), "Geocoding chain ready");
        Ok(Self::new(GeocodingCache::new(store, config.cache_ttl), chain))
    }

    #[must_use]
    pub const fn cache(&self) -> &GeocodingCache {
        &self.cache
    }

    /// Resolve a request, consulting the cache before any provider.
    ///
    /// Provider results are cached, except estimates: they are jittered
    /// approximations and a later run may do better.
    ///
    /// # Errors
    ///
    /// Returns `ChainError::Exhausted` if every provider failed.
    #[instrument(skip(self, request), fields(key = %request.cache_key))]
    pub async fn geocode(&self, request: &GeocodeRequest) -> Result<GeocodeOutcome, ChainError> {
        if let Some(entry) = self.cache.lookup(&request.cache_key).await {
            tracing::debug!(provider = %entry.provider, "Cache hit");
            return Ok(GeocodeOutcome {
                coordinates: entry.coordinates,
                provider: entry.provider,
                from_cache: true,
                provider_calls: 0,
            });
        }

        let hit = self.chain.geocode(request).await?;

        if hit.provider != ESTIMATED {
            if let Err(e) = self
                .cache
                .store(&request.cache_key, hit.coordinates, hit.provider)
                .await
            {
                tracing::warn!(error = %e, "Failed to cache geocoding result");
            }
        }

        Ok(GeocodeOutcome {
            coordinates: hit.coordinates,
            provider: hit.provider.to_string(),
            from_cache: false,
            provider_calls: hit.calls,
        })
    }
}
