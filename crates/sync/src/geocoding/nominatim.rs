//! `OpenStreetMap` Nominatim provider.
//!
//! The public instance allows one request per second and rejects requests
//! without an identifying `User-Agent`.

use std::num::NonZeroU32;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use rota_core::Coordinates;
use serde::Deserialize;
use tracing::instrument;

use super::GeocodeRequest;
use super::provider::{GeocodingProvider, ProviderError};
use crate::config::GeocodingConfig;

pub const NOMINATIM: &str = "nominatim";

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

/// Free public provider.
pub struct NominatimProvider {
    client: reqwest::Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
}

impl NominatimProvider {
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn from_config(config: &GeocodingConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(config.nominatim_user_agent.clone())
            .timeout(config.provider_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.nominatim_base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::MIN)),
        })
    }
}

#[async_trait]
impl GeocodingProvider for NominatimProvider {
    fn name(&self) -> &'static str {
        NOMINATIM
    }

    #[instrument(skip(self, request), fields(query = %request.query))]
    async fn geocode(&self, request: &GeocodeRequest) -> Result<Coordinates, ProviderError> {
        let url = url::Url::parse_with_params(
            &format!("{}/search", self.base_url),
            &[
                ("format", "json"),
                ("q", request.query.as_str()),
                ("limit", "1"),
                ("countrycodes", "br"),
            ],
        )
        .map_err(|e| ProviderError::InvalidResponse(format!("invalid request URL: {e}")))?;

        self.limiter.until_ready().await;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            return Err(ProviderError::Status(format!("HTTP {}", status.as_u16())));
        }

        let places: Vec<Place> = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        places
            .into_iter()
            .next()
            .ok_or(ProviderError::NoResult)
            .and_then(|place| parse_place(&place))
    }
}

fn parse_place(place: &Place) -> Result<Coordinates, ProviderError> {
    let latitude = place
        .lat
        .trim()
        .parse::<f64>()
        .map_err(|e| ProviderError::InvalidResponse(format!("lat {:?}: {e}", place.lat)))?;
    let longitude = place
        .lon
        .trim()
        .parse::<f64>()
        .map_err(|e| ProviderError::InvalidResponse(format!("lon {:?}: {e}", place.lon)))?;
    Ok(Coordinates::new(latitude, longitude))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string_coordinates() {
        let places: Vec<Place> = serde_json::from_str(
            r#"[{"place_id": 1, "lat": "-3.7304512", "lon": "-38.5217989", "display_name": "Fortaleza"}]"#,
        )
        .unwrap();
        let coords = parse_place(&places[0]).unwrap();
        assert!(coords.approx_eq(&Coordinates::new(-3.730_451_2, -38.521_798_9), 1e-9));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let place = Place {
            lat: "north".to_string(),
            lon: "-38.5".to_string(),
        };
        assert!(matches!(
            parse_place(&place),
            Err(ProviderError::InvalidResponse(_))
        ));
    }
}
