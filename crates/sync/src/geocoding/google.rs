//! Google Maps Geocoding API provider.

use async_trait::async_trait;
use reqwest::StatusCode;
use rota_core::Coordinates;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::instrument;

use super::GeocodeRequest;
use super::provider::{GeocodingProvider, ProviderError};
use crate::config::GeocodingConfig;

pub const GOOGLE: &str = "google";

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

/// Paid, high-accuracy provider. Only built when an API key is configured.
pub struct GoogleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl GoogleProvider {
    /// Returns `Ok(None)` when no API key is configured.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn from_config(config: &GeocodingConfig) -> Result<Option<Self>, ProviderError> {
        let Some(api_key) = config.google_api_key.clone() else {
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .timeout(config.provider_timeout)
            .build()?;

        Ok(Some(Self {
            client,
            base_url: config.google_base_url.trim_end_matches('/').to_string(),
            api_key,
        }))
    }
}

#[async_trait]
impl GeocodingProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        GOOGLE
    }

    #[instrument(skip(self, request), fields(query = %request.query))]
    async fn geocode(&self, request: &GeocodeRequest) -> Result<Coordinates, ProviderError> {
        let url = url::Url::parse_with_params(
            &format!("{}/maps/api/geocode/json", self.base_url),
            &[
                ("address", request.query.as_str()),
                ("key", self.api_key.expose_secret()),
                ("region", "br"),
                ("language", "pt-BR"),
            ],
        )
        .map_err(|e| ProviderError::InvalidResponse(format!("invalid request URL: {e}")))?;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            return Err(ProviderError::Status(format!("HTTP {}", status.as_u16())));
        }

        let body: GeocodeResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        interpret(body)
    }
}

fn interpret(body: GeocodeResponse) -> Result<Coordinates, ProviderError> {
    match body.status.as_str() {
        "OK" => body
            .results
            .into_iter()
            .next()
            .map(|r| Coordinates::new(r.geometry.location.lat, r.geometry.location.lng))
            .ok_or(ProviderError::NoResult),
        "ZERO_RESULTS" => Err(ProviderError::NoResult),
        "OVER_QUERY_LIMIT" => Err(ProviderError::RateLimited),
        other => Err(ProviderError::Status(match body.error_message {
            Some(message) => format!("{other}: {message}"),
            None => other.to_string(),
        })),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Coordinates, ProviderError> {
        interpret(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_ok_takes_first_result() {
        let coords = parse(
            r#"{"status": "OK", "results": [
                {"geometry": {"location": {"lat": -3.7319, "lng": -38.5267}}},
                {"geometry": {"location": {"lat": 0.0, "lng": 0.0}}}
            ]}"#,
        )
        .unwrap();
        assert!(coords.approx_eq(&Coordinates::new(-3.7319, -38.5267), 1e-9));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            parse(r#"{"status": "ZERO_RESULTS", "results": []}"#),
            Err(ProviderError::NoResult)
        ));
        assert!(matches!(
            parse(r#"{"status": "OVER_QUERY_LIMIT"}"#),
            Err(ProviderError::RateLimited)
        ));
        match parse(r#"{"status": "REQUEST_DENIED", "error_message": "bad key"}"#) {
            Err(ProviderError::Status(msg)) => assert_eq!(msg, "REQUEST_DENIED: bad key"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_not_built_without_key() {
        let provider = GoogleProvider::from_config(&GeocodingConfig::default()).unwrap();
        assert!(provider.is_none());
    }
}
