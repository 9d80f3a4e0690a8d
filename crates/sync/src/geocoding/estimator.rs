//! City-centroid estimator, the last resort of the chain.
//!
//! Resolves only cities it knows: metropolitan Fortaleza and the state
//! capitals. Each estimate is jittered so customers in the same city do not
//! stack on one pin.

use async_trait::async_trait;
use rota_core::{Coordinates, fold_name, state_code};

use super::GeocodeRequest;
use super::provider::{GeocodingProvider, ProviderError};

pub const ESTIMATED: &str = "estimated";

/// Full width of the jitter window on each axis, in degrees.
pub const JITTER_DEGREES: f64 = 0.005;

/// Metropolitan Fortaleza (CE), keyed by folded city name.
const METRO_FORTALEZA: &[(&str, f64, f64)] = &[
    ("fortaleza", -3.7327, -38.5270),
    ("caucaia", -3.7361, -38.6530),
    ("maracanau", -3.8767, -38.6256),
    ("eusebio", -3.8901, -38.4506),
    ("aquiraz", -3.9014, -38.3906),
    ("pacatuba", -3.9840, -38.6200),
    ("horizonte", -4.0969, -38.4953),
    ("sao goncalo do amarante", -3.6078, -38.9689),
    ("itaitinga", -3.9694, -38.5281),
    ("maranguape", -3.8908, -38.6850),
    ("pacajus", -4.1725, -38.4606),
    ("cascavel", -4.1331, -38.2422),
];

/// State capitals: folded city name, state, latitude, longitude.
const CAPITALS: &[(&str, &str, f64, f64)] = &[
    ("sao paulo", "SP", -23.5505, -46.6333),
    ("rio de janeiro", "RJ", -22.9068, -43.1729),
    ("belo horizonte", "MG", -19.9167, -43.9345),
    ("porto alegre", "RS", -30.0346, -51.2177),
    ("brasilia", "DF", -15.7801, -47.9292),
    ("salvador", "BA", -12.9714, -38.5014),
    ("fortaleza", "CE", -3.7327, -38.5270),
    ("curitiba", "PR", -25.4284, -49.2733),
    ("recife", "PE", -8.0476, -34.8770),
    ("manaus", "AM", -3.1190, -60.0217),
    ("belem", "PA", -1.4558, -48.4902),
    ("goiania", "GO", -16.6869, -49.2648),
    ("sao luis", "MA", -2.5297, -44.3028),
    ("maceio", "AL", -9.6658, -35.7353),
    ("natal", "RN", -5.7945, -35.2110),
    ("teresina", "PI", -5.0892, -42.8019),
    ("joao pessoa", "PB", -7.1195, -34.8450),
    ("aracaju", "SE", -10.9472, -37.0731),
    ("florianopolis", "SC", -27.5954, -48.5480),
    ("vitoria", "ES", -20.3155, -40.3128),
    ("campo grande", "MS", -20.4697, -54.6201),
    ("cuiaba", "MT", -15.5989, -56.0949),
    ("porto velho", "RO", -8.7619, -63.9039),
    ("macapa", "AP", 0.0355, -51.0705),
    ("boa vista", "RR", 2.8235, -60.6758),
    ("rio branco", "AC", -9.9754, -67.8249),
    ("palmas", "TO", -10.2491, -48.3243),
];

/// Coarse estimate from a city centroid.
#[derive(Debug, Clone, Copy)]
pub struct CityEstimator {
    jitter: f64,
}

impl Default for CityEstimator {
    fn default() -> Self {
        Self {
            jitter: JITTER_DEGREES,
        }
    }
}

impl CityEstimator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Centroid of a known city, before jitter.
    ///
    /// A state that disagrees with the table rules the city out. The state
    /// may be a code or a full name; anything unrecognized is ignored.
    #[must_use]
    pub fn centroid(city: &str, state: Option<&str>) -> Option<Coordinates> {
        let city = fold_name(city);
        let state = state.and_then(state_code);
        let state_matches = |expected: &str| state.is_none_or(|s| s == expected);

        if state_matches("CE") {
            if let Some(&(_, lat, lng)) = METRO_FORTALEZA.iter().find(|(name, ..)| *name == city) {
                return Some(Coordinates::new(lat, lng));
            }
        }

        CAPITALS
            .iter()
            .find(|(name, uf, ..)| *name == city && state_matches(*uf))
            .map(|&(_, _, lat, lng)| Coordinates::new(lat, lng))
    }

    fn jittered(&self, center: Coordinates) -> Coordinates {
        let d_lat = (rand::random::<f64>() - 0.5) * self.jitter;
        let d_lng = (rand::random::<f64>() - 0.5) * self.jitter;
        center.offset(d_lat, d_lng)
    }
}

#[async_trait]
impl GeocodingProvider for CityEstimator {
    fn name(&self) -> &'static str {
        ESTIMATED
    }

    async fn geocode(&self, request: &GeocodeRequest) -> Result<Coordinates, ProviderError> {
        let city = request.city.as_deref().ok_or(ProviderError::NoResult)?;
        let center =
            Self::centroid(city, request.state.as_deref()).ok_or(ProviderError::NoResult)?;
        Ok(self.jittered(center))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rota_core::{BoundingBox, Customer, CustomerId, PostalCode};

    use super::*;

    fn request(city: &str, state: Option<&str>) -> GeocodeRequest {
        GeocodeRequest {
            query: format!("{city}, Brasil"),
            cache_key: city.to_lowercase(),
            postal_code: None,
            city: Some(city.to_string()),
            state: state.map(String::from),
        }
    }

    #[test]
    fn test_centroid_respects_state() {
        assert!(CityEstimator::centroid("Natal", Some("RN")).is_some());
        assert!(CityEstimator::centroid("Natal", Some("CE")).is_none());
        assert!(CityEstimator::centroid("Caucaia", None).is_some());
        assert!(CityEstimator::centroid("Caucaia", Some("SP")).is_none());
        assert!(CityEstimator::centroid("Quixadá", Some("CE")).is_none());
    }

    #[test]
    fn test_centroid_accepts_full_state_names() {
        assert!(CityEstimator::centroid("Fortaleza", Some("CEARÁ")).is_some());
        assert!(CityEstimator::centroid("Natal", Some("Rio Grande do Norte")).is_some());
        assert!(CityEstimator::centroid("Natal", Some("Ceará")).is_none());
        // Unrecognized states do not veto the city
        assert!(CityEstimator::centroid("Fortaleza", Some("Estado")).is_some());
    }

    #[tokio::test]
    async fn test_estimate_stays_near_centroid() {
        let estimator = CityEstimator::new();
        let center = Coordinates::new(-3.7327, -38.5270);
        let bounds = BoundingBox::around(center, JITTER_DEGREES / 2.0 + 1e-9);

        for _ in 0..50 {
            let coords = estimator.geocode(&request("Fortaleza", Some("ce"))).await.unwrap();
            assert!(bounds.contains(&coords), "{coords} outside {bounds:?}");
        }
    }

    #[tokio::test]
    async fn test_customer_with_full_state_name_is_estimated() {
        let mut customer = Customer::new(CustomerId::new(1), "Cliente");
        customer.postal_code = PostalCode::parse("60115170").ok();
        customer.city = Some("Fortaleza".to_string());
        customer.state = Some("CEARÁ".to_string());

        let request = GeocodeRequest::from_customer(&customer).unwrap();
        let coords = CityEstimator::new().geocode(&request).await.unwrap();
        let center = CityEstimator::centroid("Fortaleza", None).unwrap();
        assert!(BoundingBox::around(center, JITTER_DEGREES).contains(&coords));
    }

    #[tokio::test]
    async fn test_unknown_city_fails() {
        let estimator = CityEstimator::new();
        assert!(matches!(
            estimator.geocode(&request("Atlantis", None)).await,
            Err(ProviderError::NoResult)
        ));
    }

    #[test]
    fn test_every_entry_is_in_brazil() {
        for &(name, lat, lng) in METRO_FORTALEZA {
            assert!(Coordinates::new(lat, lng).is_within_brazil(), "{name}");
        }
        for &(name, _, lat, lng) in CAPITALS {
            assert!(Coordinates::new(lat, lng).is_within_brazil(), "{name}");
        }
        assert_eq!(CAPITALS.len(), 27);
    }
}
