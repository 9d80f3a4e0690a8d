//! Canonical customer record.
//!
//! Every external shape (CRM contact, database row, API response) is mapped
//! to and from [`Customer`] at its boundary. Nothing downstream looks at the
//! CRM field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::address::AddressParts;
use super::coordinates::Coordinates;
use super::id::{CustomerId, OwnerId};
use super::postal_code::PostalCode;
use super::state::state_code;
use super::status::GeocodingStatus;

/// A customer as stored by the sync pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub cnpj: Option<String>,
    pub cpf: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(rename = "cep")]
    pub postal_code: Option<PostalCode>,
    pub street_address: Option<String>,
    pub street_number: Option<String>,
    pub street_complement: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub full_address: Option<String>,
    pub tags: Vec<i64>,
    pub owner_id: Option<OwnerId>,
    pub coordinates: Option<Coordinates>,
    pub geocoding_status: GeocodingStatus,
    pub geocoding_attempts: i32,
    pub last_geocoding_attempt: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    /// A pending customer with only an id and a name.
    #[must_use]
    pub fn new(id: CustomerId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            cnpj: None,
            cpf: None,
            email: None,
            phone: None,
            postal_code: None,
            street_address: None,
            street_number: None,
            street_complement: None,
            neighborhood: None,
            city: None,
            state: None,
            full_address: None,
            tags: Vec::new(),
            owner_id: None,
            coordinates: None,
            geocoding_status: GeocodingStatus::Pending,
            geocoding_attempts: 0,
            last_geocoding_attempt: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn address_parts(&self) -> AddressParts<'_> {
        AddressParts {
            street: self.street_address.as_deref(),
            number: self.street_number.as_deref(),
            complement: self.street_complement.as_deref(),
            neighborhood: self.neighborhood.as_deref(),
            city: self.city.as_deref(),
            state: self.state.as_deref(),
            postal_code: self.postal_code.as_ref(),
        }
    }

    /// Query string for geocoding providers.
    ///
    /// Built from the structured fields when possible, otherwise the stored
    /// full address is used verbatim.
    #[must_use]
    pub fn geocoding_query(&self) -> Option<String> {
        self.address_parts().to_query().or_else(|| {
            self.full_address
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(String::from)
        })
    }

    /// Whether there is anything a provider could resolve.
    #[must_use]
    pub fn has_usable_address(&self) -> bool {
        self.geocoding_query().is_some()
    }

    /// Whether any column [`geocoding_query`](Self::geocoding_query) reads is
    /// set, blank or not.
    ///
    /// Stores select pending work with this rule, so every customer with a
    /// usable address is fetched. Those with only blank fields are fetched
    /// too and then marked failed.
    #[must_use]
    pub const fn has_address_data(&self) -> bool {
        self.postal_code.is_some()
            || self.full_address.is_some()
            || self.street_address.is_some()
            || self.city.is_some()
    }

    /// State code from the record, or implied by the postal code.
    ///
    /// A stored full state name resolves to its code; an unrecognized value
    /// is ignored.
    #[must_use]
    pub fn effective_state(&self) -> Option<&'static str> {
        self.state
            .as_deref()
            .and_then(state_code)
            .or_else(|| self.postal_code.as_ref().and_then(PostalCode::state_hint))
    }

    /// Coordinates are present only when completed; a failed record has no
    /// coordinates and at least one recorded attempt.
    #[must_use]
    pub const fn geocoding_state_is_consistent(&self) -> bool {
        match self.geocoding_status {
            GeocodingStatus::Completed => self.coordinates.is_some(),
            GeocodingStatus::Failed => {
                self.coordinates.is_none() && self.geocoding_attempts > 0
            }
            GeocodingStatus::Pending => self.coordinates.is_none(),
        }
    }

    /// Whether `other` carries a different address, which invalidates any
    /// resolved coordinates.
    #[must_use]
    pub fn address_differs(&self, other: &Self) -> bool {
        self.postal_code != other.postal_code || self.full_address != other.full_address
    }
}

/// A write of the geocoding columns of one customer.
///
/// The constructors are the only way to build one, so a completed update
/// always carries coordinates and a failed one never does.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodingUpdate {
    customer_id: CustomerId,
    coordinates: Option<Coordinates>,
    status: GeocodingStatus,
    attempts: i32,
    attempted_at: Option<DateTime<Utc>>,
}

impl GeocodingUpdate {
    /// Resolved coordinates.
    #[must_use]
    pub const fn completed(
        customer_id: CustomerId,
        coordinates: Coordinates,
        attempts: i32,
        attempted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            customer_id,
            coordinates: Some(coordinates),
            status: GeocodingStatus::Completed,
            attempts,
            attempted_at: Some(attempted_at),
        }
    }

    /// Every provider failed or the address is unusable.
    #[must_use]
    pub const fn failed(
        customer_id: CustomerId,
        attempts: i32,
        attempted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            customer_id,
            coordinates: None,
            status: GeocodingStatus::Failed,
            attempts,
            attempted_at: Some(attempted_at),
        }
    }

    /// The customer's current geocoding columns, for restoring after a
    /// write that could not be verified.
    #[must_use]
    pub fn snapshot(customer: &Customer) -> Self {
        Self {
            customer_id: customer.id,
            coordinates: customer.coordinates,
            status: customer.geocoding_status,
            attempts: customer.geocoding_attempts,
            attempted_at: customer.last_geocoding_attempt,
        }
    }

    #[must_use]
    pub const fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    #[must_use]
    pub const fn coordinates(&self) -> Option<Coordinates> {
        self.coordinates
    }

    #[must_use]
    pub const fn status(&self) -> GeocodingStatus {
        self.status
    }

    #[must_use]
    pub const fn attempts(&self) -> i32 {
        self.attempts
    }

    #[must_use]
    pub const fn attempted_at(&self) -> Option<DateTime<Utc>> {
        self.attempted_at
    }

    /// Apply this update to an in-memory record.
    pub fn apply_to(&self, customer: &mut Customer) {
        customer.coordinates = self.coordinates;
        customer.geocoding_status = self.status;
        customer.geocoding_attempts = self.attempts;
        customer.last_geocoding_attempt = self.attempted_at;
        customer.updated_at = Utc::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fortaleza_customer() -> Customer {
        let mut customer = Customer::new(CustomerId::new(1), "Mercadinho São José");
        customer.street_address = Some("Rua Barão de Aratanha".to_string());
        customer.street_number = Some("51".to_string());
        customer.neighborhood = Some("Centro".to_string());
        customer.city = Some("Fortaleza".to_string());
        customer.state = Some("CE".to_string());
        customer.postal_code = PostalCode::parse("60050070").ok();
        customer
    }

    #[test]
    fn test_geocoding_query_from_parts() {
        assert_eq!(
            fortaleza_customer().geocoding_query().unwrap(),
            "Rua Barão de Aratanha, 51, Centro, Fortaleza, CE, Brasil"
        );
    }

    #[test]
    fn test_geocoding_query_falls_back_to_full_address() {
        let mut customer = Customer::new(CustomerId::new(2), "Loja");
        customer.full_address = Some("  Av. Bezerra de Menezes 1000  ".to_string());
        assert_eq!(
            customer.geocoding_query().unwrap(),
            "Av. Bezerra de Menezes 1000"
        );
    }

    #[test]
    fn test_no_usable_address() {
        let mut customer = Customer::new(CustomerId::new(3), "Sem endereço");
        customer.full_address = Some("   ".to_string());
        assert!(!customer.has_usable_address());
    }

    #[test]
    fn test_effective_state_uses_postal_code_hint() {
        let mut customer = Customer::new(CustomerId::new(4), "Cliente");
        customer.postal_code = PostalCode::parse("59000000").ok();
        assert_eq!(customer.effective_state(), Some("RN"));
        customer.state = Some("PB".to_string());
        assert_eq!(customer.effective_state(), Some("PB"));
        customer.state = Some("Paraíba".to_string());
        assert_eq!(customer.effective_state(), Some("PB"));
        customer.state = Some("??".to_string());
        assert_eq!(customer.effective_state(), Some("RN"));
    }

    #[test]
    fn test_usable_address_implies_address_data() {
        let mut customer = Customer::new(CustomerId::new(5), "Cliente");
        assert!(!customer.has_address_data());

        customer.city = Some("Fortaleza".to_string());
        assert!(customer.has_usable_address());
        assert!(customer.has_address_data());

        customer.city = Some("  ".to_string());
        assert!(!customer.has_usable_address());
        assert!(customer.has_address_data());
    }

    #[test]
    fn test_completed_update_keeps_invariant() {
        let mut customer = fortaleza_customer();
        let update = GeocodingUpdate::completed(
            customer.id,
            Coordinates::new(-3.7327, -38.527),
            1,
            Utc::now(),
        );
        update.apply_to(&mut customer);
        assert_eq!(customer.geocoding_status, GeocodingStatus::Completed);
        assert!(customer.geocoding_state_is_consistent());
    }

    #[test]
    fn test_failed_update_clears_coordinates() {
        let mut customer = fortaleza_customer();
        customer.coordinates = Some(Coordinates::new(-3.0, -38.0));
        GeocodingUpdate::failed(customer.id, 1, Utc::now()).apply_to(&mut customer);
        assert!(customer.coordinates.is_none());
        assert!(customer.geocoding_state_is_consistent());
    }

    #[test]
    fn test_snapshot_restores_prior_state() {
        let mut customer = fortaleza_customer();
        let before = GeocodingUpdate::snapshot(&customer);
        GeocodingUpdate::completed(customer.id, Coordinates::new(-3.0, -38.0), 1, Utc::now())
            .apply_to(&mut customer);
        before.apply_to(&mut customer);
        assert_eq!(customer.geocoding_status, GeocodingStatus::Pending);
        assert!(customer.coordinates.is_none());
        assert_eq!(customer.geocoding_attempts, 0);
    }

    #[test]
    fn test_inconsistent_states_detected() {
        let mut customer = fortaleza_customer();
        customer.geocoding_status = GeocodingStatus::Failed;
        assert!(!customer.geocoding_state_is_consistent());
        customer.geocoding_attempts = 1;
        assert!(customer.geocoding_state_is_consistent());
        customer.coordinates = Some(Coordinates::new(-3.0, -38.0));
        assert!(!customer.geocoding_state_is_consistent());
    }

    #[test]
    fn test_address_differs() {
        let a = fortaleza_customer();
        let mut b = a.clone();
        assert!(!a.address_differs(&b));
        b.postal_code = PostalCode::parse("60060000").ok();
        assert!(a.address_differs(&b));
    }

    #[test]
    fn test_serde_uses_cep_key() {
        let json = serde_json::to_value(fortaleza_customer()).unwrap();
        assert_eq!(json["cep"], "60050-070");
        assert_eq!(json["geocoding_status"], "pending");
    }
}
