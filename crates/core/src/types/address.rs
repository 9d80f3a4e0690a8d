//! Address normalization.
//!
//! Free-text addresses come out of the CRM with inconsistent casing, stray
//! commas and doubled spaces. [`normalize_address`] produces the string used as
//! the geocoding cache key, and [`AddressParts`] assembles the query sent to
//! providers.

use super::postal_code::PostalCode;

/// Country suffix appended to every provider query.
pub const COUNTRY: &str = "Brasil";

/// Normalize a free-text address into a stable cache key.
///
/// Lowercases, collapses whitespace runs to one space, collapses repeated
/// commas and trims commas from both ends.
///
/// ```
/// use rota_core::normalize_address;
///
/// assert_eq!(
///     normalize_address("  Rua  Barão de Aratanha ,, Centro,  FORTALEZA, "),
///     "rua barão de aratanha, centro, fortaleza"
/// );
/// ```
#[must_use]
pub fn normalize_address(raw: &str) -> String {
    raw.to_lowercase()
        .split(',')
        .map(|part| part.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Borrowed view over the address fields of a record.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressParts<'a> {
    pub street: Option<&'a str>,
    pub number: Option<&'a str>,
    pub complement: Option<&'a str>,
    pub neighborhood: Option<&'a str>,
    pub city: Option<&'a str>,
    pub state: Option<&'a str>,
    pub postal_code: Option<&'a PostalCode>,
}

impl AddressParts<'_> {
    /// Build the provider query: street, number, neighborhood, city, state
    /// and country.
    ///
    /// Needs a street or a city to be useful; otherwise falls back to the
    /// postal code alone. Returns `None` when neither is available.
    #[must_use]
    pub fn to_query(&self) -> Option<String> {
        let street = non_empty(self.street);
        let city = non_empty(self.city);

        if street.is_some() || city.is_some() {
            let parts = [
                street,
                non_empty(self.number),
                non_empty(self.neighborhood),
                city,
                non_empty(self.state),
                Some(COUNTRY),
            ];
            return Some(join(parts.into_iter().flatten()));
        }

        self.postal_code
            .map(|cep| format!("{}, {COUNTRY}", cep.as_str()))
    }

    /// Human-readable address stored alongside the record.
    #[must_use]
    pub fn to_full_address(&self) -> Option<String> {
        let cep = self.postal_code.map(PostalCode::as_str);
        let parts = [
            non_empty(self.street),
            non_empty(self.number),
            non_empty(self.complement),
            non_empty(self.neighborhood),
            non_empty(self.city),
            non_empty(self.state),
            cep,
        ];
        let full = join(parts.into_iter().flatten());
        (!full.is_empty()).then_some(full)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn join<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace_and_commas() {
        assert_eq!(normalize_address("A,,B"), "a, b");
        assert_eq!(normalize_address(", , a ,   b  c ,"), "a, b c");
        assert_eq!(normalize_address("\tRua\n 1"), "rua 1");
        assert_eq!(normalize_address(""), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_address("Av. Santos Dumont, 1500 , Aldeota,Fortaleza");
        assert_eq!(normalize_address(&once), once);
    }

    #[test]
    fn test_query_from_full_parts() {
        let parts = AddressParts {
            street: Some("Av. Santos Dumont"),
            number: Some("1500"),
            complement: Some("Sala 2"),
            neighborhood: Some("Aldeota"),
            city: Some("Fortaleza"),
            state: Some("CE"),
            postal_code: None,
        };
        assert_eq!(
            parts.to_query().unwrap(),
            "Av. Santos Dumont, 1500, Aldeota, Fortaleza, CE, Brasil"
        );
    }

    #[test]
    fn test_query_skips_blank_parts() {
        let parts = AddressParts {
            street: Some("  "),
            city: Some("Caucaia"),
            state: Some("CE"),
            ..AddressParts::default()
        };
        assert_eq!(parts.to_query().unwrap(), "Caucaia, CE, Brasil");
    }

    #[test]
    fn test_query_falls_back_to_postal_code() {
        let cep = PostalCode::parse("60115170").unwrap();
        let parts = AddressParts {
            state: Some("CE"),
            postal_code: Some(&cep),
            ..AddressParts::default()
        };
        assert_eq!(parts.to_query().unwrap(), "60115-170, Brasil");
    }

    #[test]
    fn test_query_none_without_usable_fields() {
        let parts = AddressParts {
            state: Some("CE"),
            ..AddressParts::default()
        };
        assert!(parts.to_query().is_none());
    }

    #[test]
    fn test_full_address_includes_complement_and_cep() {
        let cep = PostalCode::parse("60115170").unwrap();
        let parts = AddressParts {
            street: Some("Rua A"),
            number: Some("10"),
            complement: Some("Apto 3"),
            neighborhood: None,
            city: Some("Fortaleza"),
            state: Some("CE"),
            postal_code: Some(&cep),
        };
        assert_eq!(
            parts.to_full_address().unwrap(),
            "Rua A, 10, Apto 3, Fortaleza, CE, 60115-170"
        );
        assert!(AddressParts::default().to_full_address().is_none());
    }
}
