//! Mapping from Ploomes records to domain records.

use rota_core::{
    Customer, CustomerId, DealId, DealStatus, OwnerId, PostalCode, Sale, StageId,
    normalize_postal_code, state_code,
};
use rust_decimal::Decimal;

use super::types::{Contact, Deal};

/// Name stored for contacts without one.
const UNNAMED: &str = "Sem nome";

/// Build a pending customer from a CRM contact.
///
/// Geocoding columns start empty; the store keeps existing ones unless the
/// address changed.
#[must_use]
pub fn customer_from_contact(contact: &Contact) -> Customer {
    let mut customer = Customer::new(
        CustomerId::new(contact.id),
        text(contact.name.as_deref()).unwrap_or(UNNAMED),
    );

    let (cnpj, cpf) = documents(contact);
    customer.cnpj = cnpj;
    customer.cpf = cpf;
    customer.email = text(contact.email.as_deref()).map(str::to_lowercase);
    customer.phone = contact
        .phones
        .iter()
        .find_map(|p| text(p.phone_number.as_deref()))
        .map(String::from);
    customer.postal_code = contact
        .zip_code
        .as_deref()
        .and_then(normalize_postal_code);
    customer.street_address = owned(contact.street_address.as_deref());
    customer.street_number = owned(contact.street_address_number.as_deref());
    customer.street_complement = owned(contact.street_address_line2.as_deref());
    customer.neighborhood = owned(contact.neighborhood.as_deref());
    customer.city = contact
        .city
        .as_ref()
        .and_then(|c| owned(c.name.as_deref()));
    customer.state = contact
        .state
        .as_deref()
        .and_then(state_code)
        .map(String::from)
        .or_else(|| {
            customer
                .postal_code
                .as_ref()
                .and_then(PostalCode::state_hint)
                .map(String::from)
        });
    customer.full_address = customer.address_parts().to_full_address();
    customer.tags = contact.tags.iter().map(|t| t.tag_id).collect();
    customer.owner_id = contact.owner_id.map(OwnerId::new);

    customer
}

/// Build a sale from a CRM deal. Deals without a contact are skipped.
#[must_use]
pub fn sale_from_deal(deal: &Deal) -> Option<Sale> {
    let contact_id = deal.contact_id?;

    Some(Sale {
        deal_id: DealId::new(deal.id),
        customer_id: CustomerId::new(contact_id),
        owner_id: deal.owner_id.map(OwnerId::new),
        stage_id: deal.stage_id.map(StageId::new),
        title: owned(deal.title.as_deref()),
        deal_value: deal.amount.unwrap_or(Decimal::ZERO).round_dp(2),
        status: DealStatus::from_crm_status_id(deal.status_id),
        deal_created_at: deal.create_date,
        deal_updated_at: deal.last_update_date.or(deal.create_date),
    })
}

/// CNPJ and CPF, from the dedicated fields or the generic document by
/// digit count.
fn documents(contact: &Contact) -> (Option<String>, Option<String>) {
    let mut cnpj = owned(contact.cnpj.as_deref());
    let mut cpf = owned(contact.cpf.as_deref());

    if let Some(document) = text(contact.document.as_deref()) {
        match document.chars().filter(char::is_ascii_digit).count() {
            14 if cnpj.is_none() => cnpj = Some(document.to_string()),
            11 if cpf.is_none() => cpf = Some(document.to_string()),
            _ => {}
        }
    }

    (cnpj, cpf)
}

fn text(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn owned(value: Option<&str>) -> Option<String> {
    text(value).map(String::from)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ploomes::types::{City, ContactTag, Phone};

    fn contact() -> Contact {
        Contact {
            id: 501,
            name: Some("  Mercadinho Boa Vista ".to_string()),
            document: Some("12.345.678/0001-90".to_string()),
            email: Some("Compras@BoaVista.com.br".to_string()),
            phones: vec![
                Phone { phone_number: None },
                Phone {
                    phone_number: Some("(85) 3333-4444".to_string()),
                },
            ],
            zip_code: Some("60115170".to_string()),
            street_address: Some("Rua Barão de Aracati".to_string()),
            street_address_number: Some("1200".to_string()),
            neighborhood: Some("Aldeota".to_string()),
            city: Some(City {
                name: Some("Fortaleza".to_string()),
            }),
            tags: vec![ContactTag { tag_id: 40_006_184 }],
            owner_id: Some(77),
            ..Contact::default()
        }
    }

    #[test]
    fn test_customer_from_contact_maps_fields() {
        let customer = customer_from_contact(&contact());
        assert_eq!(customer.id, CustomerId::new(501));
        assert_eq!(customer.name, "Mercadinho Boa Vista");
        assert_eq!(customer.cnpj.as_deref(), Some("12.345.678/0001-90"));
        assert!(customer.cpf.is_none());
        assert_eq!(customer.email.as_deref(), Some("compras@boavista.com.br"));
        assert_eq!(customer.phone.as_deref(), Some("(85) 3333-4444"));
        assert_eq!(customer.postal_code.as_ref().unwrap().as_str(), "60115-170");
        // State comes from the postal code when the contact has none
        assert_eq!(customer.state.as_deref(), Some("CE"));
        assert_eq!(
            customer.full_address.as_deref(),
            Some("Rua Barão de Aracati, 1200, Aldeota, Fortaleza, CE, 60115-170")
        );
        assert_eq!(customer.tags, vec![40_006_184]);
        assert_eq!(customer.owner_id, Some(OwnerId::new(77)));
        assert!(customer.coordinates.is_none());
    }

    #[test]
    fn test_customer_from_sparse_contact() {
        let customer = customer_from_contact(&Contact {
            id: 9,
            zip_code: Some("abc".to_string()),
            ..Contact::default()
        });
        assert_eq!(customer.name, UNNAMED);
        assert!(customer.postal_code.is_none());
        assert!(customer.full_address.is_none());
        assert!(!customer.has_usable_address());
    }

    #[test]
    fn test_full_state_name_becomes_code() {
        let contact: Contact = serde_json::from_str(
            r#"{"Id": 12, "ZipCode": "60115170", "City": {"Name": "Fortaleza"},
                "State": {"Name": "Ceará"}}"#,
        )
        .unwrap();
        let customer = customer_from_contact(&contact);
        assert_eq!(customer.state.as_deref(), Some("CE"));
    }

    #[test]
    fn test_unknown_state_falls_back_to_postal_code() {
        let customer = customer_from_contact(&Contact {
            id: 13,
            zip_code: Some("59000000".to_string()),
            state: Some("Estado".to_string()),
            ..Contact::default()
        });
        assert_eq!(customer.state.as_deref(), Some("RN"));
    }

    #[test]
    fn test_cpf_from_document() {
        let customer = customer_from_contact(&Contact {
            id: 10,
            document: Some("123.456.789-09".to_string()),
            ..Contact::default()
        });
        assert_eq!(customer.cpf.as_deref(), Some("123.456.789-09"));
        assert!(customer.cnpj.is_none());
    }

    #[test]
    fn test_sale_from_deal() {
        let deal = Deal {
            id: 3,
            contact_id: Some(501),
            amount: Some(Decimal::new(123_456, 3)),
            status_id: Some(2),
            ..Deal::default()
        };
        let sale = sale_from_deal(&deal).unwrap();
        assert_eq!(sale.customer_id, CustomerId::new(501));
        assert_eq!(sale.deal_value, Decimal::new(12_346, 2));
        assert_eq!(sale.status, DealStatus::Won);
    }

    #[test]
    fn test_deal_without_contact_is_skipped() {
        assert!(sale_from_deal(&Deal::default()).is_none());
    }
}
