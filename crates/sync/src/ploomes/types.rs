//! Ploomes API response shapes.
//!
//! Only the fields the adapters read are declared; everything else in the
//! payload is ignored.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

/// OData collection envelope.
#[derive(Debug, Deserialize)]
pub struct ODataPage<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

/// A CRM contact (company or person).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Contact {
    pub id: i64,
    pub name: Option<String>,
    /// CPF or CNPJ, depending on the contact type
    pub document: Option<String>,
    #[serde(rename = "CNPJ")]
    pub cnpj: Option<String>,
    #[serde(rename = "CPF")]
    pub cpf: Option<String>,
    pub email: Option<String>,
    pub phones: Vec<Phone>,
    /// Arrives as a string or a number
    #[serde(deserialize_with = "string_or_number")]
    pub zip_code: Option<String>,
    pub street_address: Option<String>,
    pub street_address_number: Option<String>,
    pub street_address_line2: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<City>,
    #[serde(deserialize_with = "state_name")]
    pub state: Option<String>,
    pub tags: Vec<ContactTag>,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Phone {
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct City {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContactTag {
    pub tag_id: i64,
}

/// A CRM deal.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Deal {
    pub id: i64,
    pub title: Option<String>,
    pub contact_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub stage_id: Option<i64>,
    pub status_id: Option<i64>,
    pub amount: Option<Decimal>,
    pub create_date: Option<DateTime<Utc>>,
    pub last_update_date: Option<DateTime<Utc>>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// `State` is either a plain abbreviation or an expanded `{ "Short": "CE" }`.
fn state_name<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Object(map)) => map
            .get("Short")
            .or_else(|| map.get("Name"))
            .and_then(serde_json::Value::as_str)
            .map(String::from),
        _ => None,
    })
}
