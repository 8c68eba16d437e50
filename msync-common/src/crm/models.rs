//! CRM record shapes
//!
//! Unknown fields are ignored. Ids arrive as strings or numbers depending on
//! the endpoint and are normalized to strings. Required fields that are
//! missing decode as empty strings; [`CrmEvent::validate`] and friends turn
//! that into a per-record failure instead of failing the whole list.

use crate::Error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Constituent {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub member_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub address_lines: Vec<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
}

impl Constituent {
    pub fn address_line(&self, index: usize) -> Option<&str> {
        self.address_lines.get(index).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Coordinator {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Coordinator {
    /// An object with no usable fields is treated as "no coordinator"
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.phone.is_none()
            && self.email.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CrmEvent {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub constituent_id: Option<String>,
    pub name: Option<String>,
    pub start_date: Option<String>,
    pub coordinator: Option<Coordinator>,
}

impl CrmEvent {
    pub fn coordinator(&self) -> Option<&Coordinator> {
        self.coordinator.as_ref().filter(|c| !c.is_empty())
    }

    pub fn validate(&self) -> crate::Result<()> {
        require("id", &self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Ticket {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub event_id: String,
    #[serde(default)]
    pub issued_at: String,
}

impl Ticket {
    /// Natural key used for idempotent upserts
    pub fn external_key(&self) -> String {
        external_key(self.id.as_deref(), &self.event_id, &self.issued_at)
    }

    pub fn validate(&self) -> crate::Result<()> {
        require("event_id", &self.event_id)?;
        require("issued_at", &self.issued_at)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CrmParkingPass {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub event_id: String,
    #[serde(default)]
    pub issued_at: String,
    pub pass_type: Option<String>,
    pub cost: Option<f64>,
}

impl CrmParkingPass {
    pub fn external_key(&self) -> String {
        external_key(self.id.as_deref(), &self.event_id, &self.issued_at)
    }

    pub fn validate(&self) -> crate::Result<()> {
        require("event_id", &self.event_id)?;
        require("issued_at", &self.issued_at)
    }
}

fn require(field: &str, value: &str) -> crate::Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("CRM record is missing {}", field)));
    }
    Ok(())
}

fn external_key(id: Option<&str>, event_id: &str, issued_at: &str) -> String {
    match id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("{}@{}", event_id, issued_at),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
    Float(f64),
}

impl From<StringOrNumber> for String {
    fn from(v: StringOrNumber) -> Self {
        match v {
            StringOrNumber::String(s) => s,
            StringOrNumber::Int(i) => i.to_string(),
            StringOrNumber::Float(f) => f.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<StringOrNumber>::deserialize(deserializer).map(|v| v.map(String::from))
}

/// Envelope of the list endpoints
///
/// Items are decoded one by one so a single malformed record cannot hide the
/// rest of the list.
#[derive(Debug, Deserialize)]
pub(crate) struct ListResponse {
    #[serde(default)]
    pub value: Vec<Value>,
}

impl ListResponse {
    /// Decode every item; one that does not decode at all becomes an empty
    /// record, which fails validation in the sync loop
    pub fn into_records<T: DeserializeOwned + Default>(self) -> Vec<T> {
        self.value
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::from_value(item).unwrap_or_else(|e| {
                    warn!(index, error = %e, "Undecodable CRM record");
                    T::default()
                })
            })
            .collect()
    }
}
