use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Every PRP endpoint wraps its result in this envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub response_code: i64,
    pub payload: Option<T>,
}

#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrpDepartment {
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name_eng: String,
    #[serde(default)]
    pub name_bng: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_wing: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrpEmployee {
    #[serde(default, deserialize_with = "string_from_number_or_string")]
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name_eng: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub designation_eng: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    /// Base64 image, sometimes wrapped in a data URI.
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "optional_id_from_number_or_string")]
    pub department_id: Option<u64>,
}

/// A portal employee row that could not be read, with whatever identity
/// could be salvaged for the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedEmployee {
    pub user_id: String,
    pub name: String,
    pub reason: String,
}

/// One row of an `employee_details` listing.
pub type EmployeeRecord = Result<PrpEmployee, RejectedEmployee>;

impl PrpEmployee {
    /// Reads a single row so that one malformed record does not sink the
    /// rest of its department.
    pub fn from_value(value: Value) -> EmployeeRecord {
        let user_id = match value.get("userId") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        let name = value
            .get("nameEng")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        serde_json::from_value(value).map_err(|e| RejectedEmployee {
            user_id,
            name,
            reason: e.to_string(),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn id_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn optional_id_from_number_or_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::String(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrString::String(s)) => {
            s.trim().parse().map(Some).map_err(serde::de::Error::custom)
        }
    }
}

fn string_from_number_or_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(String::new()),
        Some(NumberOrString::Number(n)) => Ok(n.to_string()),
        Some(NumberOrString::String(s)) => Ok(s.trim().to_string()),
    }
}
