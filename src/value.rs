//! Stored value model shared by the normalizer and the reader.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue, json};

/// Opaque identifier of one normalized record.
pub type DataId = String;

/// Reserved id of the singleton root record holding top-level query fields.
pub const ROOT_ID: &str = "__ROOT";

/// Name of the identity field every addressable record carries.
pub const IDENTITY_FIELD: &str = "id";

/// Variable bindings supplied alongside a query, keyed by variable name.
pub type Variables = BTreeMap<String, JsonValue>;

/// Reference from one record's field to another record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(rename = "__link")]
    pub target: DataId,
}

impl Link {
    pub fn to(target: impl Into<DataId>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

/// A value stored under a field key.
///
/// Absence is an absent map key on the record; there is no placeholder
/// variant, so an "undefined" can never persist.
#[derive(Clone, Debug, PartialEq)]
pub enum DataValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Link(Link),
    List(Vec<DataValue>),
}

impl DataValue {
    /// Convert a scalar JSON value from a network response into its stored form.
    pub fn from_scalar_json(value: &JsonValue) -> Result<DataValue> {
        match value {
            JsonValue::Null => Ok(DataValue::Null),
            JsonValue::Bool(b) => Ok(DataValue::Bool(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(DataValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(DataValue::Float(f))
                } else {
                    bail!("numeric response value {n} is out of range")
                }
            }
            JsonValue::String(s) => Ok(DataValue::Str(s.clone())),
            JsonValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(DataValue::from_scalar_json(item)?);
                }
                Ok(DataValue::List(out))
            }
            JsonValue::Object(_) => {
                bail!("scalar field received an object; the plan expected no selections here")
            }
        }
    }

    /// Render the stored value as JSON for diagnostics and store dumps.
    pub fn to_json(&self) -> JsonValue {
        match self {
            DataValue::Null => JsonValue::Null,
            DataValue::Bool(b) => JsonValue::Bool(*b),
            DataValue::Int(i) => json!(i),
            DataValue::Float(f) => json!(f),
            DataValue::Str(s) => JsonValue::String(s.clone()),
            DataValue::Link(link) => {
                let mut map = JsonMap::new();
                map.insert("__link".into(), JsonValue::String(link.target.clone()));
                JsonValue::Object(map)
            }
            DataValue::List(items) => {
                JsonValue::Array(items.iter().map(DataValue::to_json).collect())
            }
        }
    }
}
