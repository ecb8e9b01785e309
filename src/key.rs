//! Argument-aware field keys and record identity.
//!
//! The same field name can appear with different argument sets in one query
//! (`repositories(last: 10)` next to `repositories(last: 20)`), so the key a
//! value is stored under is never the bare field name. It is the field name
//! plus a canonical, name-sorted rendering of its arguments. Keys encode
//! argument names and the names of the variables supplying them, not resolved
//! values; reads and writes that bind different values to the same variable
//! name share one store slot.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use smallvec::SmallVec;

use crate::value::{DataId, IDENTITY_FIELD, Variables};

/// One argument of a field selection, as emitted in generated artifacts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    #[serde(rename = "argumentName")]
    pub name: String,
    #[serde(flatten)]
    pub value: ArgumentValue,
}

/// The value position of an argument: a variable reference or an inline
/// literal fixed at compile time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ArgumentValue {
    #[serde(rename = "variableName")]
    Variable(String),
    #[serde(rename = "literalValue")]
    Literal(JsonValue),
}

impl ArgumentValue {
    fn key_atom(&self) -> String {
        match self {
            ArgumentValue::Variable(name) => name.clone(),
            ArgumentValue::Literal(JsonValue::String(s)) => s.clone(),
            ArgumentValue::Literal(other) => other.to_string(),
        }
    }
}

/// Compute the storage key for a field selection.
///
/// Deterministic: arguments are sorted by argument name before encoding, so
/// declaration order in the source query never affects the key. Equal
/// argument sets collide to one key; differing argument sets never do.
pub fn field_key(field_name: &str, arguments: &[Argument]) -> Result<String> {
    if arguments.is_empty() {
        return Ok(field_name.to_string());
    }
    let mut ordered: SmallVec<[&Argument; 4]> = arguments.iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name));

    let mut key = String::from(field_name);
    for argument in ordered {
        if argument.name.is_empty() {
            bail!("field `{field_name}` carries an argument with an empty name");
        }
        key.push_str("____");
        key.push_str(&argument.name);
        key.push_str("___");
        key.push_str(&argument.value.key_atom());
    }
    Ok(key)
}

/// Fail fast when a plan references a variable the caller never bound.
pub fn ensure_arguments_bound(
    field_name: &str,
    arguments: &[Argument],
    variables: &Variables,
) -> Result<()> {
    for argument in arguments {
        if let ArgumentValue::Variable(name) = &argument.value {
            if !variables.contains_key(name) {
                bail!(
                    "field `{field_name}` references variable `${name}`, which is not bound"
                );
            }
        }
    }
    Ok(())
}

/// Extract the record id of a linked response object from its identity field.
///
/// An object reached through a `Linked` selection that lacks a scalar `id`
/// cannot be addressed in the store and is a fatal normalization error.
pub fn record_id_of(object: &JsonMap<String, JsonValue>) -> Result<DataId> {
    match object.get(IDENTITY_FIELD) {
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(JsonValue::Number(n)) => Ok(n.to_string()),
        Some(other) => bail!(
            "identity field `{IDENTITY_FIELD}` must be a string or number, found {other}"
        ),
        None => bail!("linked object is missing its `{IDENTITY_FIELD}` identity field"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn var(name: &str, variable: &str) -> Argument {
        Argument {
            name: name.to_string(),
            value: ArgumentValue::Variable(variable.to_string()),
        }
    }

    #[test]
    fn bare_name_without_arguments() -> Result<()> {
        assert_eq!(field_key("viewer", &[])?, "viewer");
        Ok(())
    }

    #[test]
    fn encodes_argument_and_variable_names() -> Result<()> {
        let key = field_key("repositories", &[var("last", "first")])?;
        assert_eq!(key, "repositories____last___first");
        Ok(())
    }

    #[test]
    fn key_ignores_declaration_order() -> Result<()> {
        let forward = field_key("search", &[var("after", "cursor"), var("query", "text")])?;
        let reversed = field_key("search", &[var("query", "text"), var("after", "cursor")])?;
        assert_eq!(forward, reversed);
        assert_eq!(forward, "search____after___cursor____query___text");
        Ok(())
    }

    #[test]
    fn differing_argument_sets_never_collide() -> Result<()> {
        let by_first = field_key("repositories", &[var("first", "first")])?;
        let by_last = field_key("repositories", &[var("last", "first")])?;
        assert_ne!(by_first, by_last);
        Ok(())
    }

    #[test]
    fn literal_arguments_use_their_rendering() -> Result<()> {
        let key = field_key(
            "user",
            &[Argument {
                name: "login".to_string(),
                value: ArgumentValue::Literal(json!("ada")),
            }],
        )?;
        assert_eq!(key, "user____login___ada");
        let key = field_key(
            "repositories",
            &[Argument {
                name: "last".to_string(),
                value: ArgumentValue::Literal(json!(10)),
            }],
        )?;
        assert_eq!(key, "repositories____last___10");
        Ok(())
    }

    #[test]
    fn empty_argument_name_is_fatal() {
        let argument = Argument {
            name: String::new(),
            value: ArgumentValue::Variable("x".to_string()),
        };
        assert!(field_key("user", &[argument]).is_err());
    }

    #[test]
    fn unbound_variable_is_fatal() {
        let mut variables = Variables::new();
        variables.insert("present".to_string(), json!(1));
        assert!(ensure_arguments_bound("f", &[var("a", "present")], &variables).is_ok());
        assert!(ensure_arguments_bound("f", &[var("a", "absent")], &variables).is_err());
    }

    #[test]
    fn record_ids_come_from_the_identity_field() -> Result<()> {
        let object = json!({"id": "u1", "name": "Ada"});
        assert_eq!(record_id_of(object.as_object().unwrap())?, "u1");
        let numeric = json!({"id": 7});
        assert_eq!(record_id_of(numeric.as_object().unwrap())?, "7");
        Ok(())
    }

    #[test]
    fn missing_identity_field_is_fatal() {
        let object = json!({"name": "Ada"});
        assert!(record_id_of(object.as_object().unwrap()).is_err());
    }
}
