//! Normalization interpreter: response data in, store records out.
//!
//! Walks a normalization plan depth-first in lockstep with the response
//! object, staging every field write into a `StoreUpdate`. The caller commits
//! the whole batch at once, so subscribers hear about one response exactly
//! once. Normalizing the same response twice stages the same writes and
//! leaves the store unchanged, which is what makes refetch and retry safe.

use anyhow::{Context, Result, bail};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::key::{ensure_arguments_bound, field_key, record_id_of};
use crate::plan::NormalizationNode;
use crate::store::StoreUpdate;
use crate::value::{DataValue, Link, Variables};

/// Decompose one response into a batch of record writes rooted at
/// `root_record_id`. Pure: the store itself is untouched until the caller
/// commits the returned update.
pub fn normalize(
    plan: &[NormalizationNode],
    data: &JsonValue,
    variables: &Variables,
    root_record_id: &str,
) -> Result<StoreUpdate> {
    let object = match data.as_object() {
        Some(object) => object,
        None => bail!("response data must be a JSON object, found {data}"),
    };
    let mut update = StoreUpdate::new();
    normalize_object(&mut update, plan, object, variables, root_record_id)?;
    Ok(update)
}

fn normalize_object(
    update: &mut StoreUpdate,
    plan: &[NormalizationNode],
    object: &JsonMap<String, JsonValue>,
    variables: &Variables,
    record_id: &str,
) -> Result<()> {
    for node in plan {
        ensure_arguments_bound(node.field_name(), node.arguments(), variables)?;
        let key = field_key(node.field_name(), node.arguments())?;
        match node {
            NormalizationNode::Scalar { field_name, .. } => {
                // A field the response omitted writes nothing: absence stays
                // absent, it never persists as a placeholder.
                if let Some(value) = object.get(field_name) {
                    let stored = DataValue::from_scalar_json(value)
                        .with_context(|| format!("while normalizing field `{field_name}`"))?;
                    update.set(record_id, key, stored);
                }
            }
            NormalizationNode::Linked {
                field_name,
                selections,
                ..
            } => {
                if let Some(value) = object.get(field_name) {
                    let stored =
                        normalize_linked_value(update, selections, value, variables, field_name)?;
                    update.set(record_id, key, stored);
                }
            }
        }
    }
    Ok(())
}

fn normalize_linked_value(
    update: &mut StoreUpdate,
    selections: &[NormalizationNode],
    value: &JsonValue,
    variables: &Variables,
    field_name: &str,
) -> Result<DataValue> {
    match value {
        // An explicit null is stored as null, not as a dangling link.
        JsonValue::Null => Ok(DataValue::Null),
        JsonValue::Array(items) => {
            let mut links = Vec::with_capacity(items.len());
            for item in items {
                links.push(normalize_linked_value(
                    update, selections, item, variables, field_name,
                )?);
            }
            Ok(DataValue::List(links))
        }
        JsonValue::Object(object) => {
            let nested_id = record_id_of(object)
                .with_context(|| format!("while normalizing field `{field_name}`"))?;
            normalize_object(update, selections, object, variables, &nested_id)?;
            Ok(DataValue::Link(Link::to(nested_id)))
        }
        other => bail!(
            "linked field `{field_name}` expects an object, array, or null, found {other}"
        ),
    }
}
