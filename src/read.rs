//! Reader interpreter: store records in, typed output objects out.
//!
//! Walks a reader plan depth-first against the store, resolving links record
//! to record. The read is all-or-nothing: the first field that is genuinely
//! absent aborts the pass and reports a `Missing` outcome naming it, so a
//! consumer never renders a tree with holes. An explicit stored `null` is a
//! known value, not missing data, and never consults the missing-field
//! handler; that distinction is the central correctness property here.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde_json::{Map as JsonMap, Value as JsonValue, json};

use crate::env::MissingFieldHandler;
use crate::key::{ensure_arguments_bound, field_key};
use crate::plan::ReaderNode;
use crate::store::{Record, RecordState, Store};
use crate::value::{DataId, DataValue, Link, Variables};

/// Opaque, resolve-later pointer to a nested consumer unit: the record it
/// starts from, the unit's name, and the variables needed to read it. The
/// embedding consumer decides when (and whether) the nested read happens.
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentReference {
    pub record_id: DataId,
    pub fragment_name: String,
    pub variables: Variables,
}

/// The first field a read pass found absent.
#[derive(Clone, Debug, PartialEq)]
pub struct MissingField {
    pub record_id: DataId,
    pub field_name: String,
    pub field_key: String,
}

/// Soft-fail result of a read pass: either the whole output or the first
/// missing field. Missing data is a normal signal, never an error.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadOutcome {
    Complete(ReadValue),
    Missing(MissingField),
}

impl ReadOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, ReadOutcome::Complete(_))
    }
}

/// A value in the typed output tree produced by a read pass.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ReadValue>),
    Object(BTreeMap<String, ReadValue>),
    Fragment(FragmentReference),
}

impl ReadValue {
    /// Render the output as JSON for consumers that want a plain tree.
    /// Fragment references render as their opaque descriptor.
    pub fn to_json(&self) -> JsonValue {
        match self {
            ReadValue::Null => JsonValue::Null,
            ReadValue::Bool(b) => JsonValue::Bool(*b),
            ReadValue::Int(i) => json!(i),
            ReadValue::Float(f) => json!(f),
            ReadValue::Str(s) => JsonValue::String(s.clone()),
            ReadValue::List(items) => {
                JsonValue::Array(items.iter().map(ReadValue::to_json).collect())
            }
            ReadValue::Object(fields) => {
                let mut map = JsonMap::new();
                for (key, value) in fields {
                    map.insert(key.clone(), value.to_json());
                }
                JsonValue::Object(map)
            }
            ReadValue::Fragment(reference) => json!({
                "__fragment": reference.fragment_name,
                "__record": reference.record_id,
                "variables": reference.variables,
            }),
        }
    }
}

enum Walk<T> {
    Done(T),
    Missing(MissingField),
}

/// Read a plan against the store starting at `record_id`.
///
/// A deleted starting record reads as `null`. A never-populated starting
/// record is walked as if empty, so the outcome names the first field the
/// plan wanted from it.
pub fn read(
    store: &Store,
    plan: &[ReaderNode],
    record_id: &str,
    variables: &Variables,
    handler: Option<&MissingFieldHandler>,
) -> Result<ReadOutcome> {
    let walk = match store.get(record_id) {
        RecordState::Deleted => return Ok(ReadOutcome::Complete(ReadValue::Null)),
        RecordState::Present(record) => {
            read_selections(store, plan, record, record_id, variables, handler)?
        }
        RecordState::Missing => {
            let empty = Record::new();
            read_selections(store, plan, &empty, record_id, variables, handler)?
        }
    };
    Ok(match walk {
        Walk::Done(value) => ReadOutcome::Complete(value),
        Walk::Missing(missing) => ReadOutcome::Missing(missing),
    })
}

/// Resolve a fragment reference produced by an earlier read.
pub fn read_fragment(
    store: &Store,
    reference: &FragmentReference,
    plan: &[ReaderNode],
    handler: Option<&MissingFieldHandler>,
) -> Result<ReadOutcome> {
    read(
        store,
        plan,
        &reference.record_id,
        &reference.variables,
        handler,
    )
}

fn read_selections(
    store: &Store,
    plan: &[ReaderNode],
    record: &Record,
    record_id: &str,
    variables: &Variables,
    handler: Option<&MissingFieldHandler>,
) -> Result<Walk<ReadValue>> {
    let mut output = BTreeMap::new();
    for node in plan {
        match node {
            ReaderNode::Scalar { field_name, .. } => {
                ensure_arguments_bound(field_name, node.arguments(), variables)?;
                let key = field_key(field_name, node.arguments())?;
                let value = match record.get(&key) {
                    Some(stored) => stored_value(stored),
                    None => {
                        match substitute(handler, record, record_id, field_name, node, variables) {
                            Some(link) => stored_value(&DataValue::Link(link)),
                            None => {
                                return Ok(Walk::Missing(MissingField {
                                    record_id: record_id.to_string(),
                                    field_name: field_name.clone(),
                                    field_key: key,
                                }));
                            }
                        }
                    }
                };
                output.insert(node.output_key().to_string(), value);
            }
            ReaderNode::Linked {
                field_name,
                selections,
                ..
            } => {
                ensure_arguments_bound(field_name, node.arguments(), variables)?;
                let key = field_key(field_name, node.arguments())?;
                let walk = match record.get(&key) {
                    Some(stored) => {
                        read_linked(store, selections, stored, field_name, variables, handler)?
                    }
                    None => {
                        match substitute(handler, record, record_id, field_name, node, variables) {
                            Some(link) => {
                                read_link(store, selections, &link, variables, handler)?
                            }
                            None => {
                                return Ok(Walk::Missing(MissingField {
                                    record_id: record_id.to_string(),
                                    field_name: field_name.clone(),
                                    field_key: key,
                                }));
                            }
                        }
                    }
                };
                match walk {
                    Walk::Done(value) => {
                        output.insert(node.output_key().to_string(), value);
                    }
                    Walk::Missing(missing) => return Ok(Walk::Missing(missing)),
                }
            }
            ReaderNode::Fragment { fragment_name } => {
                output.insert(
                    fragment_name.clone(),
                    ReadValue::Fragment(FragmentReference {
                        record_id: record_id.to_string(),
                        fragment_name: fragment_name.clone(),
                        variables: variables.clone(),
                    }),
                );
            }
        }
    }
    Ok(Walk::Done(ReadValue::Object(output)))
}

fn read_linked(
    store: &Store,
    selections: &[ReaderNode],
    stored: &DataValue,
    field_name: &str,
    variables: &Variables,
    handler: Option<&MissingFieldHandler>,
) -> Result<Walk<ReadValue>> {
    match stored {
        // A known null: never missing, never sent to the handler.
        DataValue::Null => Ok(Walk::Done(ReadValue::Null)),
        DataValue::Link(link) => read_link(store, selections, link, variables, handler),
        DataValue::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match read_linked(store, selections, item, field_name, variables, handler)? {
                    Walk::Done(value) => out.push(value),
                    Walk::Missing(missing) => return Ok(Walk::Missing(missing)),
                }
            }
            Ok(Walk::Done(ReadValue::List(out)))
        }
        other => bail!("linked field `{field_name}` holds a scalar value {other:?}"),
    }
}

fn read_link(
    store: &Store,
    selections: &[ReaderNode],
    link: &Link,
    variables: &Variables,
    handler: Option<&MissingFieldHandler>,
) -> Result<Walk<ReadValue>> {
    match store.get(&link.target) {
        // An explicitly deleted record reads as null; a record the store has
        // never seen is walked as empty so the first wanted field is named.
        RecordState::Deleted => Ok(Walk::Done(ReadValue::Null)),
        RecordState::Present(record) => {
            read_selections(store, selections, record, &link.target, variables, handler)
        }
        RecordState::Missing => {
            let empty = Record::new();
            read_selections(store, selections, &empty, &link.target, variables, handler)
        }
    }
}

fn substitute(
    handler: Option<&MissingFieldHandler>,
    record: &Record,
    record_id: &str,
    field_name: &str,
    node: &ReaderNode,
    variables: &Variables,
) -> Option<Link> {
    handler.and_then(|handler| {
        handler(record, record_id, field_name, node.arguments(), variables)
    })
}

fn stored_value(value: &DataValue) -> ReadValue {
    match value {
        DataValue::Null => ReadValue::Null,
        DataValue::Bool(b) => ReadValue::Bool(*b),
        DataValue::Int(i) => ReadValue::Int(*i),
        DataValue::Float(f) => ReadValue::Float(*f),
        DataValue::Str(s) => ReadValue::Str(s.clone()),
        DataValue::Link(link) => {
            let mut fields = BTreeMap::new();
            fields.insert("__link".to_string(), ReadValue::Str(link.target.clone()));
            ReadValue::Object(fields)
        }
        DataValue::List(items) => ReadValue::List(items.iter().map(stored_value).collect()),
    }
}
