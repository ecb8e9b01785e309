//! Compile-time plan artifacts consumed by the interpreters.
//!
//! The compiler emits one JSON artifact per entrypoint: the query text, the
//! normalization plan describing how to decompose a response into records,
//! the reader plan describing how to rebuild a typed output, and any nested
//! refetch query artifacts. The runtime never inspects query text.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::key::Argument;
use crate::value::Variables;

/// One node of a normalization plan, mirroring the shape of a query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NormalizationNode {
    Scalar {
        #[serde(rename = "fieldName")]
        field_name: String,
        #[serde(default)]
        arguments: Option<Vec<Argument>>,
    },
    Linked {
        #[serde(rename = "fieldName")]
        field_name: String,
        #[serde(default)]
        arguments: Option<Vec<Argument>>,
        selections: Vec<NormalizationNode>,
    },
}

impl NormalizationNode {
    pub fn field_name(&self) -> &str {
        match self {
            NormalizationNode::Scalar { field_name, .. }
            | NormalizationNode::Linked { field_name, .. } => field_name,
        }
    }

    pub fn arguments(&self) -> &[Argument] {
        match self {
            NormalizationNode::Scalar { arguments, .. }
            | NormalizationNode::Linked { arguments, .. } => {
                arguments.as_deref().unwrap_or(&[])
            }
        }
    }
}

/// One node of a reader plan. `Fragment` names a nested consumer unit that is
/// embedded by reference instead of being flattened into the output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ReaderNode {
    Scalar {
        #[serde(rename = "fieldName")]
        field_name: String,
        #[serde(default)]
        alias: Option<String>,
        #[serde(default)]
        arguments: Option<Vec<Argument>>,
    },
    Linked {
        #[serde(rename = "fieldName")]
        field_name: String,
        #[serde(default)]
        alias: Option<String>,
        #[serde(default)]
        arguments: Option<Vec<Argument>>,
        selections: Vec<ReaderNode>,
    },
    Fragment {
        #[serde(rename = "fragmentName")]
        fragment_name: String,
    },
}

impl ReaderNode {
    pub fn arguments(&self) -> &[Argument] {
        match self {
            ReaderNode::Scalar { arguments, .. } | ReaderNode::Linked { arguments, .. } => {
                arguments.as_deref().unwrap_or(&[])
            }
            ReaderNode::Fragment { .. } => &[],
        }
    }

    /// The key of this node in the output object: the alias when present,
    /// the field name otherwise.
    pub fn output_key(&self) -> &str {
        match self {
            ReaderNode::Scalar {
                field_name, alias, ..
            }
            | ReaderNode::Linked {
                field_name, alias, ..
            } => alias.as_deref().unwrap_or(field_name),
            ReaderNode::Fragment { fragment_name } => fragment_name,
        }
    }
}

/// Compile-time artifact bundling everything needed to fetch and read one
/// query: the unit consumers request and resolve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entrypoint {
    pub name: String,
    #[serde(rename = "queryText")]
    pub query_text: String,
    #[serde(rename = "normalizationAst")]
    pub normalization: Vec<NormalizationNode>,
    #[serde(rename = "readerAst")]
    pub reader: Vec<ReaderNode>,
    #[serde(rename = "nestedRefetchQueries", default)]
    pub nested_refetch_queries: Vec<Entrypoint>,
}

/// Load an entrypoint artifact from a JSON file.
pub fn load_entrypoint(path: &Path) -> Result<Entrypoint> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read entrypoint artifact {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("malformed entrypoint artifact {}", path.display()))
}

/// Load a variables file: a flat JSON object of variable name to value.
pub fn load_variables(path: &Path) -> Result<Variables> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read variables file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("malformed variables file {}", path.display()))
}
