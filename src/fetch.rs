//! Fetch layer: canonical query identity and the read/fetch/re-read loop.
//!
//! Field keys deliberately alias across variable values (they encode
//! variable names); the fetch log must not, or a second page request would
//! never hit the network. Its cache key therefore hashes the query text with
//! the resolved variable values, canonically encoded.

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::env::Environment;
use crate::plan::Entrypoint;
use crate::read::ReadOutcome;
use crate::value::{ROOT_ID, Variables};

/// SHA-256 digest of a canonical encoding of (query text, variables).
/// Variables are name-sorted, so two equal bindings always collide.
pub fn query_cache_key(query_text: &str, variables: &Variables) -> Result<[u8; 32]> {
    let canonical = serde_cbor::to_vec(&(query_text, variables))?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Render a cache key as lowercase hexadecimal for diagnostics.
pub fn digest_hex(digest: &[u8; 32]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut buf = Vec::with_capacity(64);
    for byte in digest {
        buf.push(HEX[(byte >> 4) as usize]);
        buf.push(HEX[(byte & 0x0f) as usize]);
    }
    String::from_utf8(buf).expect("hex encoding is valid UTF-8")
}

/// Fetch and normalize an entrypoint unless an identical (query, variables)
/// pair already completed. Returns whether the network was hit. Failed
/// fetches are not logged, so the caller may retry them.
pub fn ensure_fetched(
    environment: &Environment,
    entrypoint: &Entrypoint,
    variables: &Variables,
) -> Result<bool> {
    let key = query_cache_key(&entrypoint.query_text, variables)?;
    if environment.already_fetched(key) {
        return Ok(false);
    }
    let response = environment.call_network(&entrypoint.query_text, variables)?;
    environment.normalize_response(&entrypoint.normalization, &response, variables, ROOT_ID)?;
    environment.mark_fetched(key);
    Ok(true)
}

/// The resolve loop: attempt a read; on missing data, fetch, normalize, and
/// read again. A read still missing after a successful fetch is returned as
/// the `Missing` outcome for the caller to judge.
pub fn resolve(
    environment: &Environment,
    entrypoint: &Entrypoint,
    variables: &Variables,
) -> Result<ReadOutcome> {
    let first = environment.read_entrypoint(entrypoint, variables)?;
    if first.is_complete() {
        return Ok(first);
    }
    ensure_fetched(environment, entrypoint, variables)?;
    environment.read_entrypoint(entrypoint, variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::NetworkFn;
    use crate::key::{Argument, ArgumentValue};
    use crate::plan::{NormalizationNode, ReaderNode};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn user_entrypoint() -> Entrypoint {
        Entrypoint {
            name: "UserPage".to_string(),
            query_text: "query UserPage ($userLogin: String!) { ... }".to_string(),
            normalization: vec![NormalizationNode::Linked {
                field_name: "user".to_string(),
                arguments: Some(vec![Argument {
                    name: "login".to_string(),
                    value: ArgumentValue::Variable("userLogin".to_string()),
                }]),
                selections: vec![
                    NormalizationNode::Scalar {
                        field_name: "id".to_string(),
                        arguments: None,
                    },
                    NormalizationNode::Scalar {
                        field_name: "name".to_string(),
                        arguments: None,
                    },
                ],
            }],
            reader: vec![ReaderNode::Linked {
                field_name: "user".to_string(),
                alias: None,
                arguments: Some(vec![Argument {
                    name: "login".to_string(),
                    value: ArgumentValue::Variable("userLogin".to_string()),
                }]),
                selections: vec![
                    ReaderNode::Scalar {
                        field_name: "id".to_string(),
                        alias: None,
                        arguments: None,
                    },
                    ReaderNode::Scalar {
                        field_name: "name".to_string(),
                        alias: None,
                        arguments: None,
                    },
                ],
            }],
            nested_refetch_queries: Vec::new(),
        }
    }

    fn variables_for(login: &str) -> Variables {
        let mut variables = Variables::new();
        variables.insert("userLogin".to_string(), json!(login));
        variables
    }

    fn counting_network(calls: Arc<AtomicUsize>) -> NetworkFn {
        Box::new(move |_, variables| {
            calls.fetch_add(1, Ordering::SeqCst);
            let login = variables["userLogin"].as_str().unwrap_or("?").to_string();
            Ok(json!({"user": {"id": "u1", "name": login}}))
        })
    }

    #[test]
    fn identical_queries_hit_the_network_once() -> Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let environment = Environment::new(counting_network(Arc::clone(&calls)));
        let entrypoint = user_entrypoint();
        let variables = variables_for("ada");

        assert!(ensure_fetched(&environment, &entrypoint, &variables)?);
        assert!(!ensure_fetched(&environment, &entrypoint, &variables)?);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn differing_variable_values_fetch_separately() -> Result<()> {
        // Unlike field keys, the fetch log distinguishes bound values.
        let calls = Arc::new(AtomicUsize::new(0));
        let environment = Environment::new(counting_network(Arc::clone(&calls)));
        let entrypoint = user_entrypoint();

        ensure_fetched(&environment, &entrypoint, &variables_for("ada"))?;
        ensure_fetched(&environment, &entrypoint, &variables_for("grace"))?;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let left = query_cache_key(&entrypoint.query_text, &variables_for("ada"))?;
        let right = query_cache_key(&entrypoint.query_text, &variables_for("grace"))?;
        assert_ne!(left, right);
        Ok(())
    }

    #[test]
    fn resolve_fetches_on_missing_and_reads_back() -> Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let environment = Environment::new(counting_network(Arc::clone(&calls)));
        let entrypoint = user_entrypoint();
        let variables = variables_for("ada");

        let outcome = resolve(&environment, &entrypoint, &variables)?;
        match outcome {
            ReadOutcome::Complete(value) => {
                assert_eq!(
                    value.to_json(),
                    json!({"user": {"id": "u1", "name": "ada"}})
                );
            }
            ReadOutcome::Missing(missing) => panic!("unexpected missing field {missing:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A second resolve is served from the store.
        resolve(&environment, &entrypoint, &variables)?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn cache_keys_are_stable_and_hex_renderable() -> Result<()> {
        let variables = variables_for("ada");
        let first = query_cache_key("query { viewer { id } }", &variables)?;
        let second = query_cache_key("query { viewer { id } }", &variables)?;
        assert_eq!(first, second);
        assert_eq!(digest_hex(&first).len(), 64);
        Ok(())
    }
}
