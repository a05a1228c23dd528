//! # Stage: Matcher
//!
//! ## Responsibility
//! Decides whether an observed response still matches the recorded one.
//! Bodies are compared as JSON trees under a noise mask; headers are diffed
//! key by key with per-header diagnostics.
//!
//! ## Guarantees
//! - Noise is monotone: adding a path to the mask can only turn a mismatch
//!   into a match, never the reverse
//! - Array comparison is order-insensitive — element order in API responses
//!   is not treated as a contract
//! - Booleans out, errors only for unparseable body input
//!
//! ## NOT Responsible For
//! - Choosing the noise mask (denoise learning lives in the service)
//! - Status-code comparison (a plain equality at the call site)

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::flatten::scalar_string;
use crate::models::{Header, HeaderResult};

/// Compare two JSON bodies under a noise mask.
///
/// `noise` paths are relative to the body root (no `body.` prefix). A parse
/// failure on either operand is propagated; a root-level type mismatch is a
/// plain `false`.
pub fn match_bodies(expected: &str, actual: &str, noise: &[String]) -> Result<bool, serde_json::Error> {
    let exp: Value = serde_json::from_str(expected)?;
    let act: Value = serde_json::from_str(actual)?;
    Ok(match_values(&exp, &act, "", noise))
}

/// True when `path` or any of its ancestors is masked.
fn is_noised(path: &str, noise: &[String]) -> bool {
    noise
        .iter()
        .any(|n| path == n || (path.len() > n.len() && path.starts_with(n.as_str()) && path.as_bytes()[n.len()] == b'.'))
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn match_values(expected: &Value, actual: &Value, path: &str, noise: &[String]) -> bool {
    if !path.is_empty() && is_noised(path, noise) {
        return true;
    }
    match (expected, actual) {
        (Value::Object(exp), Value::Object(act)) => {
            if exp.len() != act.len() {
                tracing::debug!(path, "object key count differs");
                return false;
            }
            for (k, ev) in exp {
                let Some(av) = act.get(k) else {
                    tracing::debug!(path, key = %k, "key missing in actual");
                    return false;
                };
                if !match_values(ev, av, &join_path(path, k), noise) {
                    return false;
                }
            }
            true
        }
        (Value::Array(exp), Value::Array(act)) => {
            if exp.len() != act.len() {
                tracing::debug!(path, "array length differs");
                return false;
            }
            // Order-insensitive: each expected element consumes one matching
            // actual element.
            let mut used = vec![false; act.len()];
            for ev in exp {
                let mut found = false;
                for (i, av) in act.iter().enumerate() {
                    if !used[i] && match_values(ev, av, path, noise) {
                        used[i] = true;
                        found = true;
                        break;
                    }
                }
                if !found {
                    tracing::debug!(path, "array element without a match");
                    return false;
                }
            }
            true
        }
        (e, a) => match (scalar_string(e), scalar_string(a)) {
            (Some(es), Some(as_)) => es == as_,
            // One side scalar, the other a container: type mismatch.
            _ => false,
        },
    }
}

/// Diff two header maps, appending one [`HeaderResult`] per key in the union.
///
/// Keys are visited in sorted order (expected keys first, then keys present
/// only in the actual map) so the diagnostics list is deterministic. Returns
/// `true` iff every entry is normal.
pub fn compare_headers(
    expected: &HashMap<String, Vec<String>>,
    actual: &HashMap<String, Vec<String>>,
    res: &mut Vec<HeaderResult>,
    noise: &HashSet<String>,
) -> bool {
    let mut all_normal = true;

    let mut exp_keys: Vec<&String> = expected.keys().collect();
    exp_keys.sort();
    for k in exp_keys {
        let ev = &expected[k];
        let entry = match actual.get(k) {
            Some(av) if av == ev => HeaderResult {
                normal: true,
                expected: Header { key: k.clone(), value: Some(ev.clone()) },
                actual: Header { key: k.clone(), value: Some(av.clone()) },
            },
            Some(av) => HeaderResult {
                normal: noise.contains(k),
                expected: Header { key: k.clone(), value: Some(ev.clone()) },
                actual: Header { key: k.clone(), value: Some(av.clone()) },
            },
            None => HeaderResult {
                normal: false,
                expected: Header { key: k.clone(), value: Some(ev.clone()) },
                actual: Header { key: k.clone(), value: None },
            },
        };
        all_normal &= entry.normal;
        res.push(entry);
    }

    let mut extra_keys: Vec<&String> = actual.keys().filter(|k| !expected.contains_key(*k)).collect();
    extra_keys.sort();
    for k in extra_keys {
        let entry = HeaderResult {
            normal: noise.contains(k),
            expected: Header { key: k.clone(), value: None },
            actual: Header { key: k.clone(), value: Some(actual[k].clone()) },
        };
        all_normal &= entry.normal;
        res.push(entry);
    }

    all_normal
}
