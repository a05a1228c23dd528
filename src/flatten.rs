//! # Stage: FlatKey
//!
//! ## Responsibility
//! Flattens a JSON document into a map from dotted path → list of scalar
//! strings. This one representation feeds three consumers: the dedup
//! histograms (request fields), the denoise diff (response fields), and the
//! matcher's scalar comparison.
//!
//! ## Guarantees
//! - Deterministic: the same document always produces the same map
//! - Array positions never appear in paths — `[a,b]` and `[b,a]` flatten to
//!   the same keys with values concatenated in iteration order, which is
//!   what makes the order-insensitive array match possible downstream
//! - Non-panicking: no `unwrap` or `expect` on any input
//!
//! ## NOT Responsible For
//! - Deciding which paths are noisy (that is the anchor cache / denoise)
//! - Comparing two documents (that is the matcher)

use std::collections::HashMap;

use serde_json::Value;

/// Canonical string form of a JSON scalar.
///
/// Numbers are canonicalized through `f64` in upper-case scientific notation
/// (`1234` → `1.234E3`), so `1`, `1.0` and `1e0` all collapse to one token.
/// Returns `None` for objects and arrays.
pub fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(format!("{:E}", n.as_f64().unwrap_or(0.0))),
        Value::String(s) => Some(s.clone()),
        Value::Object(_) | Value::Array(_) => None,
    }
}

/// Flatten a JSON value into dotted paths.
///
/// Scalars land at the empty path; object keys prefix their children's
/// paths; array elements merge into their parent's paths.
pub fn flatten(v: &Value) -> HashMap<String, Vec<String>> {
    let mut out = HashMap::new();
    match v {
        Value::Object(map) => {
            for (k, child) in map {
                for (ck, cv) in flatten(child) {
                    let key = if ck.is_empty() { k.clone() } else { format!("{}.{}", k, ck) };
                    out.entry(key).or_insert_with(Vec::new).extend(cv);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                for (ck, cv) in flatten(item) {
                    out.entry(ck).or_insert_with(Vec::new).extend(cv);
                }
            }
        }
        scalar => {
            if let Some(s) = scalar_string(scalar) {
                out.insert(String::new(), vec![s]);
            }
        }
    }
    out
}

/// Merge a response/request body into `m` under the `body` prefix.
///
/// A body that parses as JSON is flattened (`body.<path>`, or bare `body`
/// for a scalar root); anything else is kept as raw text at key `body`.
pub fn add_body(body: &str, m: &mut HashMap<String, Vec<String>>) {
    match serde_json::from_str::<Value>(body) {
        Ok(parsed) => {
            for (k, v) in flatten(&parsed) {
                let key = if k.is_empty() { "body".to_string() } else { format!("body.{}", k) };
                m.insert(key, v);
            }
        }
        Err(_) => {
            m.insert("body".to_string(), vec![body.to_string()]);
        }
    }
}
