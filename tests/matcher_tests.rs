//! Tests for the comparison engine — header diffing under noise masks and
//! JSON body matching, driven as a vector table.

use std::collections::{HashMap, HashSet};

use recheck::matcher::{compare_headers, match_bodies};
use recheck::models::HeaderResult;

fn hdr(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
    pairs
        .iter()
        .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
        .collect()
}

fn noise(keys: &[&str]) -> HashSet<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

/// Re-key a diagnostics list by header name so assertions don't depend on
/// emission order.
fn by_key(results: &[HeaderResult]) -> HashMap<String, HeaderResult> {
    results
        .iter()
        .map(|r| {
            let key = if r.expected.value.is_some() {
                r.expected.key.clone()
            } else {
                r.actual.key.clone()
            };
            (key, r.clone())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Header diff table
// ---------------------------------------------------------------------------

#[test]
fn test_headers_keys_and_values_match() {
    let exp = hdr(&[("id", &["1234"]), ("app", &["sports", "study"])]);
    let act = hdr(&[("id", &["1234"]), ("app", &["sports", "study"])]);
    let mut res = Vec::new();
    assert!(compare_headers(&exp, &act, &mut res, &noise(&[])));
    let m = by_key(&res);
    assert!(m["id"].normal);
    assert!(m["app"].normal);
}

#[test]
fn test_headers_key_only_in_actual() {
    let exp = hdr(&[("content-length", &["gg"]), ("id", &["1234"])]);
    let act = hdr(&[("content-length", &["sj"]), ("id", &["1234"]), ("app", &["sports", "study"])]);
    let mut res = Vec::new();
    assert!(!compare_headers(&exp, &act, &mut res, &noise(&[])));
    let m = by_key(&res);
    assert!(m["id"].normal);
    assert!(!m["app"].normal);
    assert!(m["app"].expected.value.is_none());
    assert!(!m["content-length"].normal);
}

#[test]
fn test_headers_key_only_in_expected() {
    let exp = hdr(&[("id", &["1234"]), ("app", &["sports", "study"])]);
    let act = hdr(&[("app", &["sports", "study"])]);
    let mut res = Vec::new();
    assert!(!compare_headers(&exp, &act, &mut res, &noise(&[])));
    let m = by_key(&res);
    assert!(!m["id"].normal);
    assert!(m["id"].actual.value.is_none());
    assert!(m["app"].normal);
}

#[test]
fn test_headers_value_arrays_differ() {
    let exp = hdr(&[("id", &["1234"]), ("app", &["sports", "study", "code"])]);
    let act = hdr(&[("id", &["1234"]), ("app", &["sports", "eat", "code"])]);
    let mut res = Vec::new();
    assert!(!compare_headers(&exp, &act, &mut res, &noise(&[])));
    let m = by_key(&res);
    assert!(m["id"].normal);
    assert!(!m["app"].normal);
}

#[test]
fn test_headers_value_array_lengths_differ() {
    let exp = hdr(&[("id", &["1234"]), ("app", &["sports", "code"])]);
    let act = hdr(&[("id", &["1234"]), ("app", &["sports", "eat", "code"])]);
    let mut res = Vec::new();
    assert!(!compare_headers(&exp, &act, &mut res, &noise(&[])));
    let m = by_key(&res);
    assert!(!m["app"].normal);
}

#[test]
fn test_headers_empty_value_arrays_match() {
    let exp = hdr(&[("app", &[])]);
    let act = hdr(&[("app", &[])]);
    let mut res = Vec::new();
    assert!(compare_headers(&exp, &act, &mut res, &noise(&[])));
    assert_eq!(res.len(), 1);
    assert!(res[0].normal);
}

#[test]
fn test_headers_both_empty() {
    let mut res = Vec::new();
    assert!(compare_headers(&hdr(&[]), &hdr(&[]), &mut res, &noise(&[])));
    assert!(res.is_empty());
}

#[test]
fn test_headers_all_mismatches_noised() {
    let exp = hdr(&[("etag", &["0/dfjnrgs"]), ("content-length", &["26"])]);
    let act = hdr(&[("etag", &["2/fdvtgt"]), ("content-length", &["22"])]);
    let mut res = Vec::new();
    assert!(compare_headers(&exp, &act, &mut res, &noise(&["etag", "content-length"])));
    let m = by_key(&res);
    assert!(m["etag"].normal);
    assert!(m["content-length"].normal);
}

#[test]
fn test_headers_noised_extra_key_with_real_mismatches() {
    let exp = hdr(&[("etag", &["0/dfjnrgs"]), ("content-length", &["26"])]);
    let act = hdr(&[("etag", &["2/fdvtgt"]), ("content-length", &["22"]), ("host", &["express"])]);
    let mut res = Vec::new();
    assert!(!compare_headers(&exp, &act, &mut res, &noise(&["host"])));
    let m = by_key(&res);
    assert!(!m["etag"].normal);
    assert!(!m["content-length"].normal);
    assert!(m["host"].normal);
}

// ---------------------------------------------------------------------------
// Body matching
// ---------------------------------------------------------------------------

#[test]
fn test_body_array_permutation_matches() {
    let exp = r#"{"tags": ["a", "b"]}"#;
    let act = r#"{"tags": ["b", "a"]}"#;
    assert!(match_bodies(exp, act, &[]).unwrap());
}

#[test]
fn test_body_nested_mismatch_detected() {
    let exp = r#"{"user": {"name": "bob", "age": 30}}"#;
    let act = r#"{"user": {"name": "bob", "age": 31}}"#;
    assert!(!match_bodies(exp, act, &[]).unwrap());
}

#[test]
fn test_body_nested_noise_path() {
    let exp = r#"{"user": {"name": "bob", "age": 30}}"#;
    let act = r#"{"user": {"name": "bob", "age": 31}}"#;
    assert!(match_bodies(exp, act, &["user.age".to_string()]).unwrap());
}

#[test]
fn test_body_noise_only_widens_acceptance() {
    let exp = r#"{"a": 1, "b": 2}"#;
    let act = r#"{"a": 1, "b": 2}"#;
    // An already passing pair must keep passing under any mask.
    assert!(match_bodies(exp, act, &["a".to_string(), "b".to_string()]).unwrap());
}

#[test]
fn test_body_alien_roster_shuffled() {
    let exp = r#"[
        {"id": "1", "name": "Alien-X", "power": 90000, "special": "intelligence, power, speed, hax"},
        {"id": "3", "name": "Xlr8", "power": 1500, "special": "speed,mobility"}
    ]"#;
    let act = r#"[
        {"id": "3", "name": "Xlr8", "power": 1500, "special": "speed,mobility"},
        {"id": "1", "name": "Alien-X", "power": 90000, "special": "intelligence, power, speed, hax"}
    ]"#;
    assert!(match_bodies(exp, act, &[]).unwrap());
}
