//! # Stage: AnchorCache
//!
//! ## Responsibility
//! Per-endpoint in-memory index of request-field value histograms, the set
//! of anchor combinations seen so far, and the fields demoted to noisy.
//! An *anchor* is a low-variance request field (user-type, blood-group);
//! timestamps and session ids are the canonical noisy fields. During
//! deduplication only anchor fields are compared.
//!
//! ## Guarantees
//! - Classification is a pure function of the histogram (`is_anchor`)
//! - Demotion to noisy is monotone for the lifetime of an index
//! - Lossy by design: any index can be rebuilt from the test-case store
//!
//! ## NOT Responsible For
//! - Synchronization: the owning service wraps the cache in a mutex and
//!   holds it across the whole dedup critical section
//! - Talking to the store (callers load cases and hand them to `fill`)

use std::collections::{HashMap, HashSet};

use crate::models::TestCase;

/// Cache key grouping all captures for one endpoint of one app of one tenant.
pub fn index_key(cid: &str, app: &str, uri: &str) -> String {
    format!("{}-{}-{}", cid, app, uri)
}

/// Outcome of classifying one fresh capture against the histograms.
#[derive(Debug)]
pub struct Classification {
    /// Surviving anchor candidates: path → sorted value list.
    pub filter_keys: HashMap<String, Vec<String>>,
    /// Whether the store-side anchor GC must run. Kept unconditionally true
    /// for every capture that reaches classification, so a fingerprint that
    /// became ambiguous under a new anchor set is always collected.
    pub anchor_change: bool,
}

#[derive(Debug, Default)]
pub struct AnchorCache {
    /// index → all observed anchor combinations (path → sorted values).
    anchors: HashMap<String, Vec<HashMap<String, Vec<String>>>>,
    /// index → fields demoted to noisy.
    noisy_fields: HashMap<String, HashSet<String>>,
    /// index → path → value → occurrence count.
    field_counts: HashMap<String, HashMap<String, HashMap<String, u64>>>,
}

impl AnchorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Low-variance test: anchor iff the sample is still small, or unique
    /// values stay under 40% of the total count.
    pub fn is_anchor(hist: &HashMap<String, u64>) -> bool {
        let total: u64 = hist.values().sum();
        if total < 20 {
            return true;
        }
        (total as f64) * 0.40 > hist.len() as f64
    }

    /// True once `fill` has run for this index.
    pub fn is_filled(&self, index: &str) -> bool {
        self.noisy_fields.contains_key(index) && self.field_counts.contains_key(index)
    }

    /// Replay stored cases for an endpoint into fresh histograms.
    pub fn fill(&mut self, index: &str, cases: &[TestCase]) {
        let mut combos = Vec::with_capacity(cases.len());
        let mut counts: HashMap<String, HashMap<String, u64>> = HashMap::new();
        let mut noisy: HashSet<String> = HashSet::new();

        for tc in cases {
            combos.push(tc.anchors.clone());
            for (path, values) in &tc.all_keys {
                let hist = counts.entry(path.clone()).or_default();
                for v in values {
                    *hist.entry(v.clone()).or_insert(0) += 1;
                }
                if !Self::is_anchor(hist) {
                    noisy.insert(path.clone());
                }
            }
        }

        self.anchors.insert(index.to_string(), combos);
        self.field_counts.insert(index.to_string(), counts);
        self.noisy_fields.insert(index.to_string(), noisy);
    }

    /// Fold one fresh capture into the histograms and split its fields into
    /// anchor candidates and (possibly newly demoted) noisy fields.
    pub fn classify(&mut self, index: &str, req_keys: &HashMap<String, Vec<String>>) -> Classification {
        let noisy = self.noisy_fields.entry(index.to_string()).or_default();
        let counts = self.field_counts.entry(index.to_string()).or_default();

        let anchor_change = true;
        let mut filter_keys = HashMap::new();

        for (path, values) in req_keys {
            if noisy.contains(path) {
                continue;
            }
            let hist = counts.entry(path.clone()).or_default();
            for v in values {
                *hist.entry(v.clone()).or_insert(0) += 1;
            }
            if !Self::is_anchor(hist) {
                noisy.insert(path.clone());
                continue;
            }
            let mut sorted = values.clone();
            sorted.sort();
            filter_keys.insert(path.clone(), sorted);
        }

        Classification { filter_keys, anchor_change }
    }

    /// True when this exact anchor combination was already observed.
    pub fn exists(&self, index: &str, filter_keys: &HashMap<String, Vec<String>>) -> bool {
        self.anchors
            .get(index)
            .map(|combos| combos.iter().any(|c| c == filter_keys))
            .unwrap_or(false)
    }

    /// Remember a new anchor combination for the index.
    pub fn record(&mut self, index: &str, filter_keys: HashMap<String, Vec<String>>) {
        self.anchors.entry(index.to_string()).or_default().push(filter_keys);
    }

    /// Drop every map for an index, forcing a lazy refill on next touch.
    pub fn evict(&mut self, index: &str) {
        self.anchors.remove(index);
        self.noisy_fields.remove(index);
        self.field_counts.remove(index);
    }

    /// Whether a path is currently noisy for an index.
    pub fn is_noisy(&self, index: &str, path: &str) -> bool {
        self.noisy_fields.get(index).map(|s| s.contains(path)).unwrap_or(false)
    }

    /// Distinct values counted for one field of an index.
    pub fn distinct_values(&self, index: &str, path: &str) -> usize {
        self.field_counts
            .get(index)
            .and_then(|c| c.get(path))
            .map(|h| h.len())
            .unwrap_or(0)
    }
}
