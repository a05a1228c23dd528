//! # Stage: Regression Service
//!
//! The orchestrator that closes the capture → dedup → denoise → replay
//! cycle:
//!
//! ```text
//! capture (PostTC) ──► flatten ──► AnchorCache ──► TestCaseStore
//!                                      │
//! replay (Test) ──► Matcher ◄── stored case        TestRunStore ◄── results
//! ```
//!
//! Capture flattens the request, folds it into the endpoint's variance
//! histograms, and persists the case only when its anchor fingerprint is
//! novel. Replay loads the stored case, compares the observed response under
//! the case's noise mask, and books the verdict onto the owning run.
//!
//! Concurrency: one coarse `tokio::sync::Mutex` guards the anchor cache and
//! is held for the entire dedup critical section, including the store's
//! anchor GC call, so concurrent captures of one endpoint serialize.
//! Store failures are logged with their cause and surfaced as the opaque
//! [`ServiceError::Internal`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::anchor::{index_key, AnchorCache};
use crate::error::ServiceError;
use crate::flatten::{add_body, flatten};
use crate::matcher::{compare_headers, match_bodies};
use crate::models::{
    BodyResult, BodyType, HttpResp, IntResult, Status, Test, TestCase, TestResult,
};
use crate::now_secs;
use crate::store::{StoreError, TestCaseStore, TestRunStore};
use crate::telemetry::Telemetry;

/// Strip CR/LF and escape HTML before a request-derived string reaches the
/// log, so crafted input cannot forge log records.
pub fn sanitize_input(s: &str) -> String {
    let re = regex::Regex::new(r"(\n|\r)+").ok();
    let stripped = match re {
        Some(re) => re.replace_all(s, "").into_owned(),
        None => s.to_string(),
    };
    let mut out = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

enum CompareFailure {
    Store(StoreError),
    Parse(serde_json::Error),
}

pub struct Regression {
    tc_store: Arc<dyn TestCaseStore>,
    run_store: Arc<dyn TestRunStore>,
    telemetry: Arc<Telemetry>,
    cache: Mutex<AnchorCache>,
    /// Last observed distinct-app count, for change-triggered telemetry.
    app_count: AtomicUsize,
    dedup_enabled: bool,
}

impl Regression {
    pub fn new(
        tc_store: Arc<dyn TestCaseStore>,
        run_store: Arc<dyn TestRunStore>,
        telemetry: Arc<Telemetry>,
        dedup_enabled: bool,
    ) -> Self {
        Self {
            tc_store,
            run_store,
            telemetry,
            cache: Mutex::new(AnchorCache::new()),
            app_count: AtomicUsize::new(0),
            dedup_enabled,
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get(&self, cid: &str, app_id: &str, id: &str) -> Result<TestCase, ServiceError> {
        self.tc_store.get(cid, id).await.map_err(|err| {
            tracing::error!(cid, app_id = %sanitize_input(app_id), %err, "failed to get testcase from the store");
            ServiceError::Internal
        })
    }

    pub async fn get_all(
        &self,
        cid: &str,
        app_id: &str,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<Vec<TestCase>, ServiceError> {
        self.tc_store
            .get_all(cid, app_id, false, offset.unwrap_or(0), limit.unwrap_or(25))
            .await
            .map_err(|err| {
                tracing::error!(cid, app_id = %sanitize_input(app_id), %err, "failed to list testcases");
                ServiceError::Internal
            })
    }

    pub async fn get_apps(&self, cid: &str) -> Result<Vec<String>, ServiceError> {
        let apps = self.tc_store.get_apps(cid).await.map_err(|err| {
            tracing::error!(cid, %err, "failed to list apps");
            ServiceError::Internal
        })?;
        if apps.len() != self.app_count.swap(apps.len(), Ordering::Relaxed) {
            self.telemetry.get_apps(apps.len());
        }
        Ok(apps)
    }

    // -----------------------------------------------------------------------
    // Capture
    // -----------------------------------------------------------------------

    /// Ingest a batch of captured cases. Returns one id per slot; a slot
    /// that deduplicated away yields an empty id, not an error.
    pub async fn put(&self, cid: &str, cases: Vec<TestCase>) -> Result<Vec<String>, ServiceError> {
        if cases.is_empty() {
            return Err(ServiceError::BadRequest("no testcases in request".to_string()));
        }
        let mut ids = Vec::with_capacity(cases.len());
        for tc in cases {
            ids.push(self.put_tc(cid, tc).await?);
        }
        Ok(ids)
    }

    /// Update existing cases in place (no insert).
    pub async fn update(&self, cases: Vec<TestCase>) -> Result<(), ServiceError> {
        for tc in cases {
            let app_id = tc.app_id.clone();
            if let Err(err) = self.tc_store.update(tc).await {
                tracing::error!(app_id = %sanitize_input(&app_id), %err, "failed to update testcase");
                return Err(ServiceError::Internal);
            }
        }
        self.telemetry.edit_tc();
        Ok(())
    }

    async fn put_tc(&self, cid: &str, mut tc: TestCase) -> Result<String, ServiceError> {
        tc.cid = cid.to_string();
        if self.dedup_enabled {
            match self.is_dup(&mut tc).await {
                Ok(true) => {
                    tracing::info!(cid, app_id = %tc.app_id, uri = %tc.uri, "dropping duplicate testcase");
                    return Ok(String::new());
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(cid, app_id = %tc.app_id, %err, "deduplication failed");
                    return Err(ServiceError::Internal);
                }
            }
        }
        let id = tc.id.clone();
        if let Err(err) = self.tc_store.upsert(tc).await {
            tracing::error!(cid, %err, "failed to persist testcase");
            return Err(ServiceError::Internal);
        }
        Ok(id)
    }

    /// Decide whether a fresh capture is a duplicate of an already stored
    /// case, updating the endpoint's histograms and the case's
    /// `all_keys`/`anchors` along the way.
    async fn is_dup(&self, tc: &mut TestCase) -> Result<bool, StoreError> {
        let mut req_keys: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in &tc.http_req.header {
            req_keys.insert(format!("header.{}", k), vec![v.join("")]);
        }
        for (k, v) in &tc.http_req.url_params {
            req_keys.insert(format!("url_params.{}", k), vec![v.clone()]);
        }
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&tc.http_req.body) {
            for (k, v) in flatten(&parsed) {
                let key = if k.is_empty() { "body".to_string() } else { format!("body.{}", k) };
                req_keys.insert(key, v);
            }
        }

        let index = index_key(&tc.cid, &tc.app_id, &tc.uri);

        // The whole classification, including the store's anchor GC, runs
        // under the cache mutex so concurrent captures of one endpoint
        // observe a consistent (histograms, noisy set, combinations) triple.
        let mut cache = self.cache.lock().await;
        if !cache.is_filled(&index) {
            let cases = self.tc_store.get_keys(&tc.cid, &tc.app_id, &tc.uri).await?;
            cache.fill(&index, &cases);
        }

        let cls = cache.classify(&index, &req_keys);
        if cls.filter_keys.is_empty() {
            // Every request field is noise: nothing left to fingerprint.
            return Ok(true);
        }
        if cls.anchor_change {
            // Fingerprints that became ambiguous under the new anchor set
            // are garbage-collected before the existence check.
            self.tc_store
                .delete_by_anchor(&tc.cid, &tc.app_id, &tc.uri, &cls.filter_keys)
                .await?;
        }

        let dup = cache.exists(&index, &cls.filter_keys);
        tc.all_keys = req_keys;
        tc.anchors = cls.filter_keys.clone();
        cache.record(&index, cls.filter_keys);
        Ok(dup)
    }

    // -----------------------------------------------------------------------
    // Denoise
    // -----------------------------------------------------------------------

    /// Diff a second observation of the endpoint's response against the
    /// stored one and record every diverging path as noise.
    pub async fn de_noise(
        &self,
        cid: &str,
        id: &str,
        app_id: &str,
        body: &str,
        headers: &HashMap<String, Vec<String>>,
    ) -> Result<(), ServiceError> {
        let mut tc = match self.tc_store.get(cid, id).await {
            Ok(tc) => tc,
            Err(StoreError::NotFound) => return Err(ServiceError::NotFound("testcase".to_string())),
            Err(err) => {
                tracing::error!(cid, id, app_id = %sanitize_input(app_id), %err, "failed to get testcase from the store");
                return Err(ServiceError::Internal);
            }
        };

        let mut stored: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in &tc.http_resp.header {
            stored.insert(format!("header.{}", k), vec![v.join("")]);
        }
        add_body(&tc.http_resp.body, &mut stored);

        let mut observed: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in headers {
            observed.insert(format!("header.{}", k), vec![v.join("")]);
        }
        add_body(body, &mut observed);

        // One-directional: paths only present in the observation are not
        // noise — the stored response is the reference shape.
        let mut noise: Vec<String> = stored
            .iter()
            .filter(|&(k, v)| observed.get(k) != Some(v))
            .map(|(k, _)| k.clone())
            .collect();
        noise.sort();

        tc.noise = noise;
        self.tc_store.upsert(tc).await.map_err(|err| {
            tracing::error!(cid, id, %err, "failed to update noise fields for testcase");
            ServiceError::Internal
        })
    }

    // -----------------------------------------------------------------------
    // Replay
    // -----------------------------------------------------------------------

    /// Replay verdict for one observed response against a stored case.
    /// Always persists a `Test` record and increments exactly one run
    /// counter; `Ok(false)` is a legitimate comparison failure while `Err`
    /// means the load or comparison machinery itself broke.
    pub async fn test(
        &self,
        cid: &str,
        app_id: &str,
        run_id: &str,
        id: &str,
        resp: HttpResp,
    ) -> Result<bool, ServiceError> {
        let started = now_secs();
        let (pass, result, tc, failure) = self.compare_with_stored(cid, id, &resp).await;

        let status = if pass && failure.is_none() { Status::Passed } else { Status::Failed };
        let record = Test {
            id: Uuid::new_v4().to_string(),
            status,
            started,
            completed: now_secs(),
            run_id: run_id.to_string(),
            test_case_id: id.to_string(),
            uri: tc.as_ref().map(|t| t.uri.clone()).unwrap_or_default(),
            req: tc.as_ref().map(|t| t.http_req.clone()).unwrap_or_default(),
            dep: tc.as_ref().map(|t| t.deps.clone()).unwrap_or_default(),
            resp,
            result,
            noise: tc.as_ref().map(|t| t.noise.clone()).unwrap_or_default(),
        };
        if let Err(err) = self.save_result(record).await {
            tracing::error!(cid, app_id = %sanitize_input(app_id), %err, "failed to persist test result");
        }

        match failure {
            None => Ok(pass),
            Some(CompareFailure::Store(err)) => {
                tracing::error!(cid, id, app_id = %sanitize_input(app_id), %err, "failed to load testcase for replay");
                Err(ServiceError::Internal)
            }
            Some(CompareFailure::Parse(err)) => {
                tracing::error!(cid, id, %err, "failed to parse body during replay");
                Err(ServiceError::Internal)
            }
        }
    }

    async fn compare_with_stored(
        &self,
        cid: &str,
        id: &str,
        resp: &HttpResp,
    ) -> (bool, TestResult, Option<TestCase>, Option<CompareFailure>) {
        let tc = match self.tc_store.get(cid, id).await {
            Ok(tc) => tc,
            Err(err) => {
                return (false, TestResult::default(), None, Some(CompareFailure::Store(err)))
            }
        };

        let body_type = if serde_json::from_str::<serde_json::Value>(&resp.body).is_ok() {
            BodyType::Json
        } else {
            BodyType::Plain
        };

        let mut body_noise: Vec<String> = Vec::new();
        let mut header_noise: HashSet<String> = HashSet::new();
        for n in &tc.noise {
            let parts: Vec<&str> = n.split('.').collect();
            if parts.len() > 1 && parts[0] == "body" {
                body_noise.push(parts[1..].join("."));
            } else if parts[0] == "header" {
                if let Some(last) = parts.last() {
                    header_noise.insert(last.to_string());
                }
            }
        }

        let mut result = TestResult {
            status_code: IntResult {
                normal: false,
                expected: tc.http_resp.status_code,
                actual: resp.status_code,
            },
            headers_result: Vec::new(),
            body_result: BodyResult {
                normal: false,
                body_type,
                expected: tc.http_resp.body.clone(),
                actual: resp.body.clone(),
            },
        };

        let body_masked = tc.noise.iter().any(|n| n == "body");
        let mut pass = true;
        if !body_masked {
            if body_type == BodyType::Json {
                match match_bodies(&tc.http_resp.body, &resp.body, &body_noise) {
                    Ok(ok) => pass = ok,
                    Err(err) => {
                        return (false, result, Some(tc), Some(CompareFailure::Parse(err)))
                    }
                }
            } else if tc.http_resp.body != resp.body {
                pass = false;
            }
        }
        result.body_result.normal = pass;

        let mut header_results = Vec::new();
        if !compare_headers(&tc.http_resp.header, &resp.header, &mut header_results, &header_noise) {
            pass = false;
        }
        result.headers_result = header_results;

        if tc.http_resp.status_code == resp.status_code {
            result.status_code.normal = true;
        } else {
            pass = false;
        }

        (pass, result, Some(tc), None)
    }

    async fn save_result(&self, t: Test) -> Result<(), StoreError> {
        let run_id = t.run_id.clone();
        let failed = t.status == Status::Failed;
        self.run_store.put_test(t).await?;
        self.run_store.increment(!failed, failed, &run_id).await
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    /// Delete a case and evict its endpoint's cache index; the next capture
    /// for that endpoint refills from the store.
    pub async fn delete_tc(&self, cid: &str, id: &str) -> Result<(), ServiceError> {
        let mut cache = self.cache.lock().await;
        let tc = self.tc_store.get(cid, id).await.map_err(|err| {
            tracing::error!(cid, id, %err, "failed to get testcase from the store");
            ServiceError::Internal
        })?;
        cache.evict(&index_key(&tc.cid, &tc.app_id, &tc.uri));
        self.tc_store.delete(id).await.map_err(|err| {
            tracing::error!(cid, id, app_id = %tc.app_id, %err, "failed to delete testcase");
            ServiceError::Internal
        })?;
        self.telemetry.delete_tc();
        Ok(())
    }
}
