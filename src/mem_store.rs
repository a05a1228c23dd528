//! # Stage: In-Memory Stores
//!
//! ## Responsibility
//! Reference implementation of [`TestCaseStore`] and [`TestRunStore`] backed
//! by process memory. This is what the bundled deployment and the test suite
//! run on; a document-store backend can be swapped in behind the same traits
//! without touching the regression core.
//!
//! ## Guarantees
//! - Thread-safe: state lives behind `tokio::sync::RwLock`
//! - `increment` is atomic with respect to concurrent callers (single write
//!   lock per call, add-one semantics — never read-modify-write upstream)
//! - Listings are sorted newest-first by `created` for stable paging
//!
//! ## NOT Responsible For
//! - Durability across restarts
//! - Cross-process sharing

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{Test, TestCase, TestRun};
use crate::store::{RunFilter, StoreError, TestCaseStore, TestRunStore};

// ---------------------------------------------------------------------------
// Test cases
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemTestCaseStore {
    cases: RwLock<HashMap<String, TestCase>>,
}

impl MemTestCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored cases (test helper).
    pub async fn len(&self) -> usize {
        self.cases.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cases.read().await.is_empty()
    }
}

#[async_trait]
impl TestCaseStore for MemTestCaseStore {
    async fn upsert(&self, tc: TestCase) -> Result<(), StoreError> {
        self.cases.write().await.insert(tc.id.clone(), tc);
        Ok(())
    }

    async fn update(&self, tc: TestCase) -> Result<(), StoreError> {
        let mut cases = self.cases.write().await;
        if !cases.contains_key(&tc.id) {
            return Err(StoreError::NotFound);
        }
        cases.insert(tc.id.clone(), tc);
        Ok(())
    }

    async fn get(&self, cid: &str, id: &str) -> Result<TestCase, StoreError> {
        self.cases
            .read()
            .await
            .get(id)
            .filter(|tc| tc.cid == cid)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.cases.write().await.remove(id).map(|_| ()).ok_or(StoreError::NotFound)
    }

    async fn get_all(
        &self,
        cid: &str,
        app: &str,
        anchors: bool,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<TestCase>, StoreError> {
        let cases = self.cases.read().await;
        let mut out: Vec<TestCase> = cases
            .values()
            .filter(|tc| tc.cid == cid && tc.app_id == app)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.id.cmp(&b.id)));
        let mut page: Vec<TestCase> = out.into_iter().skip(offset).take(limit).collect();
        if !anchors {
            for tc in &mut page {
                tc.all_keys.clear();
                tc.anchors.clear();
            }
        }
        Ok(page)
    }

    async fn get_keys(&self, cid: &str, app: &str, uri: &str) -> Result<Vec<TestCase>, StoreError> {
        let cases = self.cases.read().await;
        Ok(cases
            .values()
            .filter(|tc| tc.cid == cid && tc.app_id == app && tc.uri == uri)
            .cloned()
            .collect())
    }

    async fn delete_by_anchor(
        &self,
        cid: &str,
        app: &str,
        uri: &str,
        filter_keys: &HashMap<String, Vec<String>>,
    ) -> Result<(), StoreError> {
        let mut cases = self.cases.write().await;
        cases.retain(|_, tc| {
            !(tc.cid == cid && tc.app_id == app && tc.uri == uri && tc.anchors == *filter_keys)
        });
        Ok(())
    }

    async fn get_apps(&self, cid: &str) -> Result<Vec<String>, StoreError> {
        let cases = self.cases.read().await;
        let mut apps: Vec<String> = cases
            .values()
            .filter(|tc| tc.cid == cid)
            .map(|tc| tc.app_id.clone())
            .collect();
        apps.sort();
        apps.dedup();
        Ok(apps)
    }
}

// ---------------------------------------------------------------------------
// Test runs and tests
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemTestRunStore {
    runs: RwLock<HashMap<String, TestRun>>,
    tests: RwLock<HashMap<String, Test>>,
}

impl MemTestRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TestRunStore for MemTestRunStore {
    async fn read(
        &self,
        cid: &str,
        filter: &RunFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<TestRun>, StoreError> {
        let runs = self.runs.read().await;
        let mut out: Vec<TestRun> = runs
            .values()
            .filter(|r| r.cid == cid)
            .filter(|r| filter.user.as_deref().map_or(true, |u| r.user == u))
            .filter(|r| filter.app.as_deref().map_or(true, |a| r.app == a))
            .filter(|r| filter.id.as_deref().map_or(true, |i| r.id == i))
            .filter(|r| filter.from.map_or(true, |f| r.updated >= f))
            .filter(|r| filter.to.map_or(true, |t| r.updated <= t))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.id.cmp(&b.id)));
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }

    async fn upsert(&self, run: TestRun) -> Result<(), StoreError> {
        self.runs.write().await.insert(run.id.clone(), run);
        Ok(())
    }

    async fn increment(&self, success: bool, failure: bool, run_id: &str) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let run = runs.entry(run_id.to_string()).or_insert_with(|| TestRun {
            id: run_id.to_string(),
            ..Default::default()
        });
        if success {
            run.success += 1;
        }
        if failure {
            run.failure += 1;
        }
        Ok(())
    }

    async fn put_test(&self, t: Test) -> Result<(), StoreError> {
        self.tests.write().await.insert(t.id.clone(), t);
        Ok(())
    }

    async fn read_test(&self, id: &str) -> Result<Test, StoreError> {
        self.tests.read().await.get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn read_tests(&self, run_id: &str) -> Result<Vec<Test>, StoreError> {
        let tests = self.tests.read().await;
        let mut out: Vec<Test> = tests.values().filter(|t| t.run_id == run_id).cloned().collect();
        out.sort_by(|a, b| a.started.cmp(&b.started).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}
