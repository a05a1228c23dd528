//! Abstract repositories for test cases, test runs, and per-test results.
//!
//! The regression core only ever talks to these traits; the in-memory
//! implementation lives in [`crate::mem_store`] and a document-store backend
//! can be swapped in behind the same interface.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Test, TestCase, TestRun};

/// Repository-level errors. The service maps these to its own taxonomy.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("store backend: {0}")]
    Backend(String),
}

/// Optional constraints for listing test runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub user: Option<String>,
    pub app: Option<String>,
    pub id: Option<String>,
    /// Inclusive lower bound on `updated`, epoch seconds.
    pub from: Option<i64>,
    /// Inclusive upper bound on `updated`, epoch seconds.
    pub to: Option<i64>,
}

/// Durable store of captured test cases.
#[async_trait]
pub trait TestCaseStore: Send + Sync {
    /// Insert or fully replace a test case by id.
    async fn upsert(&self, tc: TestCase) -> Result<(), StoreError>;

    /// Replace an existing test case; never inserts.
    async fn update(&self, tc: TestCase) -> Result<(), StoreError>;

    async fn get(&self, cid: &str, id: &str) -> Result<TestCase, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Page through an app's cases. When `anchors` is false the bulky
    /// `all_keys`/`anchors` maps are stripped from the result.
    async fn get_all(
        &self,
        cid: &str,
        app: &str,
        anchors: bool,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<TestCase>, StoreError>;

    /// All cases for one endpoint with `all_keys` and `anchors` populated —
    /// the input for rebuilding an anchor-cache index.
    async fn get_keys(&self, cid: &str, app: &str, uri: &str) -> Result<Vec<TestCase>, StoreError>;

    /// Remove every case of the endpoint whose anchor combination equals
    /// `filter_keys` (value lists sorted).
    async fn delete_by_anchor(
        &self,
        cid: &str,
        app: &str,
        uri: &str,
        filter_keys: &HashMap<String, Vec<String>>,
    ) -> Result<(), StoreError>;

    /// Distinct app ids captured for a tenant.
    async fn get_apps(&self, cid: &str) -> Result<Vec<String>, StoreError>;
}

/// Durable store of test runs and their per-test results.
#[async_trait]
pub trait TestRunStore: Send + Sync {
    /// Runs for a tenant matching `filter`, sorted by `created` descending.
    async fn read(
        &self,
        cid: &str,
        filter: &RunFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<TestRun>, StoreError>;

    async fn upsert(&self, run: TestRun) -> Result<(), StoreError>;

    /// Atomically add 1 to the indicated counter of a run. Exactly one of
    /// `success` / `failure` is expected to be set.
    async fn increment(&self, success: bool, failure: bool, run_id: &str) -> Result<(), StoreError>;

    async fn put_test(&self, t: Test) -> Result<(), StoreError>;

    async fn read_test(&self, id: &str) -> Result<Test, StoreError>;

    async fn read_tests(&self, run_id: &str) -> Result<Vec<Test>, StoreError>;
}
