//! # Stage: Run Manager
//!
//! ## Responsibility
//! Lifecycle of a test run: create/upsert, list with children, transition
//! Running → Passed/Failed, and fail runs that stall. The stall watchdog is
//! the sole liveness guarantee: a Running run whose newest child test
//! started more than five minutes ago (or that never produced a child) is
//! force-failed the next time someone lists runs.
//!
//! ## Guarantees
//! - `success + failure` never exceeds the number of recorded tests —
//!   counters are bumped atomically at the store, one per finished test
//! - Stall detection never errors; it only flips status and upserts
//!
//! ## NOT Responsible For
//! - Producing test results (the regression service persists those)
//! - Scheduling: the watchdog runs piggybacked on `get`, not on a timer

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::ServiceError;
use crate::models::{Status, TestRun};
use crate::now_secs;
use crate::store::{RunFilter, StoreError, TestCaseStore, TestRunStore};
use crate::telemetry::Telemetry;

/// A Running run with no fresh child test for this long is failed.
const STALL_TIMEOUT_SECS: i64 = 5 * 60;

pub struct RunManager {
    run_store: Arc<dyn TestRunStore>,
    tc_store: Arc<dyn TestCaseStore>,
    telemetry: Arc<Telemetry>,
    /// Last observed count of non-running runs, for change-triggered
    /// telemetry.
    run_count: AtomicUsize,
}

impl RunManager {
    pub fn new(
        run_store: Arc<dyn TestRunStore>,
        tc_store: Arc<dyn TestCaseStore>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self { run_store, tc_store, telemetry, run_count: AtomicUsize::new(0) }
    }

    /// Blind upsert — used by run start and run end.
    pub async fn put(&self, run: TestRun) -> Result<(), ServiceError> {
        self.run_store.upsert(run).await.map_err(|err| {
            tracing::error!(%err, "failed to upsert test run");
            ServiceError::Internal
        })
    }

    /// List runs for a tenant, applying the stall watchdog to the batch.
    /// With `summary` false every run carries its child tests.
    pub async fn get(
        &self,
        cid: &str,
        summary: bool,
        filter: &RunFilter,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<Vec<TestRun>, ServiceError> {
        let mut runs = self
            .run_store
            .read(cid, filter, offset.unwrap_or(0), limit.unwrap_or(25))
            .await
            .map_err(|err| {
                tracing::error!(cid, %err, "failed to read test runs");
                ServiceError::Internal
            })?;

        self.update_status(cid, &mut runs).await?;

        if summary || runs.is_empty() {
            return Ok(runs);
        }
        for run in &mut runs {
            let tests = self.run_store.read_tests(&run.id).await.map_err(|err| {
                tracing::error!(cid, run_id = %run.id, %err, "failed to read tests for run");
                ServiceError::Internal
            })?;
            run.tests = Some(tests);
        }
        Ok(runs)
    }

    /// Fail every Running run in the batch whose newest child test (or, for
    /// childless runs, whose own creation) is older than the stall timeout.
    async fn update_status(&self, cid: &str, runs: &mut [TestRun]) -> Result<(), ServiceError> {
        let mut finished = 0usize;
        for run in runs.iter_mut() {
            if run.status != Status::Running {
                finished += 1;
                continue;
            }
            let tests = self.run_store.read_tests(&run.id).await.map_err(|err| {
                tracing::error!(cid, run_id = %run.id, %err, "failed to read tests for run");
                ServiceError::Internal
            })?;
            let newest = tests.iter().map(|t| t.started).max().unwrap_or(run.created);
            self.fail_if_stalled(cid, newest, run).await?;
        }

        if finished != self.run_count.swap(finished, Ordering::Relaxed) {
            for run in runs.iter() {
                if run.status != Status::Running {
                    self.telemetry.test_run(run.success, run.failure);
                }
            }
        }
        Ok(())
    }

    async fn fail_if_stalled(
        &self,
        cid: &str,
        newest: i64,
        run: &mut TestRun,
    ) -> Result<(), ServiceError> {
        if now_secs() - newest < STALL_TIMEOUT_SECS {
            return Ok(());
        }
        run.status = Status::Failed;
        self.run_store.upsert(run.clone()).await.map_err(|err| {
            tracing::error!(cid, run_id = %run.id, %err, "failed to fail stalled test run");
            ServiceError::Internal
        })
    }

    /// Accept the observed response of a finished test as the new expected
    /// response of its test case.
    pub async fn normalize(&self, cid: &str, test_id: &str) -> Result<(), ServiceError> {
        let test = match self.run_store.read_test(test_id).await {
            Ok(t) => t,
            Err(StoreError::NotFound) => return Err(ServiceError::NotFound("test".to_string())),
            Err(err) => {
                tracing::error!(cid, test_id, %err, "failed to read test");
                return Err(ServiceError::Internal);
            }
        };
        let mut tc = match self.tc_store.get(cid, &test.test_case_id).await {
            Ok(tc) => tc,
            Err(StoreError::NotFound) => {
                return Err(ServiceError::NotFound("testcase".to_string()))
            }
            Err(err) => {
                tracing::error!(cid, test_id, %err, "failed to read testcase");
                return Err(ServiceError::Internal);
            }
        };
        tc.http_resp = test.resp;
        self.tc_store.upsert(tc).await.map_err(|err| {
            tracing::error!(cid, test_id, %err, "failed to update testcase");
            ServiceError::Internal
        })?;
        self.telemetry.normalize();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_store::{MemTestCaseStore, MemTestRunStore};
    use crate::models::{HttpResp, Test, TestCase};

    fn manager() -> (RunManager, Arc<MemTestRunStore>, Arc<MemTestCaseStore>) {
        let runs = Arc::new(MemTestRunStore::new());
        let tcs = Arc::new(MemTestCaseStore::new());
        let mgr = RunManager::new(runs.clone(), tcs.clone(), Arc::new(Telemetry::new(false)));
        (mgr, runs, tcs)
    }

    fn run(id: &str, created: i64, status: Status) -> TestRun {
        TestRun {
            id: id.to_string(),
            cid: "default".to_string(),
            app: "sample".to_string(),
            user: "default".to_string(),
            created,
            updated: created,
            status,
            ..Default::default()
        }
    }

    // -----------------------------------------------------------------------
    // Stall watchdog
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_childless_stale_run_is_failed() {
        let (mgr, runs, _) = manager();
        runs.upsert(run("r1", now_secs() - 400, Status::Running)).await.unwrap();

        let listed = mgr.get("default", true, &RunFilter::default(), None, None).await.unwrap();
        assert_eq!(listed[0].status, Status::Failed);
        // The transition is durable.
        let reread = runs.read("default", &RunFilter::default(), 0, 25).await.unwrap();
        assert_eq!(reread[0].status, Status::Failed);
    }

    #[tokio::test]
    async fn test_fresh_childless_run_stays_running() {
        let (mgr, runs, _) = manager();
        runs.upsert(run("r1", now_secs() - 10, Status::Running)).await.unwrap();
        let listed = mgr.get("default", true, &RunFilter::default(), None, None).await.unwrap();
        assert_eq!(listed[0].status, Status::Running);
    }

    #[tokio::test]
    async fn test_stall_check_uses_newest_test() {
        let (mgr, runs, _) = manager();
        runs.upsert(run("r1", now_secs() - 4000, Status::Running)).await.unwrap();
        // Old test far beyond the timeout, newest one fresh: run stays alive.
        for (id, age) in [("t1", 3000), ("t2", 10)] {
            runs.put_test(Test {
                id: id.to_string(),
                run_id: "r1".to_string(),
                started: now_secs() - age,
                ..Default::default()
            })
            .await
            .unwrap();
        }
        let listed = mgr.get("default", true, &RunFilter::default(), None, None).await.unwrap();
        assert_eq!(listed[0].status, Status::Running);
    }

    #[tokio::test]
    async fn test_stalled_run_with_old_tests_is_failed() {
        let (mgr, runs, _) = manager();
        runs.upsert(run("r1", now_secs() - 4000, Status::Running)).await.unwrap();
        runs.put_test(Test {
            id: "t1".to_string(),
            run_id: "r1".to_string(),
            started: now_secs() - 360,
            ..Default::default()
        })
        .await
        .unwrap();
        let listed = mgr.get("default", true, &RunFilter::default(), None, None).await.unwrap();
        assert_eq!(listed[0].status, Status::Failed);
    }

    #[tokio::test]
    async fn test_finished_runs_left_untouched() {
        let (mgr, runs, _) = manager();
        runs.upsert(run("r1", now_secs() - 4000, Status::Passed)).await.unwrap();
        let listed = mgr.get("default", true, &RunFilter::default(), None, None).await.unwrap();
        assert_eq!(listed[0].status, Status::Passed);
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_summary_listing_omits_children() {
        let (mgr, runs, _) = manager();
        runs.upsert(run("r1", now_secs(), Status::Passed)).await.unwrap();
        let listed = mgr.get("default", true, &RunFilter::default(), None, None).await.unwrap();
        assert!(listed[0].tests.is_none());
    }

    #[tokio::test]
    async fn test_full_listing_attaches_children() {
        let (mgr, runs, _) = manager();
        runs.upsert(run("r1", now_secs(), Status::Passed)).await.unwrap();
        runs.put_test(Test {
            id: "t1".to_string(),
            run_id: "r1".to_string(),
            started: now_secs(),
            ..Default::default()
        })
        .await
        .unwrap();
        let listed = mgr.get("default", false, &RunFilter::default(), None, None).await.unwrap();
        assert_eq!(listed[0].tests.as_ref().map(|t| t.len()), Some(1));
    }

    #[tokio::test]
    async fn test_put_is_a_blind_upsert() {
        let (mgr, runs, _) = manager();
        mgr.put(run("r1", now_secs(), Status::Running)).await.unwrap();
        mgr.put(run("r1", now_secs(), Status::Passed)).await.unwrap();
        let listed = runs.read("default", &RunFilter::default(), 0, 25).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, Status::Passed);
    }

    // -----------------------------------------------------------------------
    // Normalize
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_normalize_overwrites_expected_response() {
        let (mgr, runs, tcs) = manager();
        tcs.upsert(TestCase {
            id: "tc1".to_string(),
            cid: "default".to_string(),
            http_resp: HttpResp { status_code: 200, body: "old".to_string(), ..Default::default() },
            ..Default::default()
        })
        .await
        .unwrap();
        runs.put_test(Test {
            id: "t1".to_string(),
            run_id: "r1".to_string(),
            test_case_id: "tc1".to_string(),
            resp: HttpResp { status_code: 200, body: "new".to_string(), ..Default::default() },
            ..Default::default()
        })
        .await
        .unwrap();

        mgr.normalize("default", "t1").await.unwrap();
        let tc = tcs.get("default", "tc1").await.unwrap();
        assert_eq!(tc.http_resp.body, "new");
    }

    #[tokio::test]
    async fn test_normalize_missing_test() {
        let (mgr, _, _) = manager();
        let err = mgr.normalize("default", "ghost").await.unwrap_err();
        assert_eq!(err, ServiceError::NotFound("test".to_string()));
    }

    #[tokio::test]
    async fn test_normalize_missing_testcase() {
        let (mgr, runs, _) = manager();
        runs.put_test(Test {
            id: "t1".to_string(),
            test_case_id: "ghost".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
        let err = mgr.normalize("default", "t1").await.unwrap_err();
        assert_eq!(err, ServiceError::NotFound("testcase".to_string()));
    }
}
