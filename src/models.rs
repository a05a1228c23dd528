//! Wire and storage data model shared by the capture engine, the comparison
//! engine, the stores, and the HTTP surface.
//!
//! Everything here is plain serde data. Maps of header name → values use
//! `HashMap<String, Vec<String>>` throughout so captured multi-value headers
//! survive a round-trip unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Captured HTTP traffic
// ---------------------------------------------------------------------------

/// A captured HTTP request, as recorded at the instrumented service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpReq {
    pub method: String,
    pub proto_major: u32,
    pub proto_minor: u32,
    pub url: String,
    #[serde(default)]
    pub url_params: HashMap<String, String>,
    #[serde(default)]
    pub header: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub body: String,
}

/// A captured HTTP response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpResp {
    pub status_code: u16,
    #[serde(default)]
    pub header: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub body: String,
}

/// Snapshot of one outbound dependency call made while serving the captured
/// request (database reads, downstream HTTP calls, ...). Replayed verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(rename = "type")]
    pub dep_type: String,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    #[serde(default)]
    pub data: Vec<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// TestCase — the replay unit
// ---------------------------------------------------------------------------

/// A recorded request/response pair plus the dedup and noise metadata the
/// engine derives from it.
///
/// `anchors` is always a subset of `all_keys`: the low-variance request
/// fields that form the deduplication fingerprint. `noise` lists response
/// paths (prefixed `body.` or `header.`) ignored during comparison.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub updated: i64,
    #[serde(default)]
    pub captured: i64,
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub http_req: HttpReq,
    #[serde(default)]
    pub http_resp: HttpResp,
    #[serde(default)]
    pub deps: Vec<Dependency>,
    #[serde(default)]
    pub all_keys: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub anchors: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub noise: Vec<String>,
}

// ---------------------------------------------------------------------------
// Test runs and per-test results
// ---------------------------------------------------------------------------

/// Lifecycle state shared by test runs and individual tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "PASSED")]
    Passed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl Default for Status {
    fn default() -> Self {
        Status::Running
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Running => write!(f, "RUNNING"),
            Status::Passed => write!(f, "PASSED"),
            Status::Failed => write!(f, "FAILED"),
        }
    }
}

/// A batch of replays against one app. Counters are incremented atomically
/// at the store layer, one per finished test.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestRun {
    pub id: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub updated: i64,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub success: u64,
    #[serde(default)]
    pub failure: u64,
    /// Child tests, attached only when a non-summary listing is requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<Vec<Test>>,
}

/// One replayed result inside a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Test {
    pub id: String,
    #[serde(default)]
    pub status: Status,
    /// Epoch seconds when the replay started / finished.
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub completed: i64,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub test_case_id: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub req: HttpReq,
    #[serde(default)]
    pub dep: Vec<Dependency>,
    #[serde(default)]
    pub resp: HttpResp,
    #[serde(default)]
    pub result: TestResult,
    /// The noise mask that was in effect for this comparison.
    #[serde(default)]
    pub noise: Vec<String>,
}

// ---------------------------------------------------------------------------
// Comparison diagnostics
// ---------------------------------------------------------------------------

/// How the response body was compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyType {
    #[serde(rename = "JSON")]
    Json,
    #[serde(rename = "PLAIN")]
    Plain,
}

impl Default for BodyType {
    fn default() -> Self {
        BodyType::Plain
    }
}

/// Expected-vs-actual for an integer field (status code).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntResult {
    pub normal: bool,
    pub expected: u16,
    pub actual: u16,
}

/// Expected-vs-actual for the response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodyResult {
    pub normal: bool,
    #[serde(rename = "type")]
    pub body_type: BodyType,
    pub expected: String,
    pub actual: String,
}

/// One side of a header diff entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    /// `None` when the header was absent on this side.
    pub value: Option<Vec<String>>,
}

/// One entry per header key in the union of expected and actual maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderResult {
    pub normal: bool,
    pub expected: Header,
    pub actual: Header,
}

/// Full structured outcome of one replay comparison.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestResult {
    pub status_code: IntResult,
    #[serde(default)]
    pub headers_result: Vec<HeaderResult>,
    #[serde(default)]
    pub body_result: BodyResult,
}
