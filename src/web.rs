//! HTTP/JSON binding of the regression service.
//!
//! The transport stays thin: every handler decodes its input, calls one
//! service operation, and encodes the outcome. The tenant id travels in the
//! `x-recheck-cid` header and defaults to `"default"`. Service errors map to
//! 404 (`NotFound`), 400 (`BadRequest`) and 500 (`Internal`).

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::Filter;

use crate::error::ServiceError;
use crate::models::{HttpResp, Status, TestCase, TestRun};
use crate::now_secs;
use crate::regression::Regression;
use crate::run::RunManager;
use crate::store::RunFilter;

/// Shared handle passed into every route.
#[derive(Clone)]
pub struct AppState {
    pub regression: Arc<Regression>,
    pub runs: Arc<RunManager>,
}

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StartQuery {
    pub app: String,
    pub user: Option<String>,
    /// Announced number of planned tests; informational only.
    #[allow(dead_code)]
    pub total: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EndQuery {
    pub id: String,
    pub status: Status,
}

#[derive(Debug, Deserialize)]
pub struct TestCaseQuery {
    pub app: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DeNoiseReq {
    pub id: String,
    pub app: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub header: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct TestReq {
    pub id: String,
    pub app_id: String,
    pub run_id: String,
    pub resp: HttpResp,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub user: Option<String>,
    pub app: Option<String>,
    pub id: Option<String>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub summary: Option<bool>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct NormalizeQuery {
    /// Id of the finished test whose response becomes the new expected.
    pub id: String,
}

#[derive(Debug, Serialize)]
struct IdReply {
    id: String,
}

#[derive(Debug, Serialize)]
struct IdsReply {
    ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PassReply {
    pass: bool,
}

#[derive(Debug, Serialize)]
struct ErrorReply {
    error: String,
}

fn error_reply(err: &ServiceError) -> warp::reply::WithStatus<warp::reply::Json> {
    let status = match err {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ServiceError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warp::reply::with_status(warp::reply::json(&ErrorReply { error: err.to_string() }), status)
}

fn ok_reply<T: Serialize>(body: &T) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(body), StatusCode::OK)
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn with_cid() -> impl Filter<Extract = (String,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>("x-recheck-cid")
        .map(|cid: Option<String>| cid.unwrap_or_else(|| "default".to_string()))
}

/// The full route tree. Exposed separately from [`serve`] so tests can drive
/// it with `warp::test`.
pub fn routes(
    state: AppState,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let base = || warp::path("api").and(warp::path("regression"));

    let start = base()
        .and(warp::path("start"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_cid())
        .and(warp::query::<StartQuery>())
        .and(with_state(state.clone()))
        .and_then(start_run);

    let end = base()
        .and(warp::path("end"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_cid())
        .and(warp::query::<EndQuery>())
        .and(with_state(state.clone()))
        .and_then(end_run);

    let get_tc = base()
        .and(warp::path("testcase"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_cid())
        .and(warp::query::<TestCaseQuery>())
        .and(with_state(state.clone()))
        .and_then(get_testcase);

    let list_tcs = base()
        .and(warp::path("testcase"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_cid())
        .and(warp::query::<TestCaseQuery>())
        .and(with_state(state.clone()))
        .and_then(list_testcases);

    let post_tcs = base()
        .and(warp::path("testcase"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_cid())
        .and(warp::body::json::<Vec<TestCase>>())
        .and(with_state(state.clone()))
        .and_then(post_testcases);

    let delete_tc = base()
        .and(warp::path("testcase"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::delete())
        .and(with_cid())
        .and(with_state(state.clone()))
        .and_then(delete_testcase);

    let denoise = base()
        .and(warp::path("denoise"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_cid())
        .and(warp::body::json::<DeNoiseReq>())
        .and(with_state(state.clone()))
        .and_then(de_noise);

    let test = base()
        .and(warp::path("test"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_cid())
        .and(warp::body::json::<TestReq>())
        .and(with_state(state.clone()))
        .and_then(run_test);

    let runs = base()
        .and(warp::path("runs"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_cid())
        .and(warp::query::<RunsQuery>())
        .and(with_state(state.clone()))
        .and_then(list_runs);

    let normalize = base()
        .and(warp::path("normalize"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_cid())
        .and(warp::query::<NormalizeQuery>())
        .and(with_state(state.clone()))
        .and_then(normalize_test);

    let apps = base()
        .and(warp::path("apps"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_cid())
        .and(with_state(state))
        .and_then(list_apps);

    start
        .or(end)
        .or(get_tc)
        .or(list_tcs)
        .or(post_tcs)
        .or(delete_tc)
        .or(denoise)
        .or(test)
        .or(runs)
        .or(normalize)
        .or(apps)
}

/// Bind and serve the API on the given port.
pub async fn serve(state: AppState, port: u16) {
    tracing::info!(port, "regression API listening");
    warp::serve(routes(state)).run(([0, 0, 0, 0], port)).await;
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn start_run(
    cid: String,
    query: StartQuery,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let now = now_secs();
    let run = TestRun {
        id: Uuid::new_v4().to_string(),
        created: now,
        updated: now,
        status: Status::Running,
        cid,
        app: query.app,
        user: query.user.unwrap_or_else(|| "default".to_string()),
        ..Default::default()
    };
    let id = run.id.clone();
    Ok(match state.runs.put(run).await {
        Ok(()) => ok_reply(&IdReply { id }),
        Err(err) => error_reply(&err),
    })
}

async fn end_run(
    cid: String,
    query: EndQuery,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let filter = RunFilter { id: Some(query.id.clone()), ..Default::default() };
    let found = match state.runs.get(&cid, true, &filter, None, Some(1)).await {
        Ok(runs) => runs.into_iter().next(),
        Err(err) => return Ok(error_reply(&err)),
    };
    let Some(mut run) = found else {
        return Ok(error_reply(&ServiceError::NotFound("test run".to_string())));
    };
    run.status = query.status;
    run.updated = now_secs();
    Ok(match state.runs.put(run).await {
        Ok(()) => ok_reply(&IdReply { id: query.id }),
        Err(err) => error_reply(&err),
    })
}

async fn get_testcase(
    id: String,
    cid: String,
    query: TestCaseQuery,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let app = query.app.unwrap_or_default();
    Ok(match state.regression.get(&cid, &app, &id).await {
        Ok(tc) => ok_reply(&tc),
        Err(err) => error_reply(&err),
    })
}

async fn list_testcases(
    cid: String,
    query: TestCaseQuery,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let app = query.app.unwrap_or_default();
    Ok(match state.regression.get_all(&cid, &app, query.offset, query.limit).await {
        Ok(tcs) => ok_reply(&tcs),
        Err(err) => error_reply(&err),
    })
}

async fn post_testcases(
    cid: String,
    cases: Vec<TestCase>,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(match state.regression.put(&cid, cases).await {
        Ok(ids) => ok_reply(&IdsReply { ids }),
        Err(err) => error_reply(&err),
    })
}

async fn delete_testcase(
    id: String,
    cid: String,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(match state.regression.delete_tc(&cid, &id).await {
        Ok(()) => ok_reply(&IdReply { id }),
        Err(err) => error_reply(&err),
    })
}

async fn de_noise(
    cid: String,
    req: DeNoiseReq,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(match state.regression.de_noise(&cid, &req.id, &req.app, &req.body, &req.header).await {
        Ok(()) => ok_reply(&IdReply { id: req.id }),
        Err(err) => error_reply(&err),
    })
}

async fn run_test(
    cid: String,
    req: TestReq,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(match state.regression.test(&cid, &req.app_id, &req.run_id, &req.id, req.resp).await {
        Ok(pass) => ok_reply(&PassReply { pass }),
        Err(err) => error_reply(&err),
    })
}

async fn list_runs(
    cid: String,
    query: RunsQuery,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let filter = RunFilter {
        user: query.user,
        app: query.app,
        id: query.id,
        from: query.from,
        to: query.to,
    };
    let summary = query.summary.unwrap_or(true);
    Ok(match state.runs.get(&cid, summary, &filter, query.offset, query.limit).await {
        Ok(runs) => ok_reply(&runs),
        Err(err) => error_reply(&err),
    })
}

async fn normalize_test(
    cid: String,
    query: NormalizeQuery,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(match state.runs.normalize(&cid, &query.id).await {
        Ok(()) => ok_reply(&IdReply { id: query.id }),
        Err(err) => error_reply(&err),
    })
}

async fn list_apps(cid: String, state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(match state.regression.get_apps(&cid).await {
        Ok(apps) => ok_reply(&apps),
        Err(err) => error_reply(&err),
    })
}
