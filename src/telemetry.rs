//! # Stage: Telemetry
//!
//! ## Responsibility
//! Fire-and-forget usage events: testcase deleted/edited, distinct app
//! count, normalize invocations, finished test runs. Events are anonymous
//! (a random per-process session id, never tenant data) and posted as JSON
//! from spawned tasks so a slow or unreachable endpoint can never stall a
//! request path.
//!
//! ## Guarantees
//! - Non-blocking: `emit` returns before any network I/O happens
//! - Failures are logged at debug level and otherwise swallowed
//! - Fully disabled with a single flag (no tasks spawned at all)

use serde_json::json;

const DEFAULT_ENDPOINT: &str = "https://telemetry.recheck.dev/events";

pub struct Telemetry {
    client: reqwest::Client,
    endpoint: String,
    enabled: bool,
    /// Random per-process session id; lets events from one deployment be
    /// grouped without identifying it.
    session: String,
}

impl Telemetry {
    pub fn new(enabled: bool) -> Self {
        Self::with_endpoint(enabled, DEFAULT_ENDPOINT.to_string())
    }

    pub fn with_endpoint(enabled: bool, endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            enabled,
            session: format!("{:016x}", rand::random::<u64>()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session
    }

    fn emit(&self, event: &str, mut fields: serde_json::Value) {
        if !self.enabled {
            return;
        }
        if let Some(obj) = fields.as_object_mut() {
            obj.insert("event".to_string(), json!(event));
            obj.insert("session".to_string(), json!(self.session));
        }
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let event = event.to_string();
        tokio::spawn(async move {
            if let Err(err) = client.post(&endpoint).json(&fields).send().await {
                tracing::debug!(%event, %err, "telemetry event dropped");
            }
        });
    }

    pub fn delete_tc(&self) {
        self.emit("testcase-deleted", json!({}));
    }

    pub fn edit_tc(&self) {
        self.emit("testcase-edited", json!({}));
    }

    pub fn get_apps(&self, count: usize) {
        self.emit("app-count", json!({ "apps": count }));
    }

    pub fn normalize(&self) {
        self.emit("normalize", json!({}));
    }

    pub fn test_run(&self, success: u64, failure: u64) {
        self.emit("test-run-finished", json!({ "success": success, "failure": failure }));
    }
}
