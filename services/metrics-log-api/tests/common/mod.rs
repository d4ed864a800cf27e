#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use common_obs::testing::CaptureWriter;
use common_obs::JsonLogger;
use http_body_util::BodyExt;
use metrics_log_api::exit::ProcessExit;
use metrics_log_api::{build_router, AppState};
use serde_json::Value;
use tower::ServiceExt;

/// Records the requested exit code along with the log lines written so far.
pub struct RecordingExit {
    logs: CaptureWriter,
    code: Mutex<Option<i32>>,
    lines_at_exit: Mutex<Vec<Value>>,
}

impl RecordingExit {
    pub fn new(logs: CaptureWriter) -> Self {
        Self {
            logs,
            code: Mutex::new(None),
            lines_at_exit: Mutex::new(Vec::new()),
        }
    }

    pub fn code(&self) -> Option<i32> {
        *self.code.lock().unwrap()
    }

    /// Log lines captured at the moment `terminate` ran.
    pub fn lines_at_exit(&self) -> Vec<Value> {
        self.lines_at_exit.lock().unwrap().clone()
    }
}

impl ProcessExit for RecordingExit {
    fn terminate(&self, code: i32) {
        *self.lines_at_exit.lock().unwrap() = self.logs.lines();
        *self.code.lock().unwrap() = Some(code);
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub logs: CaptureWriter,
    pub exit: Arc<RecordingExit>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestApp {
    pub fn new() -> Self {
        let logs = CaptureWriter::default();
        let exit = Arc::new(RecordingExit::new(logs.clone()));
        let state = Arc::new(AppState::new(
            JsonLogger::with_writer(logs.clone()),
            exit.clone(),
        ));
        let router = build_router(state.clone());
        Self {
            router,
            state,
            logs,
            exit,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let (parts, body) = response.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        TestResponse {
            status: parts.status,
            headers: parts.headers,
            body: String::from_utf8(bytes.to_vec()).expect("utf8 body"),
        }
    }
}
