mod common;

use axum::http::StatusCode;
use common::TestApp;
use common_obs::EventKind;
use serde_json::Value;

#[tokio::test]
async fn root_describes_the_service() {
    let app = TestApp::new();
    let response = app.get("/").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers["content-type"], "application/json");
    let body: Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body["service"], "metrics-log-api");
    assert_eq!(body["status"], "ok");
    assert!(body["time"].as_str().unwrap().ends_with('Z'));
    assert_eq!(app.state.metrics().event_count(EventKind::Ok), 1);
}

#[tokio::test]
async fn slow_reports_the_delay_used() {
    let app = TestApp::new();
    let response = app.get("/slow?ms=20&jitter=0").await;

    assert_eq!(response.status, StatusCode::OK);
    let body: Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body["slow_ms"], 20);

    let records = app.logs.records_with_msg("request");
    assert!(records[0]["latency_ms"].as_u64().unwrap() >= 20);
    assert_eq!(app.state.metrics().event_count(EventKind::ForcedSlow), 1);
}

#[tokio::test]
async fn slow_jitter_stays_below_bound() {
    let app = TestApp::new();
    let response = app.get("/slow?ms=5&jitter=10").await;

    let body: Value = serde_json::from_str(&response.body).unwrap();
    let delay = body["slow_ms"].as_u64().unwrap();
    assert!((5..15).contains(&delay), "{delay}");
}

#[tokio::test]
async fn error_status_is_clamped() {
    let app = TestApp::new();

    let cases = [
        ("/error?code=999", 500),
        ("/error?code=404", 404),
        ("/error?code=399", 500),
        ("/error?code=teapot", 500),
        ("/error", 500),
        ("/error?code=599", 599),
    ];
    for (uri, expected) in cases {
        let response = app.get(uri).await;
        assert_eq!(response.status.as_u16(), expected, "{uri}");
        assert_eq!(response.body, format!("forced error {expected}\n"));
        assert_eq!(
            response.headers["content-type"],
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.headers["x-content-type-options"], "nosniff");
    }

    let metrics = app.state.metrics();
    assert_eq!(metrics.event_count(EventKind::ForcedError), 6);
    assert_eq!(metrics.request_count("GET", "error", 500), 4);
    assert_eq!(metrics.request_count("GET", "error", 404), 1);
}

#[tokio::test]
async fn repeated_query_parameters_use_the_first_value() {
    let app = TestApp::new();

    let response = app.get("/error?code=404&code=999").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body, "forced error 404\n");

    let response = app.get("/slow?ms=5&ms=50&jitter=0").await;
    let body: Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body["slow_ms"], 5);
}

#[tokio::test]
async fn crash_logs_before_terminating() {
    let app = TestApp::new();
    let response = app.get("/crash").await;

    assert_eq!(app.exit.code(), Some(1));
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, "crashing now\n");
    assert_eq!(app.state.metrics().event_count(EventKind::Crash), 1);

    let at_exit = app.exit.lines_at_exit();
    assert_eq!(at_exit.len(), 1);
    assert_eq!(at_exit[0]["msg"], "forced crash requested");

    let lines = app.logs.lines();
    assert_eq!(lines[0]["msg"], "forced crash requested");
    assert_eq!(lines[0]["level"], "error");
    assert_eq!(lines[0]["extra"]["path"], "/crash");
    assert!(lines[0].get("request_id").is_none());
}

#[tokio::test]
async fn metrics_exposition_reflects_traffic() {
    let app = TestApp::new();
    app.get("/").await;
    app.get("/error?code=404").await;

    let response = app.get("/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.headers["content-type"],
        "text/plain; version=0.0.4"
    );

    let body = response.body;
    assert!(body.contains("# TYPE http_requests_total counter"));
    assert!(body.contains("# TYPE http_request_duration_seconds histogram"));
    assert!(body.contains("# TYPE app_events_total counter"));
    assert!(body.contains(r#"http_requests_total{method="GET",route="root",status="200"} 1"#));
    assert!(body.contains(r#"http_requests_total{method="GET",route="error",status="404"} 1"#));
    assert!(body.contains(
        r#"http_request_duration_seconds_bucket{method="GET",route="root",le="+Inf"} 1"#
    ));
    assert!(body.contains(r#"http_request_duration_seconds_count{method="GET",route="error"} 1"#));
    assert!(body.contains(r#"app_events_total{type="ok"} 1"#));
    assert!(body.contains(r#"app_events_total{type="forced_error"} 1"#));
    assert!(body.contains(r#"app_events_total{type="crash"} 0"#));
}

#[tokio::test]
async fn probes_answer_with_empty_body() {
    let app = TestApp::new();
    for path in ["/healthz", "/readyz"] {
        let response = app.get(path).await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.is_empty());
    }
}
