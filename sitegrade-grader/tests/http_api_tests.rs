//! HTTP API Integration Tests
//!
//! Drives the router with `oneshot` requests against a scripted raster source.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use helpers::{Behavior, ScriptedSource, END_TO_END_CATALOG};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sitegrade_common::events::EventBus;
use sitegrade_grader::batch::ScaleReconciliation;
use sitegrade_grader::scale::ScaleName;
use sitegrade_grader::{build_router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn test_app_with(source: ScriptedSource) -> Router {
    test_app_with_timeout(source, Duration::from_millis(500))
}

fn test_app_with_timeout(source: ScriptedSource, cell_timeout: Duration) -> Router {
    build_router(test_state(source, cell_timeout))
}

fn test_state(source: ScriptedSource, cell_timeout: Duration) -> AppState {
    let bus = EventBus::new(64);
    let orchestrator = Arc::new(helpers::orchestrator_with_timeout(
        helpers::table(END_TO_END_CATALOG),
        Arc::new(source),
        ScaleReconciliation::RetainPreviews,
        Some(bus.clone()),
        cell_timeout,
    ));
    AppState::new(orchestrator, bus, ScaleName::Detailed)
}

fn test_app() -> Router {
    test_app_with(helpers::end_to_end_source())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn start(app: &Router) -> String {
    let (status, body) = send(
        app,
        post_json("/grading/start", json!({ "latitude": 48.137154, "longitude": 11.576124 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "start failed: {}", body);
    body["run_id"].as_str().unwrap().to_string()
}

/// Poll until the run leaves `running`
async fn wait_for_terminal(app: &Router, run_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = send(app, get(&format!("/grading/status/{}", run_id))).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] != "running" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {} did not finish", run_id);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();

    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "sitegrade-grader");
    assert_eq!(body["layers"], 3);
    assert_eq!(body["active_runs"], 0);
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn test_layers_listed_in_execution_order() {
    let app = test_app();

    let (status, body) = send(&app, get("/layers")).await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["id"].as_str().unwrap())
        .collect();
    // Critical layers first, then by priority
    assert_eq!(ids, vec!["l1_noise", "l3_monument", "l2_vegetation"]);
    assert_eq!(body[0]["methods"], json!(["max"]));
    assert_eq!(body[1]["value_kind"], "categorical");
}

#[tokio::test]
async fn test_start_rejects_invalid_coordinate() {
    let app = test_app();

    let (status, body) = send(
        &app,
        post_json("/grading/start", json!({ "latitude": 91.0, "longitude": 11.5 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_start_and_poll_to_completion() {
    let app = test_app();

    let (status, started) = send(
        &app,
        post_json("/grading/start", json!({ "latitude": 48.137154, "longitude": 11.576124 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["layers_total"], 3);
    assert_eq!(started["tasks_total"], 3);
    assert!(started["eta_ms"].as_u64().unwrap() > 0);

    let run_id = started["run_id"].as_str().unwrap();
    let body = wait_for_terminal(&app, run_id).await;

    assert_eq!(body["status"], "completed");
    assert_eq!(body["scale_ceiling"], "detailed");
    assert_eq!(body["progress"]["tasks_completed"], 3);
    assert_eq!(body["critical_layers_resolved"], true);
    assert!(body.get("critical_gaps").is_none());
    assert_eq!(body["batch"]["layers"]["l1_noise"]["max_area_sample"]["value"], 62.0);
    assert_eq!(body["batch"]["layers"]["l3_monument"]["point_sample"]["value"], "category-B");
}

#[tokio::test]
async fn test_status_reports_critical_gaps() {
    let app = test_app_with(
        ScriptedSource::new()
            .with("l1_noise", Behavior::NoData)
            .with("l2_vegetation", Behavior::Value(8.0.into()))
            .with("l3_monument", Behavior::Value("category-B".into())),
    );

    let run_id = start(&app).await;
    let body = wait_for_terminal(&app, &run_id).await;

    assert_eq!(body["status"], "completed");
    assert_eq!(body["critical_gaps"], json!(["l1_noise"]));
}

#[tokio::test]
async fn test_status_reports_critical_layers_while_running() {
    // Both critical layers resolve; the vegetation read never returns
    let app = test_app_with_timeout(
        ScriptedSource::new()
            .with("l1_noise", Behavior::Value(62.0.into()))
            .with("l2_vegetation", Behavior::Hang)
            .with("l3_monument", Behavior::Value("category-B".into())),
        Duration::from_secs(30),
    );
    let run_id = start(&app).await;

    let mut body = Value::Null;
    for _ in 0..200 {
        body = send(&app, get(&format!("/grading/status/{}", run_id))).await.1;
        if body["progress"]["tasks_completed"] == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(body["progress"]["tasks_completed"], 2, "status: {}", body);
    assert_eq!(body["status"], "running");
    assert_eq!(body["critical_layers_resolved"], true);
    assert!(body.get("batch").is_none());

    send(&app, post_json(&format!("/grading/cancel/{}", run_id), json!({}))).await;
    wait_for_terminal(&app, &run_id).await;
}

#[tokio::test]
async fn test_oldest_finished_run_is_evicted() {
    let app = build_router(
        test_state(helpers::end_to_end_source(), Duration::from_millis(500)).with_retained_runs(1),
    );

    let first = start(&app).await;
    wait_for_terminal(&app, &first).await;
    let second = start(&app).await;
    let body = wait_for_terminal(&app, &second).await;
    assert_eq!(body["status"], "completed");

    // The second run is finalized and the first evicted under one lock
    let (status, _) = send(&app, get(&format!("/grading/status/{}", first))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, get(&format!("/grading/status/{}", second))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn test_status_unknown_run_is_not_found() {
    let app = test_app();

    let (status, body) = send(
        &app,
        get("/grading/status/6f1c2a57-0f0e-4a4b-9a53-1d2d0c0b9e11"),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_unknown_run_is_not_found() {
    let app = test_app();

    let (status, _) = send(
        &app,
        post_json("/grading/cancel/6f1c2a57-0f0e-4a4b-9a53-1d2d0c0b9e11", json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_finished_run_is_rejected() {
    let app = test_app();
    let run_id = start(&app).await;
    wait_for_terminal(&app, &run_id).await;

    let (status, body) = send(&app, post_json(&format!("/grading/cancel/{}", run_id), json!({}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_cancel_running_run() {
    let app = test_app_with_timeout(
        ScriptedSource::new()
            .with("l1_noise", Behavior::Value(62.0.into()))
            .with("l2_vegetation", Behavior::Hang)
            .with("l3_monument", Behavior::Value("category-B".into())),
        Duration::from_secs(30),
    );
    let run_id = start(&app).await;

    let (status, body) = send(&app, post_json(&format!("/grading/cancel/{}", run_id), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run_id"], run_id.as_str());

    let body = wait_for_terminal(&app, &run_id).await;
    assert_eq!(body["status"], "cancelled");
}

#[tokio::test]
async fn test_event_stream_route_exists() {
    let app = test_app();

    let response = app.oneshot(get("/grading/events")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.contains("text/event-stream"));
}
