//! HTTP API tests against a router backed by reference workers.

mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use common::{pool_config, predict_command};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use transit_core::dispatcher::{Dispatcher, DispatcherConfig};
use transit_core::pool::{OneShotRunner, WorkerPool};
use transit_core::predict::PredictBackend;
use transit_core::prewarm::PrewarmRequest;
use transit_core::server::build_router;

async fn app() -> (Router, Arc<Dispatcher>) {
    let predictor = PredictBackend::Process(OneShotRunner::new(predict_command(), Duration::from_secs(10)));
    let config = DispatcherConfig {
        prewarm: vec![PrewarmRequest::new("summary", json!({}))],
        ..Default::default()
    };
    let dispatcher = Arc::new(Dispatcher::new(WorkerPool::new(pool_config(1)), predictor, config));
    dispatcher.initialize().await;
    (build_router(dispatcher.clone(), false), dispatcher)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn analytics_reports_cache_hits() {
    let (app, dispatcher) = app().await;

    let (status, first) = send(&app, post("/api/v1/analytics/summary", r#"{"zone": 4}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["cached"], false);
    assert_eq!(first["data"]["query"], json!({"zone": 4}));

    let (_, second) = send(&app, post("/api/v1/analytics/summary", r#"{"zone":4}"#)).await;
    assert_eq!(second["cached"], true);
    assert_eq!(second["data"], first["data"]);

    // An empty body means no parameters.
    let (status, empty) = send(&app, post("/api/v1/analytics/distributions", "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(empty["data"]["query"], json!({}));
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn analytics_errors_map_to_statuses() {
    let (app, dispatcher) = app().await;

    let (status, body) = send(
        &app,
        post("/api/v1/analytics/fail", r#"{"message": "zone 99 has no rows"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "COMPUTATION_ERROR");
    assert_eq!(body["message"], "Computation failed: zone 99 has no rows");

    let (status, body) = send(&app, post("/api/v1/analytics/summary", "42")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, body) = send(&app, post("/api/v1/analytics/crash", "{}")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "WORKER_EXITED");
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn predict_endpoint() {
    let (app, dispatcher) = app().await;
    let shipment = r#"{
        "ship_date": "2026-03-02", "zone": "4", "carrier": "UPS", "service_level": "GROUND",
        "package_weight_lbs": "2", "package_length_in": 12, "package_width_in": 12, "package_height_in": 12
    }"#;

    let (status, body) = send(&app, post("/api/v1/predict", shipment)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cached"], false);
    assert_eq!(body["data"]["predictions"]["transit_time_days"], 3.0);

    let (_, again) = send(&app, post("/api/v1/predict", shipment)).await;
    assert_eq!(again["cached"], true);

    let (status, body) = send(&app, post("/api/v1/predict", r#"{"zone": 4}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (status, _) = send(&app, post("/api/v1/predict", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn cache_administration() {
    let (app, dispatcher) = app().await;
    send(&app, post("/api/v1/analytics/compare_carriers", "{}")).await;

    let (status, report) = send(&app, get("/api/v1/admin/cache")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["analytics"]["entries"], 1);
    assert_eq!(report["predictions"]["entries"], 0);

    let (_, refreshed) = send(&app, post("/api/v1/admin/cache/refresh", "")).await;
    assert_eq!(refreshed["cleared"]["analytics"], 1);
    assert_eq!(refreshed["prewarm"]["succeeded"], 1);

    let (_, cleared) = send(&app, post("/api/v1/admin/cache/clear", "")).await;
    assert_eq!(cleared, json!({"analytics": 1, "predictions": 0}));
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn health_and_stats() {
    let (app, dispatcher) = app().await;

    let (status, health) = send(&app, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["workers_ready"], 1);
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

    send(&app, post("/api/v1/analytics/summary", "{}")).await;
    let (_, stats) = send(&app, get("/api/v1/stats")).await;
    assert_eq!(stats["usage"]["latency"]["total_requests"], 1);
    assert_eq!(stats["usage"]["daily"]["today"], 1);
    assert_eq!(stats["pools"]["prediction_backend"], "process");
    assert_eq!(stats["pools"]["analytics"]["total_served"], 1);

    dispatcher.shutdown().await;
    let (_, health) = send(&app, get("/api/v1/health")).await;
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn request_id_is_echoed() {
    let (app, dispatcher) = app().await;

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("x-request-id", "trace-me-123")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "trace-me-123");

    let response = app.clone().oneshot(get("/api/v1/health")).await.unwrap();
    assert!(!response.headers()["x-request-id"].is_empty());
    dispatcher.shutdown().await;
}
