//! Dispatcher caching and invalidation with real workers.

mod common;

use common::{pool_config, predict_command, worker_command};
use serde_json::json;
use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use transit_core::dispatcher::{ClearReport, Dispatcher, DispatcherConfig};
use transit_core::error::CoreError;
use transit_core::pool::{OneShotRunner, WorkerPool, WorkerPoolConfig};
use transit_core::predict::{PredictBackend, PredictionInput};
use transit_core::prewarm::PrewarmRequest;

fn process_predictor() -> PredictBackend {
    PredictBackend::Process(OneShotRunner::new(predict_command(), Duration::from_secs(10)))
}

async fn dispatcher(config: DispatcherConfig, predictor: PredictBackend) -> Dispatcher {
    let dispatcher = Dispatcher::new(WorkerPool::new(pool_config(1)), predictor, config);
    let startup = dispatcher.initialize().await;
    assert_eq!(startup.analytics.ready, vec![0], "{:?}", startup.analytics.failed);
    dispatcher
}

/// Write `path` and stamp it with a fixed mtime so later touches are visible.
fn write_file(path: &Path, contents: &str, seconds: u64) {
    std::fs::write(path, contents).unwrap();
    touch(path, seconds);
}

fn touch(path: &Path, seconds: u64) {
    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + seconds);
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
}

fn shipment(zone: u32) -> PredictionInput {
    PredictionInput::from_value(json!({
        "ship_date": "2026-03-02",
        "zone": zone,
        "carrier": "UPS",
        "service_level": "GROUND",
        "package_weight_lbs": 2.0,
        "package_length_in": 12,
        "package_width_in": 12,
        "package_height_in": 12
    }))
    .unwrap()
}

#[tokio::test]
async fn analytics_cached_until_data_changes() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("model.bin");
    write_file(&data, "weights", 0);

    let config = DispatcherConfig {
        data_files: vec![data.clone()],
        ..Default::default()
    };
    let dispatcher = dispatcher(config, process_predictor()).await;

    let first = dispatcher.execute("summary", json!([{"zone": 4}])).await.unwrap();
    assert!(!first.cached);
    assert_eq!(first.data["type"], "summary");
    assert_eq!(first.data["served"], 1);

    // Same parameters in a different key order hit the cache.
    let second = dispatcher
        .execute("summary", serde_json::from_str(r#"[{ "zone" : 4 }]"#).unwrap())
        .await
        .unwrap();
    assert!(second.cached);
    assert_eq!(second.data, first.data);

    // Only the mtime moves.
    touch(&data, 60);
    let third = dispatcher.execute("summary", json!([{"zone": 4}])).await.unwrap();
    assert!(!third.cached);
    assert_eq!(third.data["served"], 2);

    let report = dispatcher.cache_stats();
    assert_eq!(report.analytics.cache.entries, 1);
    assert_eq!(report.analytics.cache.hits, 1);
    assert!(report.analytics.fingerprints.contains_key(&data.display().to_string()));

    let usage = dispatcher.usage_stats();
    assert_eq!(usage.latency.total_requests, 3);
    assert_eq!(usage.daily.today, 3);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn failures_are_not_cached() {
    let dispatcher = dispatcher(DispatcherConfig::default(), process_predictor()).await;

    for _ in 0..2 {
        match dispatcher.execute("fail", json!({"message": "no data"})).await {
            Err(CoreError::Computation(msg)) => assert_eq!(msg, "no data"),
            other => panic!("Expected Computation, got {:?}", other),
        }
    }
    assert_eq!(dispatcher.cache_stats().analytics.cache.entries, 0);
    assert_eq!(dispatcher.usage_stats().latency.total_requests, 2);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn predictions_invalidated_by_model_change() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("model.bin");
    write_file(&model, "weights-v1", 0);

    let config = DispatcherConfig {
        model_files: vec![model.clone()],
        ..Default::default()
    };
    let dispatcher = dispatcher(config, process_predictor()).await;

    let first = dispatcher.predict(&shipment(4)).await.unwrap();
    assert!(!first.cached);
    assert_eq!(first.data["predictions"]["transit_time_days"], 3.0);
    assert!(first.data.get("success").is_none());

    assert!(dispatcher.predict(&shipment(4)).await.unwrap().cached);
    assert!(!dispatcher.predict(&shipment(6)).await.unwrap().cached);

    // Analytics are untouched by model changes.
    dispatcher.execute("summary", json!({})).await.unwrap();

    write_file(&model, "weights-v2", 60);
    assert!(!dispatcher.predict(&shipment(4)).await.unwrap().cached);
    assert!(dispatcher.execute("summary", json!({})).await.unwrap().cached);

    assert_eq!(
        dispatcher.clear_caches(),
        ClearReport {
            analytics: 1,
            predictions: 1
        }
    );
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn invalid_prediction_is_rejected_before_running() {
    let dispatcher = dispatcher(DispatcherConfig::default(), process_predictor()).await;

    let mut input = shipment(4);
    input.carrier = "  ".to_string();
    assert!(matches!(
        dispatcher.predict(&input).await,
        Err(CoreError::InvalidRequest(_))
    ));
    assert_eq!(dispatcher.cache_stats().predictions.cache.entries, 0);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn pooled_predictions() {
    let predictor_pool = WorkerPool::new(WorkerPoolConfig::new(worker_command()).with_pool_size(2));
    let dispatcher = dispatcher(DispatcherConfig::default(), PredictBackend::Pool(predictor_pool)).await;

    let served = dispatcher.predict(&shipment(2)).await.unwrap();
    assert!(!served.cached);
    assert_eq!(served.data["predictions"]["transit_time_days"], 2.0);
    assert_eq!(served.data["input"]["ship_date"], "2026-03-02");

    let report = dispatcher.pool_stats();
    assert_eq!(report.prediction_backend, "pool");
    let predictions = report.predictions.unwrap();
    assert_eq!(predictions.pool_size, 2);
    assert_eq!(predictions.total_served, 1);

    dispatcher.shutdown().await;
    assert!(matches!(
        dispatcher.predict(&shipment(3)).await,
        Err(CoreError::ShuttingDown)
    ));
}

#[tokio::test]
async fn refresh_clears_and_rewarms() {
    let config = DispatcherConfig {
        prewarm: vec![
            PrewarmRequest::new("summary", json!({})),
            PrewarmRequest::new("fail", json!({"message": "warm-up failed"})),
            PrewarmRequest::new("percentile_analysis", json!([{"percentile": 80, "metric": "median"}])),
        ],
        ..Default::default()
    };
    let dispatcher = dispatcher(config, process_predictor()).await;
    dispatcher.execute("carrier_summary", json!({})).await.unwrap();

    let report = dispatcher.refresh_caches().await;
    assert_eq!(report.cleared.analytics, 1);
    assert_eq!(report.prewarm.attempted, 3);
    assert_eq!(report.prewarm.succeeded, 2);
    assert_eq!(report.prewarm.failures.len(), 1);
    assert_eq!(report.prewarm.failures[0].request_type, "fail");
    assert_eq!(report.prewarm.failures[0].code, "COMPUTATION_ERROR");

    // The battery populated the cache.
    let warmed = dispatcher.execute("summary", json!({})).await.unwrap();
    assert!(warmed.cached);
    assert_eq!(dispatcher.cache_stats().analytics.cache.entries, 2);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn default_battery_warms_every_request() {
    let dispatcher = dispatcher(DispatcherConfig::default(), process_predictor()).await;

    let report = dispatcher.refresh_caches().await;
    assert_eq!(report.prewarm.attempted, 6);
    assert!(report.prewarm.failures.is_empty(), "{:?}", report.prewarm.failures);
    assert_eq!(dispatcher.cache_stats().analytics.cache.entries, 6);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn result_computed_before_invalidation_is_not_cached() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data.csv");
    write_file(&data, "zone,days\n4,3\n", 0);

    let config = DispatcherConfig {
        data_files: vec![data.clone()],
        ..Default::default()
    };
    let dispatcher = Dispatcher::new(WorkerPool::new(pool_config(2)), process_predictor(), config);
    assert_eq!(dispatcher.initialize().await.analytics.ready.len(), 2);

    let slow = dispatcher.execute("sleep", json!({"ms": 400}));
    let concurrent = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        write_file(&data, "zone,days\n4,5\n", 60);
        // This lookup notices the change and clears the lane.
        dispatcher.execute("echo", json!({})).await.unwrap()
    };
    let (slow, echo) = tokio::join!(slow, concurrent);
    assert!(!slow.unwrap().cached);
    assert!(!echo.cached);

    // The slow result was computed from the old file and must not be served.
    let rerun = dispatcher.execute("sleep", json!({"ms": 400})).await.unwrap();
    assert!(!rerun.cached);
    assert!(dispatcher.execute("sleep", json!({"ms": 400})).await.unwrap().cached);
    dispatcher.shutdown().await;
}
