//! API request handlers.
//!
//! Handlers are thin: they decode the body, call the dispatcher and map
//! core errors to HTTP statuses through [`ApiError`].

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::instrument;

use crate::dispatcher::{CacheReport, ClearReport, RefreshReport, Served};
use crate::predict::PredictionInput;

use super::AppState;
use super::error::ApiError;
use super::types::{HealthResponse, StatsResponse};

/// Decode analytics parameters into the workers' positional form.
///
/// An array is passed through, an object becomes `[object]` and an empty
/// body becomes `[]`.
fn analytics_params(body: &[u8]) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!([]));
    }
    let params: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))?;
    match params {
        Value::Array(_) => Ok(params),
        Value::Object(_) => Ok(Value::Array(vec![params])),
        _ => Err(ApiError::bad_request("Parameters must be a JSON object or array")),
    }
}

/// Run an analytics request.
#[instrument(skip(state, body))]
pub async fn run_analytics(
    State(state): State<Arc<AppState>>,
    Path(request_type): Path<String>,
    body: Bytes,
) -> Result<Json<Served>, ApiError> {
    let params = analytics_params(&body)?;
    let served = state.dispatcher.execute(&request_type, params).await?;
    Ok(Json(served))
}

/// Predict transit time and cost for one shipment.
#[instrument(skip_all)]
pub async fn predict(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Served>, ApiError> {
    let Json(body) = payload?;
    let input = PredictionInput::from_value(body)?;
    let served = state.dispatcher.predict(&input).await?;
    Ok(Json(served))
}

#[instrument(skip(state))]
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheReport> {
    Json(state.dispatcher.cache_stats())
}

#[instrument(skip(state))]
pub async fn clear_cache(State(state): State<Arc<AppState>>) -> Json<ClearReport> {
    Json(state.dispatcher.clear_caches())
}

/// Clear caches and re-run the pre-warm battery before answering.
#[instrument(skip(state))]
pub async fn refresh_cache(State(state): State<Arc<AppState>>) -> Json<RefreshReport> {
    Json(state.dispatcher.refresh_caches().await)
}

#[instrument(skip(state))]
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        usage: state.dispatcher.usage_stats(),
        pools: state.dispatcher.pool_stats(),
    })
}

#[instrument(skip(state))]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let pool = state.dispatcher.pool_stats().analytics;
    let workers_ready = pool.available + pool.busy;
    Json(HealthResponse {
        status: if workers_ready > 0 { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        workers_ready,
        pool_size: pool.pool_size,
        queued: pool.queued,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analytics_params() {
        assert_eq!(analytics_params(b"").unwrap(), json!([]));
        assert_eq!(analytics_params(b"  \n").unwrap(), json!([]));
        assert_eq!(analytics_params(br#"{"zone": 5}"#).unwrap(), json!([{"zone": 5}]));
        assert_eq!(analytics_params(b"[80, \"median\"]").unwrap(), json!([80, "median"]));
        assert!(analytics_params(b"42").is_err());
        assert!(analytics_params(b"{nope").is_err());
    }
}
