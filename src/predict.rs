//! Prediction inputs and backends.
//!
//! A prediction runs either as a transient process per call or on a worker
//! pool dedicated to the predictor. Both return the predictor's result
//! object unchanged apart from the dropped `success` flag.

use crate::error::{CoreError, Result};
use crate::pool::{InitReport, OneShotRunner, PoolStats, WorkerPool};
use chrono::{Local, NaiveDate};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request type used for predictions on the worker wire protocol and in
/// cache keys.
pub const PREDICT_REQUEST_TYPE: &str = "predict";

/// Shipment to predict transit time and cost for.
///
/// Numeric fields accept JSON numbers or numeric strings, as form posts
/// commonly send them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionInput {
    /// Defaults to today's local date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship_date: Option<NaiveDate>,
    #[serde(deserialize_with = "zone_from_number_or_string")]
    pub zone: u32,
    pub carrier: String,
    pub service_level: String,
    #[serde(deserialize_with = "f64_from_number_or_string")]
    pub package_weight_lbs: f64,
    #[serde(deserialize_with = "f64_from_number_or_string")]
    pub package_length_in: f64,
    #[serde(deserialize_with = "f64_from_number_or_string")]
    pub package_width_in: f64,
    #[serde(deserialize_with = "f64_from_number_or_string")]
    pub package_height_in: f64,
}

impl PredictionInput {
    /// Parse and validate a JSON body.
    pub fn from_value(value: Value) -> Result<Self> {
        let input: Self = serde_json::from_value(value)
            .map_err(|e| CoreError::InvalidRequest(format!("invalid prediction input: {}", e)))?;
        input.validate()?;
        Ok(input)
    }

    pub fn validate(&self) -> Result<()> {
        if self.zone == 0 {
            return Err(CoreError::InvalidRequest("zone must be at least 1".to_string()));
        }
        if self.carrier.trim().is_empty() {
            return Err(CoreError::InvalidRequest("carrier must not be empty".to_string()));
        }
        if self.service_level.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "service_level must not be empty".to_string(),
            ));
        }
        let measures = [
            ("package_weight_lbs", self.package_weight_lbs),
            ("package_length_in", self.package_length_in),
            ("package_width_in", self.package_width_in),
            ("package_height_in", self.package_height_in),
        ];
        for (name, value) in measures {
            if !value.is_finite() || value <= 0.0 {
                return Err(CoreError::InvalidRequest(format!(
                    "{} must be a positive number",
                    name
                )));
            }
        }
        Ok(())
    }

    /// The input with `ship_date` resolved, as sent to the predictor and
    /// used for the cache key.
    pub fn normalized(&self) -> Value {
        self.normalized_on(Local::now().date_naive())
    }

    pub fn normalized_on(&self, today: NaiveDate) -> Value {
        let resolved = Self {
            ship_date: Some(self.ship_date.unwrap_or(today)),
            ..self.clone()
        };
        serde_json::to_value(resolved).unwrap_or(Value::Null)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

fn f64_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected a number, got {:?}", s))),
    }
}

fn zone_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let zone = f64_from_number_or_string(deserializer)?;
    if zone.fract() != 0.0 || !(0.0..=u32::MAX as f64).contains(&zone) {
        return Err(de::Error::custom(format!(
            "zone must be a whole number, got {}",
            zone
        )));
    }
    Ok(zone as u32)
}

/// Where predictions run.
pub enum PredictBackend {
    /// One transient process per call.
    Process(OneShotRunner),
    /// A worker pool speaking the wire protocol.
    Pool(WorkerPool),
}

impl PredictBackend {
    pub fn name(&self) -> &'static str {
        match self {
            PredictBackend::Process(_) => "process",
            PredictBackend::Pool(_) => "pool",
        }
    }

    /// Start workers if this backend has any.
    pub async fn initialize(&self) -> Option<InitReport> {
        match self {
            PredictBackend::Process(_) => None,
            PredictBackend::Pool(pool) => Some(pool.initialize().await),
        }
    }

    /// Run one prediction on a normalized input.
    pub async fn predict(&self, input: &Value) -> Result<Value> {
        match self {
            PredictBackend::Process(runner) => runner.run(input).await,
            PredictBackend::Pool(pool) => pool.submit(PREDICT_REQUEST_TYPE, input.clone()).await,
        }
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        match self {
            PredictBackend::Process(_) => None,
            PredictBackend::Pool(pool) => Some(pool.stats()),
        }
    }

    pub async fn shutdown(&self) {
        if let PredictBackend::Pool(pool) = self {
            pool.shutdown().await;
        }
    }
}
