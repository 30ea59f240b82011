//! Cache pre-warming.
//!
//! After startup a background task pushes a battery of common analytics
//! requests through the dispatcher so the first real callers hit the cache.

use crate::dispatcher::Dispatcher;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Default pause between the server starting to listen and the first
/// pre-warm request.
pub const DEFAULT_PREWARM_DELAY: Duration = Duration::from_secs(1);

/// One request in the pre-warm battery.
///
/// Workers take positional params, so a query object travels as `[query]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrewarmRequest {
    pub request_type: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    json!([])
}

impl PrewarmRequest {
    pub fn new(request_type: impl Into<String>, params: Value) -> Self {
        Self {
            request_type: request_type.into(),
            params,
        }
    }
}

/// The requests dashboards issue on first load.
pub fn default_battery() -> Vec<PrewarmRequest> {
    vec![
        PrewarmRequest::new("summary", empty_params()),
        PrewarmRequest::new("carrier_summary", empty_params()),
        PrewarmRequest::new("distributions", empty_params()),
        PrewarmRequest::new("compare_2sigma", empty_params()),
        PrewarmRequest::new("compare_carriers", empty_params()),
        PrewarmRequest::new(
            "percentile_analysis",
            json!([{"percentile": 80, "method": "median"}]),
        ),
    ]
}

/// Outcome of a pre-warm run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PrewarmReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<PrewarmFailure>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PrewarmFailure {
    pub request_type: String,
    pub code: &'static str,
    pub error: String,
}

/// Issue `requests` one after another. A failure is recorded and the run
/// continues.
pub async fn run_prewarm(dispatcher: &Dispatcher, requests: &[PrewarmRequest]) -> PrewarmReport {
    let started = Instant::now();
    let mut report = PrewarmReport::default();

    for request in requests {
        report.attempted += 1;
        match dispatcher
            .execute(&request.request_type, request.params.clone())
            .await
        {
            Ok(_) => report.succeeded += 1,
            Err(e) => {
                warn!(request_type = %request.request_type, error = %e, "Pre-warm request failed");
                report.failures.push(PrewarmFailure {
                    request_type: request.request_type.clone(),
                    code: e.code(),
                    error: e.to_string(),
                });
            }
        }
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        succeeded = report.succeeded,
        attempted = report.attempted,
        elapsed_ms = report.elapsed_ms,
        "Cache pre-warm finished"
    );
    report
}

/// Run the dispatcher's pre-warm battery in the background after `delay`.
pub fn spawn_prewarm(dispatcher: Arc<Dispatcher>, delay: Duration) -> JoinHandle<PrewarmReport> {
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let requests = dispatcher.prewarm_requests().to_vec();
        info!(requests = requests.len(), "Pre-warming analytics cache");
        run_prewarm(&dispatcher, &requests).await
    })
}
