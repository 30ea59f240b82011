//! Request dispatcher.
//!
//! The single entry point for analytics and predictions: check the lane's
//! tracked files, answer from cache when possible, otherwise run the request
//! out of process and cache a successful result. Every call is counted.

use crate::cache::{CacheStats, FingerprintTracker, ResultCache, TtlPolicy, canonical_key};
use crate::error::{CoreError, Result};
use crate::pool::{InitReport, PoolStats, WorkerPool};
use crate::predict::{PREDICT_REQUEST_TYPE, PredictBackend, PredictionInput};
use crate::prewarm::{self, PrewarmReport, PrewarmRequest};
use crate::usage::{DEFAULT_LATENCY_WINDOW, DailyCountTracker, DailyStats, LatencyStats, RollingLatencyTracker};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Files the analytics results are computed from.
    pub data_files: Vec<PathBuf>,
    /// Files the predictor loads.
    pub model_files: Vec<PathBuf>,
    pub analytics_ttl: TtlPolicy,
    pub prediction_ttl: TtlPolicy,
    /// Latency samples kept for statistics.
    pub latency_window: usize,
    /// Requests issued by the pre-warmer and by `refresh_caches`.
    pub prewarm: Vec<PrewarmRequest>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            data_files: Vec::new(),
            model_files: Vec::new(),
            analytics_ttl: TtlPolicy::analytics(),
            prediction_ttl: TtlPolicy::predictions(),
            latency_window: DEFAULT_LATENCY_WINDOW,
            prewarm: prewarm::default_battery(),
        }
    }
}

/// A result plus where it came from.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Served {
    pub data: Value,
    pub cached: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A cache together with the files that invalidate it.
///
/// `epoch` moves on every clear. A miss remembers the epoch it started in
/// and its result is dropped if the lane was cleared while it ran.
struct CacheLane {
    name: &'static str,
    cache: Mutex<ResultCache>,
    tracker: Mutex<FingerprintTracker>,
    epoch: AtomicU64,
}

enum Lookup {
    Hit(Value),
    Miss { epoch: u64 },
}

impl CacheLane {
    fn new(name: &'static str, policy: TtlPolicy, paths: Vec<PathBuf>) -> Self {
        let mut tracker = FingerprintTracker::new(paths);
        tracker.prime();
        Self {
            name,
            cache: Mutex::new(ResultCache::new(policy)),
            tracker: Mutex::new(tracker),
            epoch: AtomicU64::new(0),
        }
    }

    /// Clear the cache if a tracked file changed, then look up `key`.
    fn lookup(&self, key: &str) -> Lookup {
        let changed = lock(&self.tracker).has_changed();
        let mut cache = lock(&self.cache);
        if changed {
            let cleared = self.clear_locked(&mut cache);
            info!(lane = self.name, cleared, "Tracked files changed, cache invalidated");
        }
        match cache.get(key) {
            Some(value) => Lookup::Hit(value),
            None => Lookup::Miss {
                epoch: self.epoch.load(Ordering::Acquire),
            },
        }
    }

    /// Cache a result computed since `epoch`; stale results are dropped.
    fn store(&self, epoch: u64, key: String, value: Value, category: &str) {
        let mut cache = lock(&self.cache);
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!(lane = self.name, category, "Cache cleared during request, result not stored");
            return;
        }
        cache.set(key, value, category);
    }

    fn clear(&self) -> usize {
        self.clear_locked(&mut lock(&self.cache))
    }

    /// Epoch changes happen under the cache lock.
    fn clear_locked(&self, cache: &mut ResultCache) -> usize {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        cache.clear()
    }

    fn stats(&self) -> LaneStats {
        let cache = {
            let mut cache = lock(&self.cache);
            cache.purge_expired();
            cache.stats()
        };
        LaneStats {
            cache,
            fingerprints: lock(&self.tracker).snapshot(),
        }
    }
}

/// One lane of the cache report.
#[derive(Debug, Clone, Serialize)]
pub struct LaneStats {
    #[serde(flatten)]
    pub cache: CacheStats,
    /// Tracked path → last observed hash.
    pub fingerprints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub analytics: LaneStats,
    pub predictions: LaneStats,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ClearReport {
    pub analytics: usize,
    pub predictions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub cleared: ClearReport,
    pub prewarm: PrewarmReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub latency: LatencyStats,
    pub daily: DailyStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub analytics: PoolStats,
    pub prediction_backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions: Option<PoolStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub analytics: InitReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions: Option<InitReport>,
}

/// Cache-fronted access to the analytics pool and the predictor.
pub struct Dispatcher {
    pool: WorkerPool,
    predictor: PredictBackend,
    analytics: CacheLane,
    predictions: CacheLane,
    latency: Mutex<RollingLatencyTracker>,
    daily: Mutex<DailyCountTracker>,
    prewarm: Vec<PrewarmRequest>,
}

impl Dispatcher {
    /// Build a dispatcher. Tracked files are fingerprinted right away so the
    /// first request does not see a change.
    pub fn new(pool: WorkerPool, predictor: PredictBackend, config: DispatcherConfig) -> Self {
        Self {
            pool,
            predictor,
            analytics: CacheLane::new("analytics", config.analytics_ttl, config.data_files),
            predictions: CacheLane::new("predictions", config.prediction_ttl, config.model_files),
            latency: Mutex::new(RollingLatencyTracker::new(config.latency_window)),
            daily: Mutex::new(DailyCountTracker::new()),
            prewarm: config.prewarm,
        }
    }

    /// Start the analytics pool and, when pooled, the predictor workers.
    pub async fn initialize(&self) -> StartupReport {
        let (analytics, predictions) = tokio::join!(self.pool.initialize(), self.predictor.initialize());
        StartupReport {
            analytics,
            predictions,
        }
    }

    /// Run an analytics request.
    #[instrument(level = "debug", skip(self, params))]
    pub async fn execute(&self, request_type: &str, params: Value) -> Result<Served> {
        let started = Instant::now();
        let outcome = self.execute_uncounted(request_type, params).await;
        self.record(started);
        outcome
    }

    async fn execute_uncounted(&self, request_type: &str, params: Value) -> Result<Served> {
        if request_type.trim().is_empty() {
            return Err(CoreError::InvalidRequest("request type must not be empty".to_string()));
        }

        let key = canonical_key(request_type, &params);
        let epoch = match self.analytics.lookup(&key) {
            Lookup::Hit(data) => {
                debug!(request_type, "Analytics cache hit");
                return Ok(Served { data, cached: true });
            }
            Lookup::Miss { epoch } => epoch,
        };

        let data = self.pool.submit(request_type, params).await?;
        self.analytics.store(epoch, key, data.clone(), request_type);
        Ok(Served {
            data,
            cached: false,
        })
    }

    /// Run a prediction.
    #[instrument(level = "debug", skip_all, fields(carrier = %input.carrier, zone = input.zone))]
    pub async fn predict(&self, input: &PredictionInput) -> Result<Served> {
        let started = Instant::now();
        let outcome = self.predict_uncounted(input).await;
        self.record(started);
        outcome
    }

    async fn predict_uncounted(&self, input: &PredictionInput) -> Result<Served> {
        input.validate()?;
        let normalized = input.normalized();
        let key = canonical_key(PREDICT_REQUEST_TYPE, &normalized);
        let epoch = match self.predictions.lookup(&key) {
            Lookup::Hit(data) => {
                debug!("Prediction cache hit");
                return Ok(Served { data, cached: true });
            }
            Lookup::Miss { epoch } => epoch,
        };

        let data = self.predictor.predict(&normalized).await?;
        self.predictions.store(epoch, key, data.clone(), PREDICT_REQUEST_TYPE);
        Ok(Served {
            data,
            cached: false,
        })
    }

    fn record(&self, started: Instant) {
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        lock(&self.latency).add(ms);
        lock(&self.daily).add();
    }

    pub fn cache_stats(&self) -> CacheReport {
        CacheReport {
            analytics: self.analytics.stats(),
            predictions: self.predictions.stats(),
        }
    }

    pub fn clear_caches(&self) -> ClearReport {
        let report = ClearReport {
            analytics: self.analytics.clear(),
            predictions: self.predictions.clear(),
        };
        info!(
            analytics = report.analytics,
            predictions = report.predictions,
            "Caches cleared"
        );
        report
    }

    /// Clear both caches and re-run the pre-warm battery, waiting for it.
    pub async fn refresh_caches(&self) -> RefreshReport {
        let cleared = self.clear_caches();
        let prewarm = prewarm::run_prewarm(self, &self.prewarm).await;
        RefreshReport { cleared, prewarm }
    }

    pub fn usage_stats(&self) -> UsageStats {
        UsageStats {
            latency: lock(&self.latency).stats(),
            daily: lock(&self.daily).stats(),
        }
    }

    pub fn pool_stats(&self) -> PoolReport {
        PoolReport {
            analytics: self.pool.stats(),
            prediction_backend: self.predictor.name(),
            predictions: self.predictor.pool_stats(),
        }
    }

    pub fn prewarm_requests(&self) -> &[PrewarmRequest] {
        &self.prewarm
    }

    /// Stop all workers. Later requests fail with `ShuttingDown`.
    pub async fn shutdown(&self) {
        tokio::join!(self.pool.shutdown(), self.predictor.shutdown());
    }
}
