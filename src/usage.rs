//! Request throughput and usage statistics.

use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// Default number of latency samples kept.
pub const DEFAULT_LATENCY_WINDOW: usize = 1000;

/// Days of daily counts kept.
pub const DAILY_RETENTION_DAYS: i64 = 30;

/// Ring buffer of recent request latencies.
#[derive(Debug, Clone)]
pub struct RollingLatencyTracker {
    samples: VecDeque<f64>,
    capacity: usize,
    total: u64,
}

/// Summary of the latency window.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LatencyStats {
    /// Samples currently in the window.
    pub recent_count: usize,
    pub average_ms: f64,
    pub median_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Requests recorded since startup.
    pub total_requests: u64,
}

impl Default for RollingLatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}

impl RollingLatencyTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
        }
    }

    pub fn add(&mut self, ms: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(ms);
        self.total += 1;
    }

    pub fn stats(&self) -> LatencyStats {
        if self.samples.is_empty() {
            return LatencyStats {
                total_requests: self.total,
                ..Default::default()
            };
        }

        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };

        LatencyStats {
            recent_count: n,
            average_ms: sorted.iter().sum::<f64>() / n as f64,
            median_ms: median,
            min_ms: sorted[0],
            max_ms: sorted[n - 1],
            total_requests: self.total,
        }
    }
}

/// Per-day request counts for the last month.
#[derive(Debug, Clone, Default)]
pub struct DailyCountTracker {
    days: BTreeMap<NaiveDate, u64>,
    total: u64,
}

/// Summary of daily counts.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DailyStats {
    pub today: u64,
    /// Requests recorded since startup.
    pub total_requests: u64,
    /// Mean requests per retained day with traffic.
    pub daily_average: f64,
    pub active_days: usize,
}

impl DailyCountTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request against today's local date.
    pub fn add(&mut self) {
        self.add_on(Local::now().date_naive());
    }

    /// Count one request against `date` and drop buckets older than the
    /// retention window measured from it.
    pub fn add_on(&mut self, date: NaiveDate) {
        *self.days.entry(date).or_insert(0) += 1;
        self.total += 1;

        if let Some(cutoff) = date.checked_sub_days(chrono::Days::new(DAILY_RETENTION_DAYS as u64)) {
            self.days.retain(|day, _| *day >= cutoff);
        }
    }

    pub fn stats(&self) -> DailyStats {
        self.stats_on(Local::now().date_naive())
    }

    pub fn stats_on(&self, today: NaiveDate) -> DailyStats {
        let active_days = self.days.len();
        let retained: u64 = self.days.values().sum();
        DailyStats {
            today: self.days.get(&today).copied().unwrap_or(0),
            total_requests: self.total,
            daily_average: if active_days == 0 {
                0.0
            } else {
                retained as f64 / active_days as f64
            },
            active_days,
        }
    }
}
