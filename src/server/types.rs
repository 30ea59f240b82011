//! API request and response types.

use serde::Serialize;

use crate::dispatcher::{PoolReport, UsageStats};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` when at least one analytics worker is up, else `degraded`.
    pub status: &'static str,
    pub version: &'static str,
    pub workers_ready: usize,
    pub pool_size: usize,
    pub queued: usize,
}

/// Usage and pool statistics.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub usage: UsageStats,
    pub pools: PoolReport,
}
