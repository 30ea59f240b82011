//! Shared helpers for integration tests.
//!
//! The crate's own binary doubles as the worker (`internal-worker`) and the
//! one-shot predictor (`internal-predict`).

#![allow(dead_code)]

use std::time::Duration;
use transit_core::pool::{WorkerCommand, WorkerPool, WorkerPoolConfig};

pub const BIN: &str = env!("CARGO_BIN_EXE_transit-core");

/// Command for the reference worker.
pub fn worker_command() -> WorkerCommand {
    WorkerCommand::new(BIN).arg("internal-worker")
}

/// Command for the reference one-shot predictor.
pub fn predict_command() -> WorkerCommand {
    WorkerCommand::new(BIN).arg("internal-predict")
}

/// Pool settings tuned for fast tests.
pub fn pool_config(pool_size: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        restart_delay: Duration::from_millis(50),
        shutdown_grace: Duration::from_secs(2),
        ..WorkerPoolConfig::new(worker_command()).with_pool_size(pool_size)
    }
}

/// A pool of reference workers with every slot ready.
pub async fn ready_pool(config: WorkerPoolConfig) -> WorkerPool {
    let size = config.pool_size;
    let pool = WorkerPool::new(config);
    let report = pool.initialize().await;
    assert_eq!(report.ready.len(), size, "workers failed to start: {:?}", report.failed);
    pool
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
